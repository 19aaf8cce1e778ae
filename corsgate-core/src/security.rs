//! Target URL validation and SSRF protection.
//!
//! [`validate`] decides whether a target may be proxied. It is a pure function
//! of its inputs and the configuration: no DNS lookups, no I/O, no state.
//! Checks run in a fixed order and the first failure wins, so a given input
//! always produces the same [`Denial`]:
//!
//! 1. client IP blocklist
//! 2. URL length
//! 3. URL parsing (with scheme defaulting and `scheme:/host` repair)
//! 4. domain blocklist (exact or suffix)
//! 5. domain allowlist (exact or subdomain)
//! 6. origin allowlist
//! 7. scheme checks
//! 8. control characters
//! 9. SSRF guard (private ranges, restricted hosts, internal-service ports)

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hyper::StatusCode;
use url::{Host, Url};

use crate::types::{GatewayConfig, WILDCARD};

/// Schemes rejected outright, matched as a prefix of the raw target.
const MALICIOUS_SCHEMES: &[&str] = &[
    "javascript:",
    "data:",
    "vbscript:",
    "file:",
    "ftp:",
    "about:",
    "chrome:",
    "chrome-extension:",
    "moz-extension:",
];

/// Host names that resolve to the gateway itself or to cloud metadata services.
const RESTRICTED_HOSTS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "metadata",
    "metadata.google.internal",
    "metadata.goog",
    "metadata.azure.com",
    "instance-data",
    "instance-data.ec2.internal",
];

/// Ports of internal services that must never be reachable through the gateway.
const RESTRICTED_PORTS: &[u16] = &[
    22,    // SSH
    23,    // Telnet
    25,    // SMTP
    53,    // DNS
    110,   // POP3
    135,   // MS RPC
    137,   // NetBIOS
    138,   // NetBIOS
    139,   // SMB over NetBIOS
    143,   // IMAP
    445,   // SMB
    465,   // SMTPS
    587,   // SMTP submission
    1433,  // MSSQL
    1521,  // Oracle
    2375,  // Docker API
    2379,  // etcd
    3306,  // MySQL
    3389,  // RDP
    5432,  // PostgreSQL
    5984,  // CouchDB
    6379,  // Redis
    9200,  // Elasticsearch
    11211, // Memcached
    27017, // MongoDB
];

/// Reason a target was refused. One variant per validation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// The client IP is on the blocklist.
    BlockedIp,
    /// The target URL exceeds the configured maximum length.
    UrlTooLong { length: usize, max: usize },
    /// The target could not be parsed as a URL.
    InvalidUrl,
    /// The target host matches the domain blocklist.
    BlockedDomain(String),
    /// The domain allowlist is active and the host is not on it.
    DomainNotAllowed(String),
    /// The caller's origin is not on the origin allowlist.
    OriginNotAllowed(String),
    /// The target uses a scheme that can execute or read local content.
    MaliciousScheme(String),
    /// The target uses a scheme the gateway does not proxy.
    UnsupportedScheme(String),
    /// The raw target contains control characters.
    ControlCharacters,
    /// The target host is a private, loopback or otherwise internal address.
    PrivateAddress(String),
    /// The target host is a named internal or metadata host.
    RestrictedHost(String),
    /// The target port belongs to an internal service.
    RestrictedPort(u16),
}

impl Denial {
    /// Returns the HTTP status for this denial.
    ///
    /// Malformed input is a 400; everything else is a policy block (403).
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UrlTooLong { .. } | Self::InvalidUrl => StatusCode::BAD_REQUEST,
            _ => StatusCode::FORBIDDEN,
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockedIp => write!(f, "IP address is blocked"),
            Self::UrlTooLong { length, max } => {
                write!(f, "URL too long ({length} characters, max {max})")
            }
            Self::InvalidUrl => write!(f, "Invalid URL"),
            Self::BlockedDomain(host) => write!(f, "Domain is blocked: {host}"),
            Self::DomainNotAllowed(host) => write!(f, "Domain is not in the allowlist: {host}"),
            Self::OriginNotAllowed(origin) => write!(f, "Origin is not allowed: {origin}"),
            Self::MaliciousScheme(scheme) => write!(f, "Scheme is not allowed: {scheme}"),
            Self::UnsupportedScheme(scheme) => write!(f, "Unsupported scheme: {scheme}"),
            Self::ControlCharacters => write!(f, "URL contains control characters"),
            Self::PrivateAddress(host) => write!(
                f,
                "Access to private or internal addresses is not allowed: {host}"
            ),
            Self::RestrictedHost(host) => write!(f, "Access to restricted host is not allowed: {host}"),
            Self::RestrictedPort(port) => write!(f, "Access to port {port} is not allowed"),
        }
    }
}

/// Validates a target URL for the given client and origin.
///
/// On success returns the normalized, parsed URL that should be requested.
///
/// # Example
///
/// ```
/// use corsgate_core::GatewayConfig;
/// use corsgate_core::security::{validate, Denial};
///
/// let config = GatewayConfig::default();
/// let url = validate(&config, "example.com/api", "203.0.113.7", None).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/api");
///
/// let denied = validate(&config, "127.0.0.1/admin", "203.0.113.7", None).unwrap_err();
/// assert!(matches!(denied, Denial::PrivateAddress(_)));
/// ```
pub fn validate(
    config: &GatewayConfig,
    target: &str,
    client_ip: &str,
    origin: Option<&str>,
) -> Result<Url, Denial> {
    if config.blocked_ips.iter().any(|blocked| blocked == client_ip) {
        return Err(Denial::BlockedIp);
    }

    let length = target.chars().count();
    if length > config.max_url_length {
        return Err(Denial::UrlTooLong {
            length,
            max: config.max_url_length,
        });
    }

    let url = Url::parse(&normalize_target(target)).map_err(|_| Denial::InvalidUrl)?;
    let host = url.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase());

    if let Some(host) = host.as_deref() {
        if config
            .blocked_domains
            .iter()
            .any(|domain| domain_matches(host, domain))
        {
            return Err(Denial::BlockedDomain(host.to_string()));
        }
    }

    if !config.allowed_domains.is_empty() && !config.allowed_domains.iter().any(|d| d == WILDCARD)
    {
        let allowed = host.as_deref().is_some_and(|host| {
            config
                .allowed_domains
                .iter()
                .any(|domain| domain_matches(host, domain))
        });
        if !allowed {
            return Err(Denial::DomainNotAllowed(host.unwrap_or_default()));
        }
    }

    if let Some(origin) = origin
        && !config.allowed_origins.is_empty()
        && !config
            .allowed_origins
            .iter()
            .any(|allowed| allowed == WILDCARD || allowed == origin)
    {
        return Err(Denial::OriginNotAllowed(origin.to_string()));
    }

    check_scheme(target, &url)?;

    if target.chars().any(char::is_control) {
        return Err(Denial::ControlCharacters);
    }

    check_ssrf(&url)?;

    Ok(url)
}

/// Returns `true` if `host` equals `domain` or is a subdomain of it.
fn domain_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches("*.").trim_end_matches('.');
    if domain.is_empty() || domain == WILDCARD {
        return false;
    }
    host.eq_ignore_ascii_case(domain)
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
            && host[host.len() - domain.len()..].eq_ignore_ascii_case(domain))
}

/// Turns whatever the caller put in the path into something `Url::parse` accepts.
///
/// - `example.com/x` → `https://example.com/x`
/// - `https:/example.com` → `https://example.com` (proxies collapse `//`)
/// - `example.com:8080/x` → `https://example.com:8080/x`
/// - other schemes (`javascript:`, `data:`) are left alone for the scheme check
pub fn normalize_target(raw: &str) -> String {
    let trimmed = raw.trim();

    match split_scheme(trimmed) {
        Some((scheme, rest)) => {
            if rest.starts_with("//") {
                trimmed.to_string()
            } else if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") {
                format!("{scheme}://{}", rest.trim_start_matches('/'))
            } else if rest.starts_with(|c: char| c.is_ascii_digit()) {
                // `host:port` looks like a scheme to the URL parser
                format!("https://{trimmed}")
            } else {
                trimmed.to_string()
            }
        }
        None => format!("https://{}", trimmed.trim_start_matches('/')),
    }
}

/// Splits `scheme:rest` when the prefix is a syntactically valid scheme.
fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = input.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }
    Some((scheme, rest))
}

fn check_scheme(raw: &str, url: &Url) -> Result<(), Denial> {
    let lowered = raw.trim_start().to_ascii_lowercase();
    if let Some(scheme) = MALICIOUS_SCHEMES
        .iter()
        .find(|scheme| lowered.starts_with(**scheme))
    {
        return Err(Denial::MaliciousScheme(scheme.trim_end_matches(':').to_string()));
    }

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Denial::UnsupportedScheme(other.to_string())),
    }
}

fn check_ssrf(url: &Url) -> Result<(), Denial> {
    match url.host() {
        Some(Host::Ipv4(ip)) => {
            if is_restricted_ip(&IpAddr::V4(ip)) {
                return Err(Denial::PrivateAddress(ip.to_string()));
            }
        }
        Some(Host::Ipv6(ip)) => {
            if is_restricted_ip(&IpAddr::V6(ip)) {
                return Err(Denial::PrivateAddress(ip.to_string()));
            }
        }
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if is_restricted_host(&domain) {
                return Err(Denial::RestrictedHost(domain));
            }
        }
        None => return Err(Denial::InvalidUrl),
    }

    if let Some(port) = url.port()
        && RESTRICTED_PORTS.contains(&port)
    {
        return Err(Denial::RestrictedPort(port));
    }

    Ok(())
}

fn is_restricted_host(domain: &str) -> bool {
    RESTRICTED_HOSTS.contains(&domain)
        || domain.ends_with(".localhost")
        || domain.ends_with(".internal")
        || domain.ends_with(".local")
}

/// Check if an IP address is not routable on the public internet.
pub fn is_restricted_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_restricted_ipv4(*ipv4),
        IpAddr::V6(ipv6) => is_restricted_ipv6(*ipv6),
    }
}

fn is_restricted_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_documentation()
        // 0.0.0.0/8
        || octets[0] == 0
        // 100.64.0.0/10 (carrier-grade NAT)
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        // 240.0.0.0/4 (reserved)
        || octets[0] >= 240
}

fn is_restricted_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(embedded) = embedded_ipv4(ip) {
        return is_restricted_ipv4(embedded);
    }

    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}

/// IPv4 address carried inside an IPv6 one: mapped (`::ffff:a.b.c.d`),
/// compatible (`::a.b.c.d`) or NAT64 (`64:ff9b::a.b.c.d`).
fn embedded_ipv4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return Some(mapped);
    }

    let segments = ip.segments();
    let compatible = segments[..6] == [0; 6] && !ip.is_unspecified() && !ip.is_loopback();
    let nat64 = segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0];
    if !(compatible || nat64) {
        return None;
    }
    let [.., a, b, c, d] = ip.octets();
    Some(Ipv4Addr::new(a, b, c, d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestConfig;

    const CLIENT: &str = "203.0.113.10";

    fn check(config: &GatewayConfig, target: &str) -> Result<Url, Denial> {
        validate(config, target, CLIENT, None)
    }

    // ===========================================
    // normalize_target tests
    // ===========================================

    #[test]
    fn test_normalize_adds_default_scheme() {
        assert_eq!(normalize_target("example.com"), "https://example.com");
        assert_eq!(normalize_target("example.com/a?b=1"), "https://example.com/a?b=1");
    }

    #[test]
    fn test_normalize_repairs_collapsed_slashes() {
        assert_eq!(normalize_target("https:/example.com/x"), "https://example.com/x");
        assert_eq!(normalize_target("http:example.com"), "http://example.com");
        assert_eq!(normalize_target("https://example.com"), "https://example.com");
    }

    #[test]
    fn test_normalize_host_with_port() {
        assert_eq!(normalize_target("example.com:8443/x"), "https://example.com:8443/x");
    }

    #[test]
    fn test_normalize_leaves_foreign_schemes() {
        assert_eq!(normalize_target("javascript:alert(1)"), "javascript:alert(1)");
        assert_eq!(normalize_target("ftp://files.example"), "ftp://files.example");
    }

    // ===========================================
    // Ordered checks
    // ===========================================

    #[test]
    fn test_allows_public_target() {
        let config = TestConfig::new().build();
        let url = check(&config, "https://api.example.com/v1/items?x=1").unwrap();
        assert_eq!(url.host_str(), Some("api.example.com"));
    }

    #[test]
    fn test_blocked_ip_wins_over_everything() {
        let config = TestConfig::new().with_blocked_ips(vec![CLIENT]).build();
        assert_eq!(check(&config, "127.0.0.1"), Err(Denial::BlockedIp));
        assert_eq!(check(&config, "example.com"), Err(Denial::BlockedIp));
    }

    #[test]
    fn test_url_too_long() {
        let mut config = TestConfig::new().build();
        config.max_url_length = 20;
        let result = check(&config, "https://example.com/a-long-path");
        assert!(matches!(result, Err(Denial::UrlTooLong { max: 20, .. })));
        assert_eq!(result.unwrap_err().status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_url() {
        let config = TestConfig::new().build();
        assert_eq!(check(&config, "https://"), Err(Denial::InvalidUrl));
        assert_eq!(check(&config, "http://exa mple.com"), Err(Denial::InvalidUrl));
    }

    #[test]
    fn test_blocked_domain_exact_and_suffix() {
        let config = TestConfig::new()
            .with_blocked_domains(vec!["malicious.com"])
            .build();
        assert_eq!(
            check(&config, "malicious.com/x"),
            Err(Denial::BlockedDomain("malicious.com".into()))
        );
        assert_eq!(
            check(&config, "https://cdn.malicious.com/x"),
            Err(Denial::BlockedDomain("cdn.malicious.com".into()))
        );
        assert!(check(&config, "notmalicious.com").is_ok());
    }

    #[test]
    fn test_allowlist_subdomains() {
        let config = TestConfig::new()
            .with_allowed_domains(vec!["example.com"])
            .build();
        assert!(check(&config, "example.com").is_ok());
        assert!(check(&config, "api.example.com").is_ok());
        assert_eq!(
            check(&config, "example.org"),
            Err(Denial::DomainNotAllowed("example.org".into()))
        );
        assert!(matches!(
            check(&config, "badexample.com"),
            Err(Denial::DomainNotAllowed(_))
        ));
    }

    #[test]
    fn test_allowlist_wildcard_allows_all() {
        let config = TestConfig::new().with_allowed_domains(vec!["*"]).build();
        assert!(check(&config, "anything.example").is_ok());
    }

    #[test]
    fn test_blocklist_checked_before_allowlist() {
        let config = TestConfig::new()
            .with_allowed_domains(vec!["example.com"])
            .with_blocked_domains(vec!["evil.example.com"])
            .build();
        assert!(matches!(
            check(&config, "evil.example.com"),
            Err(Denial::BlockedDomain(_))
        ));
    }

    #[test]
    fn test_origin_allowlist() {
        let config = TestConfig::new()
            .with_allowed_origins(vec!["https://app.example"])
            .build();
        assert!(validate(&config, "example.com", CLIENT, Some("https://app.example")).is_ok());
        assert!(validate(&config, "example.com", CLIENT, None).is_ok());
        assert_eq!(
            validate(&config, "example.com", CLIENT, Some("https://evil.example")),
            Err(Denial::OriginNotAllowed("https://evil.example".into()))
        );
    }

    #[test]
    fn test_origin_wildcard() {
        let config = TestConfig::new().with_allowed_origins(vec!["*"]).build();
        assert!(validate(&config, "example.com", CLIENT, Some("https://any.example")).is_ok());
    }

    #[test]
    fn test_malicious_schemes() {
        let config = TestConfig::new().build();
        for target in [
            "javascript:alert(1)",
            "JavaScript:alert(1)",
            "vbscript:msgbox",
            "file:///etc/passwd",
            "ftp://files.example.com/a",
            "chrome-extension://abcdef/page.html",
            "about:blank",
        ] {
            assert!(
                matches!(check(&config, target), Err(Denial::MaliciousScheme(_))),
                "{target} should be rejected as malicious"
            );
        }
    }

    #[test]
    fn test_data_scheme() {
        let config = TestConfig::new().build();
        assert_eq!(
            check(&config, "data:text/html,hello"),
            Err(Denial::MaliciousScheme("data".into()))
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let config = TestConfig::new().build();
        assert_eq!(
            check(&config, "gopher://example.com/"),
            Err(Denial::UnsupportedScheme("gopher".into()))
        );
    }

    #[test]
    fn test_control_characters() {
        let config = TestConfig::new().build();
        assert_eq!(
            check(&config, "https://example.com/a\r\nX-Injected: 1"),
            Err(Denial::ControlCharacters)
        );
        assert_eq!(
            check(&config, "https://example.com/\u{7f}"),
            Err(Denial::ControlCharacters)
        );
    }

    // ===========================================
    // SSRF guard
    // ===========================================

    #[test]
    fn test_private_ipv4_ranges() {
        let config = TestConfig::new().build();
        for target in [
            "127.0.0.1/admin",
            "http://127.1.2.3",
            "10.0.0.5",
            "172.16.0.1",
            "172.31.255.254",
            "192.168.1.1",
            "169.254.169.254/latest/meta-data",
            "100.64.0.1",
            "100.127.255.255",
            "0.0.0.0",
            "0.1.2.3",
            "224.0.0.1",
            "239.255.255.250",
            "240.0.0.1",
            "255.255.255.255",
        ] {
            assert!(
                matches!(check(&config, target), Err(Denial::PrivateAddress(_))),
                "{target} should be rejected as private"
            );
        }
    }

    #[test]
    fn test_ipv4_edge_of_ranges_allowed() {
        let config = TestConfig::new().build();
        for target in ["172.15.255.255", "172.32.0.1", "100.63.255.255", "100.128.0.1", "8.8.8.8"] {
            assert!(check(&config, target).is_ok(), "{target} should be allowed");
        }
    }

    #[test]
    fn test_obfuscated_ipv4_forms() {
        let config = TestConfig::new().build();
        // The URL parser canonicalizes these to 127.0.0.1
        for target in ["http://2130706433/", "http://0x7f.0.0.1/", "http://0177.0.0.1/"] {
            assert!(
                matches!(check(&config, target), Err(Denial::PrivateAddress(_))),
                "{target} should be rejected"
            );
        }
    }

    #[test]
    fn test_private_ipv6() {
        let config = TestConfig::new().build();
        for target in [
            "http://[::1]/",
            "http://[::]/",
            "http://[fe80::1]/",
            "http://[fc00::1]/",
            "http://[fd12:3456::1]/",
            "http://[ff02::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://[::ffff:10.0.0.1]/",
        ] {
            assert!(
                matches!(check(&config, target), Err(Denial::PrivateAddress(_))),
                "{target} should be rejected"
            );
        }
        assert!(check(&config, "http://[2606:4700:4700::1111]/").is_ok());
    }

    #[test]
    fn test_ipv4_embedded_in_ipv6() {
        let config = TestConfig::new().build();
        for target in [
            "http://[::127.0.0.1]/",
            "http://[::10.0.0.1]/",
            "http://[::169.254.169.254]/",
            "http://[64:ff9b::127.0.0.1]/",
            "http://[64:ff9b::192.168.1.1]/",
        ] {
            assert!(
                matches!(check(&config, target), Err(Denial::PrivateAddress(_))),
                "{target} should be rejected"
            );
        }
        assert!(check(&config, "http://[64:ff9b::8.8.8.8]/").is_ok());
        assert!(is_restricted_ip(&"::1".parse().unwrap()));
        assert!(!is_restricted_ip(&"::8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_restricted_hosts() {
        let config = TestConfig::new().build();
        for target in [
            "localhost",
            "http://localhost:3000/",
            "LOCALHOST/x",
            "api.localhost",
            "metadata.google.internal/computeMetadata/v1/",
            "instance-data",
            "printer.local",
        ] {
            assert!(
                matches!(check(&config, target), Err(Denial::RestrictedHost(_))),
                "{target} should be rejected"
            );
        }
    }

    #[test]
    fn test_restricted_ports() {
        let config = TestConfig::new().build();
        assert_eq!(
            check(&config, "example.com:22"),
            Err(Denial::RestrictedPort(22))
        );
        assert_eq!(
            check(&config, "http://example.com:6379/"),
            Err(Denial::RestrictedPort(6379))
        );
        assert!(check(&config, "example.com:8443").is_ok());
        assert!(check(&config, "http://example.com:80/").is_ok());
    }

    #[test]
    fn test_denial_messages() {
        assert!(Denial::BlockedDomain("malicious.com".into())
            .to_string()
            .contains("Domain is blocked"));
        assert!(Denial::PrivateAddress("127.0.0.1".into())
            .to_string()
            .contains("private or internal"));
        assert_eq!(Denial::BlockedIp.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Denial::InvalidUrl.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_domain_matches() {
        assert!(domain_matches("example.com", "example.com"));
        assert!(domain_matches("a.b.example.com", "example.com"));
        assert!(domain_matches("a.example.com", "*.example.com"));
        assert!(!domain_matches("badexample.com", "example.com"));
        assert!(!domain_matches("example.com", "*"));
        assert!(!domain_matches("example.com", ""));
    }
}
