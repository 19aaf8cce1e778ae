//! Client address resolution.
//!
//! The address used for blocklists, rate limiting and stats is the TCP peer
//! unless that peer is a trusted proxy. Only then are forwarding headers read:
//!
//! 1. `X-Forwarded-For`: last valid entry (the one appended by the trusted proxy)
//! 2. `Forwarded` (RFC 7239): last valid `for=` node
//! 3. otherwise the peer address itself
//!
//! Untrusted peers cannot spoof their identity by sending these headers.

use std::net::IpAddr;

use hyper::HeaderMap;

use crate::headers;

/// Resolves the client IP for a request received from `peer`.
///
/// # Example
///
/// ```
/// use corsgate_core::client_ip::resolve_client_ip;
/// use hyper::HeaderMap;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
///
/// let peer = "10.0.0.2".parse().unwrap();
/// assert_eq!(resolve_client_ip(&headers, peer, &[]), "10.0.0.2");
/// assert_eq!(resolve_client_ip(&headers, peer, &["10.0.0.2".into()]), "203.0.113.7");
/// ```
pub fn resolve_client_ip(headers: &HeaderMap, peer: IpAddr, trusted_proxies: &[String]) -> String {
    let peer = canonical_peer(peer);
    if !is_trusted(&peer, trusted_proxies) {
        return peer.to_string();
    }

    headers
        .get(headers::X_FORWARDED_FOR)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_client_ip_from_xff)
        .or_else(|| {
            headers
                .get(headers::FORWARDED)
                .and_then(|h| h.to_str().ok())
                .and_then(extract_client_ip_from_forwarded)
        })
        .unwrap_or_else(|| peer.to_string())
}

/// Unwraps IPv4-mapped IPv6 peers (`::ffff:a.b.c.d`) from dual-stack sockets.
fn canonical_peer(peer: IpAddr) -> IpAddr {
    match peer {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(peer, IpAddr::V4),
        v4 => v4,
    }
}

fn is_trusted(peer: &IpAddr, trusted_proxies: &[String]) -> bool {
    trusted_proxies.iter().any(|entry| {
        entry
            .trim()
            .parse::<IpAddr>()
            .is_ok_and(|trusted| canonical_peer(trusted) == *peer)
    })
}

/// Last valid IP in an `X-Forwarded-For` chain.
fn extract_client_ip_from_xff(xff: &str) -> Option<String> {
    xff.split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .rfind(|ip| is_valid_ip_format(ip))
        .map(|ip| ip.trim_start_matches('[').trim_end_matches(']').to_string())
}

/// Last valid `for=` node of a `Forwarded` header.
///
/// Earlier elements come from the client and are not trusted.
fn extract_client_ip_from_forwarded(forwarded: &str) -> Option<String> {
    forwarded
        .split(',')
        .filter_map(|element| {
            element.split(';').find_map(|param| {
                let (name, value) = param.trim().split_once('=')?;
                name.eq_ignore_ascii_case("for").then_some(value)
            })
        })
        .rev()
        .find_map(extract_ip_from_node_identifier)
}

/// IP from an RFC 7239 node: `IP`, `IP:port`, `"[IPv6]"`, `"[IPv6]:port"`.
/// Obfuscated (`_hidden`) and `unknown` nodes yield nothing.
fn extract_ip_from_node_identifier(value: &str) -> Option<String> {
    let value = value.trim().trim_matches('"');

    if value.eq_ignore_ascii_case("unknown") || value.starts_with('_') {
        return None;
    }

    if let Some(rest) = value.strip_prefix('[') {
        let ipv6 = &rest[..rest.find(']')?];
        return is_valid_ip_format(ipv6).then(|| ipv6.to_string());
    }

    let ip = match value.matches(':').count() {
        1 => value.split(':').next()?,
        _ => value,
    };
    is_valid_ip_format(ip).then(|| ip.to_string())
}

fn is_valid_ip_format(ip: &str) -> bool {
    !ip.is_empty()
        && ip
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok()
}
