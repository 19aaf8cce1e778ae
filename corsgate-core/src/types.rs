//! Type definitions for corsgate configuration.
//!
//! [`GatewayConfig`] is an immutable snapshot. The gateway holds it behind an
//! `Arc` and replaces it wholesale on reload; it is never mutated in place.
//! Where the configuration comes from is abstracted by [`ConfigSource`].

use std::time::Duration;

use serde::Serialize;

use crate::defaults;
use crate::error::{ConfigError, ConfigIssue};

/// Wildcard entry for origin and domain lists.
pub const WILDCARD: &str = "*";

/// Loads a fresh [`GatewayConfig`] from wherever the deployment keeps it.
///
/// Implement this trait to provide configuration from any source:
/// environment variables, files, remote services, etc. The gateway calls
/// [`ConfigSource::load`] on the `reload-config` management route.
///
/// # Example
///
/// ```
/// use corsgate_core::{ConfigSource, GatewayConfig};
/// use corsgate_core::error::ConfigError;
///
/// struct Fixed(GatewayConfig);
///
/// impl ConfigSource for Fixed {
///     fn load(&self) -> Result<GatewayConfig, ConfigError> {
///         Ok(self.0.clone())
///     }
/// }
///
/// let source = Fixed(GatewayConfig::default());
/// assert_eq!(source.load().unwrap().port, 8080);
/// ```
pub trait ConfigSource: Send + Sync {
    /// Produces a complete configuration or every problem found.
    fn load(&self) -> Result<GatewayConfig, ConfigError>;
}

/// Complete gateway configuration.
///
/// Numeric limits use `0` to mean "unlimited" where noted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    /// TCP port to listen on.
    pub port: u16,
    /// Origins allowed to call the gateway (`*` = any).
    pub allowed_origins: Vec<String>,
    /// Client IPs that are always rejected.
    pub blocked_ips: Vec<String>,
    /// Target domains (and their subdomains) that are always rejected.
    pub blocked_domains: Vec<String>,
    /// When non-empty, the only target domains (and subdomains) allowed.
    pub allowed_domains: Vec<String>,
    /// Peers trusted to report the client address in forwarding headers.
    pub trusted_proxy_ips: Vec<String>,
    /// Admitted requests per client per window (0 = unlimited).
    pub rate_limit: u32,
    /// Sliding window length.
    pub rate_limit_window: Duration,
    /// In-flight requests per client (0 = unlimited).
    pub concurrent_limit: usize,
    /// In-flight requests across all clients (0 = unlimited).
    pub total_concurrent_limit: usize,
    /// Key protecting management routes and identifying privileged clients.
    pub api_key: Option<String>,
    /// Whether request statistics are collected.
    pub enable_stats: bool,
    /// Whether access records are produced.
    pub enable_logging: bool,
    /// Endpoint receiving batched access records.
    pub log_webhook: Option<String>,
    /// Maximum length of the decoded target URL.
    pub max_url_length: usize,
    /// Upstream call timeout.
    pub timeout: Duration,
    /// Maximum request body size in bytes (0 = unlimited).
    pub max_body_size: usize,
    /// Response cache TTL (zero disables caching).
    pub cache_ttl: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: defaults::PORT,
            allowed_origins: vec![WILDCARD.to_string()],
            blocked_ips: Vec::new(),
            blocked_domains: Vec::new(),
            allowed_domains: Vec::new(),
            trusted_proxy_ips: Vec::new(),
            rate_limit: defaults::RATE_LIMIT,
            rate_limit_window: defaults::RATE_LIMIT_WINDOW,
            concurrent_limit: defaults::CONCURRENT_LIMIT,
            total_concurrent_limit: defaults::TOTAL_CONCURRENT_LIMIT,
            api_key: None,
            enable_stats: true,
            enable_logging: true,
            log_webhook: None,
            max_url_length: defaults::MAX_URL_LENGTH,
            timeout: defaults::TIMEOUT,
            max_body_size: defaults::MAX_BODY_SIZE,
            cache_ttl: defaults::CACHE_TTL,
        }
    }
}

impl GatewayConfig {
    /// Checks the invariants that must hold before a configuration is committed.
    ///
    /// Returns every violated invariant, not just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();

        if self.port == 0 {
            issues.push(ConfigIssue::new("PORT", "must be between 1 and 65535"));
        }
        if self.rate_limit_window.is_zero() {
            issues.push(ConfigIssue::new(
                "RATE_LIMIT_WINDOW",
                "must be greater than 0",
            ));
        }
        if self.max_url_length == 0 {
            issues.push(ConfigIssue::new("MAX_URL_LENGTH", "must be greater than 0"));
        }
        if self.timeout.is_zero() {
            issues.push(ConfigIssue::new("TIMEOUT", "must be greater than 0"));
        }
        if self.concurrent_limit > 0
            && self.total_concurrent_limit > 0
            && self.concurrent_limit > self.total_concurrent_limit
        {
            issues.push(ConfigIssue::new(
                "CONCURRENT_LIMIT",
                "must not exceed TOTAL_CONCURRENT_LIMIT",
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::new(issues))
        }
    }

    /// Returns `true` if every origin is accepted.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == WILDCARD)
    }

    /// Returns `true` if responses may be cached.
    pub fn cache_enabled(&self) -> bool {
        !self.cache_ttl.is_zero()
    }

    /// Returns the maximum body size formatted for display.
    pub fn max_body_size_display(&self) -> String {
        if self.max_body_size == 0 {
            "unlimited".to_string()
        } else if self.max_body_size >= 1024 * 1024 {
            format!("{} MB", self.max_body_size / 1024 / 1024)
        } else {
            format!("{} bytes", self.max_body_size)
        }
    }

    /// Returns a copy safe to expose over the management API.
    pub fn redacted(&self) -> RedactedConfig {
        RedactedConfig {
            port: self.port,
            allowed_origins: self.allowed_origins.clone(),
            blocked_ips: self.blocked_ips.clone(),
            blocked_domains: self.blocked_domains.clone(),
            allowed_domains: self.allowed_domains.clone(),
            trusted_proxy_ips: self.trusted_proxy_ips.clone(),
            rate_limit: self.rate_limit,
            rate_limit_window_ms: duration_ms(self.rate_limit_window),
            concurrent_limit: self.concurrent_limit,
            total_concurrent_limit: self.total_concurrent_limit,
            api_key: self.api_key.as_ref().map(|_| REDACTED.to_string()),
            enable_stats: self.enable_stats,
            enable_logging: self.enable_logging,
            log_webhook: self.log_webhook.as_ref().map(|_| REDACTED.to_string()),
            max_url_length: self.max_url_length,
            timeout_ms: duration_ms(self.timeout),
            max_body_size: self.max_body_size,
            cache_ttl_ms: duration_ms(self.cache_ttl),
        }
    }
}

const REDACTED: &str = "***";

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Serializable view of [`GatewayConfig`] with secrets masked.
#[derive(Clone, Debug, Serialize)]
pub struct RedactedConfig {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub blocked_ips: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub trusted_proxy_ips: Vec<String>,
    pub rate_limit: u32,
    pub rate_limit_window_ms: u64,
    pub concurrent_limit: usize,
    pub total_concurrent_limit: usize,
    pub api_key: Option<String>,
    pub enable_stats: bool,
    pub enable_logging: bool,
    pub log_webhook: Option<String>,
    pub max_url_length: usize,
    pub timeout_ms: u64,
    pub max_body_size: usize,
    pub cache_ttl_ms: u64,
}
