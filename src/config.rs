//! Configuration loading for corsgate.
//!
//! Every key is read through a lookup closure so tests can inject a mock
//! environment instead of mutating the process environment.
//!
//! # Rules
//!
//! - Unset or empty keys take their default
//! - A present but unparseable value is an error; there is no silent fallback
//! - All problems are collected and reported together
//!
//! # Example
//!
//! ```
//! use corsgate::config::parse_config;
//!
//! let config = parse_config(|key| match key {
//!     "RATE_LIMIT" => Ok("5".to_string()),
//!     _ => Err(std::env::VarError::NotPresent),
//! })
//! .unwrap();
//! assert_eq!(config.rate_limit, 5);
//! ```

use std::env::{self, VarError};
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::env_vars;
use corsgate_core::error::{ConfigError, ConfigIssue};
use corsgate_core::{ConfigSource, GatewayConfig};

/// Accumulates issues while reading keys through `lookup`.
struct EnvReader<F> {
    lookup: F,
    issues: Vec<ConfigIssue>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    fn new(lookup: F) -> Self {
        Self {
            lookup,
            issues: Vec::new(),
        }
    }

    /// Trimmed value, `None` when unset or empty.
    fn raw(&mut self, key: &'static str) -> Option<String> {
        match (self.lookup)(key) {
            Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            Ok(_) | Err(VarError::NotPresent) => None,
            Err(VarError::NotUnicode(_)) => {
                self.issues.push(ConfigIssue::new(key, "is not valid UTF-8"));
                None
            }
        }
    }

    fn number<T: FromStr>(&mut self, key: &'static str, default: T, rule: &str) -> T {
        let Some(value) = self.raw(key) else {
            return default;
        };
        match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                self.issues
                    .push(ConfigIssue::new(key, format!("{rule}, got '{value}'")));
                default
            }
        }
    }

    fn millis(&mut self, key: &'static str, default: Duration) -> Duration {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.number(key, default_ms, "must be a number of milliseconds"))
    }

    fn port(&mut self, key: &'static str, default: u16) -> u16 {
        let Some(value) = self.raw(key) else {
            return default;
        };
        match value.parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                self.issues.push(ConfigIssue::new(
                    key,
                    format!("must be between 1 and 65535, got '{value}'"),
                ));
                default
            }
        }
    }

    fn flag(&mut self, key: &'static str, default: bool) -> bool {
        let Some(value) = self.raw(key) else {
            return default;
        };
        match parse_bool(&value) {
            Some(flag) => flag,
            None => {
                self.issues.push(ConfigIssue::new(
                    key,
                    format!("must be true/false/1/0/yes/no/on/off, got '{value}'"),
                ));
                default
            }
        }
    }

    fn list(&mut self, key: &'static str, default: Vec<String>) -> Vec<String> {
        self.raw(key).map_or(default, |value| parse_list(&value))
    }

    fn domain_list(&mut self, key: &'static str) -> Vec<String> {
        self.list(key, Vec::new())
            .into_iter()
            .map(|d| d.to_ascii_lowercase())
            .collect()
    }

    fn secret(&mut self, key: &'static str) -> Option<String> {
        self.raw(key)
    }

    fn webhook(&mut self, key: &'static str) -> Option<String> {
        let value = self.raw(key)?;
        match Url::parse(&value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(value),
            _ => {
                self.issues
                    .push(ConfigIssue::new(key, "must be an http(s) URL"));
                None
            }
        }
    }
}

/// Parses `true`/`false` style flags, case-insensitively.
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses a JSON array of strings, falling back to a comma-separated list.
///
/// Filters out empty entries after trimming.
fn parse_list(input: &str) -> Vec<String> {
    if input.starts_with('[')
        && let Ok(items) = serde_json::from_str::<Vec<String>>(input)
    {
        return items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Builds a [`GatewayConfig`] from `lookup`, reporting every problem found.
///
/// The result has also passed [`GatewayConfig::validate`].
pub fn parse_config<F>(lookup: F) -> Result<GatewayConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let defaults = GatewayConfig::default();
    let mut env = EnvReader::new(lookup);

    let config = GatewayConfig {
        port: env.port(env_vars::PORT, defaults.port),
        allowed_origins: env.list(env_vars::ALLOWED_ORIGINS, defaults.allowed_origins),
        blocked_ips: env.list(env_vars::BLOCKED_IPS, defaults.blocked_ips),
        blocked_domains: env.domain_list(env_vars::BLOCKED_DOMAINS),
        allowed_domains: env.domain_list(env_vars::ALLOWED_DOMAINS),
        trusted_proxy_ips: env.list(env_vars::TRUSTED_PROXY_IPS, defaults.trusted_proxy_ips),
        rate_limit: env.number(
            env_vars::RATE_LIMIT,
            defaults.rate_limit,
            "must be a non-negative integer",
        ),
        rate_limit_window: env.millis(env_vars::RATE_LIMIT_WINDOW, defaults.rate_limit_window),
        concurrent_limit: env.number(
            env_vars::CONCURRENT_LIMIT,
            defaults.concurrent_limit,
            "must be a non-negative integer",
        ),
        total_concurrent_limit: env.number(
            env_vars::TOTAL_CONCURRENT_LIMIT,
            defaults.total_concurrent_limit,
            "must be a non-negative integer",
        ),
        api_key: env.secret(env_vars::API_KEY),
        enable_stats: env.flag(env_vars::ENABLE_STATS, defaults.enable_stats),
        enable_logging: env.flag(env_vars::ENABLE_LOGGING, defaults.enable_logging),
        log_webhook: env.webhook(env_vars::LOG_WEBHOOK),
        max_url_length: env.number(
            env_vars::MAX_URL_LENGTH,
            defaults.max_url_length,
            "must be a positive integer",
        ),
        timeout: env.millis(env_vars::TIMEOUT, defaults.timeout),
        max_body_size: env.number(
            env_vars::MAX_BODY_SIZE,
            defaults.max_body_size,
            "must be a number of bytes",
        ),
        cache_ttl: env.millis(env_vars::CACHE_TTL, defaults.cache_ttl),
    };

    if !env.issues.is_empty() {
        return Err(ConfigError::new(env.issues));
    }
    config.validate()?;
    Ok(config)
}

// ============================================================================
// EnvVarConfig - ConfigSource implementation using environment variables
// ============================================================================

/// Configuration source that reads the process environment on every load.
///
/// An optional port override (from the command line) wins over `PORT`.
///
/// # Example
///
/// ```
/// use corsgate::config::EnvVarConfig;
///
/// let source = EnvVarConfig::new().with_port_override(Some(9090));
/// assert_eq!(source.port_override(), Some(9090));
/// ```
#[derive(Clone, Debug, Default)]
pub struct EnvVarConfig {
    port_override: Option<u16>,
}

impl EnvVarConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port_override(mut self, port: Option<u16>) -> Self {
        self.port_override = port;
        self
    }

    pub fn port_override(&self) -> Option<u16> {
        self.port_override
    }

    fn load_with<F>(&self, lookup: F) -> Result<GatewayConfig, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let mut config = parse_config(lookup)?;
        if let Some(port) = self.port_override {
            config.port = port;
            config.validate()?;
        }
        Ok(config)
    }
}

impl ConfigSource for EnvVarConfig {
    fn load(&self) -> Result<GatewayConfig, ConfigError> {
        self.load_with(|key| env::var(key)).inspect_err(|err| {
            for issue in &err.issues {
                warn!(var = issue.key, reason = %issue.message, "Invalid configuration value");
            }
        })
    }
}
