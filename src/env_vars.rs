//! Environment variable names used throughout corsgate configuration

/// Listener
pub const PORT: &str = "PORT";

/// Origin, client and target policy
pub const ALLOWED_ORIGINS: &str = "ALLOWED_ORIGINS";
pub const BLOCKED_IPS: &str = "BLOCKED_IPS";
pub const BLOCKED_DOMAINS: &str = "BLOCKED_DOMAINS";
pub const ALLOWED_DOMAINS: &str = "ALLOWED_DOMAINS";
pub const TRUSTED_PROXY_IPS: &str = "TRUSTED_PROXY_IPS";

/// Admission control
pub const RATE_LIMIT: &str = "RATE_LIMIT";
pub const RATE_LIMIT_WINDOW: &str = "RATE_LIMIT_WINDOW";
pub const CONCURRENT_LIMIT: &str = "CONCURRENT_LIMIT";
pub const TOTAL_CONCURRENT_LIMIT: &str = "TOTAL_CONCURRENT_LIMIT";

/// Management access
pub const API_KEY: &str = "API_KEY";

/// Observability
pub const ENABLE_STATS: &str = "ENABLE_STATS";
pub const ENABLE_LOGGING: &str = "ENABLE_LOGGING";
pub const LOG_WEBHOOK: &str = "LOG_WEBHOOK";

/// Proxy behavior
pub const MAX_URL_LENGTH: &str = "MAX_URL_LENGTH";
pub const TIMEOUT: &str = "TIMEOUT";
pub const MAX_BODY_SIZE: &str = "MAX_BODY_SIZE";
pub const CACHE_TTL: &str = "CACHE_TTL";

/// Keys whose values are never printed.
pub const SECRET_VARS: &[&str] = &[API_KEY, LOG_WEBHOOK];

/// Get all environment variable names for documentation/validation
pub fn all_env_vars() -> &'static [&'static str] {
    &[
        PORT,
        ALLOWED_ORIGINS,
        BLOCKED_IPS,
        BLOCKED_DOMAINS,
        ALLOWED_DOMAINS,
        TRUSTED_PROXY_IPS,
        RATE_LIMIT,
        RATE_LIMIT_WINDOW,
        CONCURRENT_LIMIT,
        TOTAL_CONCURRENT_LIMIT,
        API_KEY,
        ENABLE_STATS,
        ENABLE_LOGGING,
        LOG_WEBHOOK,
        MAX_URL_LENGTH,
        TIMEOUT,
        MAX_BODY_SIZE,
        CACHE_TTL,
    ]
}
