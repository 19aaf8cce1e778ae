//! Default configuration values for corsgate.
//!
//! This module centralizes all default values used throughout corsgate,
//! ensuring consistency between the env parser, production code and tests.

use std::time::Duration;

/// Default listen port.
pub const PORT: u16 = 8080;

/// Default maximum admitted requests per client within one window.
pub const RATE_LIMIT: u32 = 100;

/// Default rate limit window in milliseconds.
pub const RATE_LIMIT_WINDOW_MS: u64 = 60_000;

/// Default rate limit window duration.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_millis(RATE_LIMIT_WINDOW_MS);

/// Upper bound for the rate limiter sweep interval.
pub const RATE_LIMIT_SWEEP_MAX: Duration = Duration::from_secs(60);

/// Default per-client in-flight request cap.
pub const CONCURRENT_LIMIT: usize = 10;

/// Default global in-flight request cap.
pub const TOTAL_CONCURRENT_LIMIT: usize = 1_000;

/// Default maximum target URL length in characters.
pub const MAX_URL_LENGTH: usize = 2_048;

/// Default upstream timeout in milliseconds.
pub const TIMEOUT_MS: u64 = 30_000;

/// Default upstream timeout.
pub const TIMEOUT: Duration = Duration::from_millis(TIMEOUT_MS);

/// Default maximum request body size in bytes.
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Default response cache TTL in milliseconds.
pub const CACHE_TTL_MS: u64 = 60_000;

/// Default response cache TTL.
pub const CACHE_TTL: Duration = Duration::from_millis(CACHE_TTL_MS);

/// Upper bound for the cache sweep interval.
pub const CACHE_SWEEP_MAX: Duration = Duration::from_secs(30);

/// Number of response-time samples kept for the moving average.
pub const LATENCY_SAMPLES: usize = 1_000;

/// Number of hourly request-count slots kept by the stats collector.
pub const HOURLY_SLOTS: usize = 24;

/// Interval between hourly stats snapshots.
pub const HOURLY_INTERVAL: Duration = Duration::from_secs(3_600);

/// Number of rows returned in top-N stats tables.
pub const TOP_N: usize = 10;

/// Entries kept per domain/IP stats table; the least frequent are pruned.
pub const STATS_TABLE_CAPACITY: usize = 1_000;

/// Log records buffered before a flush is forced.
pub const LOG_BATCH_SIZE: usize = 10;

/// Maximum time a log record waits in the buffer.
pub const LOG_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Timeout for a single log webhook delivery.
pub const LOG_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// `Retry-After` value (seconds) sent with 503 admission rejections.
pub const OVERLOAD_RETRY_AFTER_SECS: u64 = 1;

/// `Access-Control-Max-Age` value (seconds) for preflight responses.
pub const CORS_MAX_AGE_SECS: u64 = 86_400;

/// Bounded wait for in-flight connections during shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// User-Agent sent upstream when the caller did not provide one.
pub const USER_AGENT: &str = concat!("Mozilla/5.0 (compatible; corsgate/", env!("CARGO_PKG_VERSION"), ")");
