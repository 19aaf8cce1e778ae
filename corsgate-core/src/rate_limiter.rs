//! Sliding-window rate limiting for corsgate.
//!
//! # Algorithm
//!
//! Each client key owns the timestamps of its admitted requests:
//! - Timestamps older than the window are expired and never counted
//! - If the live count is below the limit, `now` is appended and the request admitted
//! - Otherwise the request is rejected and nothing is recorded, so a client
//!   hammering a closed window does not extend its own lockout
//!
//! # Memory Management
//!
//! A background sweep (every `min(window, 60s)`) drops keys whose timestamps
//! have all expired. Expired timestamps of live keys are pruned on access.
//!
//! # Thread Safety
//!
//! Uses `tokio::sync::Mutex` for async-friendly locking that won't block
//! the Tokio thread pool. Clones share state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::defaults;

/// Per-key admitted-request timestamps, oldest first.
type RateRecords = HashMap<String, VecDeque<Instant>>;

/// Shared sliding-window limiter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateRecords>>,
    max_requests: u32,
    window: Duration,
}

/// Point-in-time view of limiter memory use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RateLimiterStats {
    /// Keys currently tracked.
    pub active_keys: usize,
    /// Timestamps held across all keys (including not yet swept ones).
    pub tracked_timestamps: usize,
}

impl RateLimiter {
    /// Creates a limiter admitting `max_requests` per `window` (0 = unlimited).
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    /// Returns `true` if rate limiting is active.
    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }

    /// Admits or rejects one request for `key`.
    ///
    /// Rejections leave the record untouched.
    pub async fn try_admit(&self, key: &str) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let now = Instant::now();
        let mut records = self.inner.lock().await;

        let admitted = match records.get_mut(key) {
            Some(timestamps) => {
                prune(timestamps, now, self.window);
                if timestamps.len() < self.max_requests as usize {
                    timestamps.push_back(now);
                    true
                } else {
                    false
                }
            }
            None => {
                records.insert(key.to_string(), VecDeque::from([now]));
                true
            }
        };

        if !admitted {
            debug!(client = %key, limit = self.max_requests, "Rate limit reached");
        }
        admitted
    }

    /// Drops every key whose timestamps have all expired.
    ///
    /// Returns the number of keys removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut records = self.inner.lock().await;
        let before = records.len();

        records.retain(|_, timestamps| {
            prune(timestamps, now, self.window);
            !timestamps.is_empty()
        });

        let removed = before - records.len();
        if removed > 0 {
            debug!(
                removed_entries = removed,
                remaining_entries = records.len(),
                "Rate limiter sweep completed"
            );
        }
        removed
    }

    /// Returns key and timestamp counts.
    pub async fn stats(&self) -> RateLimiterStats {
        let records = self.inner.lock().await;
        RateLimiterStats {
            active_keys: records.len(),
            tracked_timestamps: records.values().map(VecDeque::len).sum(),
        }
    }

    /// Interval between background sweeps.
    pub fn sweep_interval(&self) -> Duration {
        self.window.min(defaults::RATE_LIMIT_SWEEP_MAX)
    }

    /// `Retry-After` seconds for a rejected client: the window, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let millis = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);
        millis.div_ceil(1_000).max(1)
    }

    /// Starts the periodic sweep. It stops when `token` is cancelled.
    pub fn spawn_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        let limiter = self.clone();
        let period = self.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        limiter.sweep().await;
                    }
                }
            }
        })
    }
}

/// Removes timestamps that fell out of the window.
fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.duration_since(*oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
