//! Short-TTL cache of successful GET responses.
//!
//! Entries are keyed by [`fingerprint`], a SHA-256 digest over the request
//! method, resolved target URL and the content-negotiation headers that can
//! change the upstream answer. Stored headers never include CORS headers;
//! those are rebuilt for the current caller on every hit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::defaults;

/// A stored upstream response.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub inserted_at: Instant,
}

/// Computes the cache key for a request.
///
/// Each field is length-prefixed before hashing so that no two distinct
/// tuples produce the same byte stream.
pub fn fingerprint(
    method: &Method,
    url: &str,
    user_agent: Option<&str>,
    accept: Option<&str>,
    accept_language: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    for field in [
        Some(method.as_str()),
        Some(url),
        user_agent,
        accept,
        accept_language,
    ] {
        match field {
            Some(value) => {
                hasher.update([1u8]);
                hasher.update((value.len() as u64).to_be_bytes());
                hasher.update(value.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }
    hex::encode(hasher.finalize())
}

/// In-memory response cache with a fixed TTL.
#[derive(Clone, Debug)]
pub struct ResponseCache {
    entries: Arc<Mutex<HashMap<String, CachedResponse>>>,
    ttl: Duration,
}

impl ResponseCache {
    /// Creates a cache. A zero TTL disables it.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a copy of a fresh entry.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        if !self.is_enabled() {
            return None;
        }
        let now = Instant::now();
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| now.duration_since(entry.inserted_at) < self.ttl)
            .cloned()
    }

    /// Stores a response if it is cacheable (GET with status below 400).
    ///
    /// Returns `true` when stored.
    pub fn insert(
        &self,
        key: String,
        method: &Method,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    ) -> bool {
        if !self.is_enabled() || method != Method::GET || status.as_u16() >= 400 {
            return false;
        }
        let entry = CachedResponse {
            status,
            headers,
            body,
            inserted_at: Instant::now(),
        };
        self.entries.lock().insert(key, entry);
        true
    }

    /// Evicts expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.inserted_at) < self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed_entries = removed, remaining_entries = entries.len(), "Cache sweep completed");
        }
        removed
    }

    /// Removes every entry and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interval between sweeps: half the TTL, at most 30 seconds.
    pub fn sweep_interval(&self) -> Duration {
        (self.ttl / 2)
            .min(defaults::CACHE_SWEEP_MAX)
            .max(Duration::from_millis(1))
    }

    /// Starts the periodic purge. Does nothing when the cache is disabled.
    pub fn spawn_sweeper(&self, token: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }
        let cache = self.clone();
        let period = self.sweep_interval();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.purge_expired();
                    }
                }
            }
        }))
    }
}
