//! Per-client and global in-flight request caps.
//!
//! Both counters live under one mutex, so `acquire` and `release` are
//! linearized and the global count always equals the sum of per-key counts.
//! Request handlers hold a [`ConcurrencyPermit`], which releases its slot
//! when dropped. That covers every exit path, including early returns,
//! upstream errors, timeouts and cancelled futures.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Default)]
struct Slots {
    per_key: HashMap<String, usize>,
    total: usize,
}

/// Shared in-flight request counter.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    slots: Arc<Mutex<Slots>>,
    per_key_limit: usize,
    total_limit: usize,
}

/// Point-in-time view of in-flight requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConcurrencyStats {
    /// Requests currently in flight across all clients.
    pub in_flight: usize,
    /// Clients with at least one request in flight.
    pub active_keys: usize,
}

impl ConcurrencyLimiter {
    /// Creates a limiter. A limit of 0 disables that cap.
    pub fn new(per_key_limit: usize, total_limit: usize) -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots::default())),
            per_key_limit,
            total_limit,
        }
    }

    /// Takes a slot for `key` if both caps allow it.
    ///
    /// Returns `false` without changing anything when either cap is reached.
    pub fn acquire(&self, key: &str) -> bool {
        let mut slots = self.slots.lock();

        if self.total_limit > 0 && slots.total >= self.total_limit {
            debug!(client = %key, in_flight = slots.total, "Global concurrency limit reached");
            return false;
        }

        let current = slots.per_key.get(key).copied().unwrap_or(0);
        if self.per_key_limit > 0 && current >= self.per_key_limit {
            debug!(client = %key, in_flight = current, "Per-client concurrency limit reached");
            return false;
        }

        slots.per_key.insert(key.to_string(), current + 1);
        slots.total += 1;
        true
    }

    /// Returns a slot for `key`. Counters never go below zero.
    pub fn release(&self, key: &str) {
        let mut slots = self.slots.lock();

        let Some(count) = slots.per_key.get_mut(key) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            slots.per_key.remove(key);
        }
        slots.total = slots.total.saturating_sub(1);
    }

    /// Acquires a slot wrapped in a guard that releases it on drop.
    pub fn try_acquire_permit(&self, key: &str) -> Option<ConcurrencyPermit> {
        self.acquire(key).then(|| ConcurrencyPermit {
            limiter: self.clone(),
            key: key.to_string(),
        })
    }

    /// Returns current counts.
    pub fn stats(&self) -> ConcurrencyStats {
        let slots = self.slots.lock();
        ConcurrencyStats {
            in_flight: slots.total,
            active_keys: slots.per_key.len(),
        }
    }

    /// In-flight count for a single client.
    pub fn in_flight(&self, key: &str) -> usize {
        self.slots.lock().per_key.get(key).copied().unwrap_or(0)
    }
}

/// A held concurrency slot.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    limiter: ConcurrencyLimiter,
    key: String,
}

impl ConcurrencyPermit {
    /// Admission key this permit was issued for.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.limiter.release(&self.key);
    }
}
