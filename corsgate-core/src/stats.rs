//! Request statistics.
//!
//! All counters sit behind one mutex; every [`StatsCollector::record`] is a
//! single critical section, so concurrent requests never lose updates.
//! The hourly ring survives [`StatsCollector::reset`]; everything else is zeroed.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::defaults;

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    latencies_ms: VecDeque<u64>,
    latency_sum_ms: u64,
    domains: HashMap<String, u64>,
    ips: HashMap<String, u64>,
    status_codes: BTreeMap<u16, u64>,
    hourly: VecDeque<u64>,
    last_snapshot_total: u64,
}

/// One row of a top-N table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CountEntry {
    pub name: String,
    pub count: u64,
}

/// Read view returned by the stats route.
#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub average_response_time_ms: f64,
    pub top_domains: Vec<CountEntry>,
    pub top_ips: Vec<CountEntry>,
    pub status_codes: BTreeMap<u16, u64>,
    /// Requests per hour, oldest first.
    pub hourly_requests: Vec<u64>,
}

/// Latency distribution over the sample ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub average_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

/// Shared statistics collector.
#[derive(Clone, Debug, Default)]
pub struct StatsCollector {
    counters: Arc<Mutex<Counters>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one request.
    pub fn record(&self, ip: &str, domain: Option<&str>, status: u16, latency: Duration, success: bool) {
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let mut c = self.counters.lock();

        c.total += 1;
        if success {
            c.successful += 1;
        } else {
            c.failed += 1;
        }

        c.latencies_ms.push_back(latency_ms);
        c.latency_sum_ms = c.latency_sum_ms.saturating_add(latency_ms);
        if c.latencies_ms.len() > defaults::LATENCY_SAMPLES
            && let Some(evicted) = c.latencies_ms.pop_front()
        {
            c.latency_sum_ms = c.latency_sum_ms.saturating_sub(evicted);
        }

        if let Some(domain) = domain.filter(|d| !d.is_empty()) {
            *c.domains.entry(domain.to_string()).or_default() += 1;
        }
        *c.ips.entry(ip.to_string()).or_default() += 1;
        *c.status_codes.entry(status).or_default() += 1;

        if c.domains.len() > 2 * defaults::STATS_TABLE_CAPACITY {
            prune(&mut c.domains, defaults::STATS_TABLE_CAPACITY);
        }
        if c.ips.len() > 2 * defaults::STATS_TABLE_CAPACITY {
            prune(&mut c.ips, defaults::STATS_TABLE_CAPACITY);
        }
    }

    /// Appends the requests seen since the previous snapshot to the hourly ring.
    pub fn hourly_snapshot(&self) {
        let mut c = self.counters.lock();
        let delta = c.total.saturating_sub(c.last_snapshot_total);
        c.hourly.push_back(delta);
        while c.hourly.len() > defaults::HOURLY_SLOTS {
            c.hourly.pop_front();
        }
        c.last_snapshot_total = c.total;
        prune(&mut c.domains, defaults::STATS_TABLE_CAPACITY);
        prune(&mut c.ips, defaults::STATS_TABLE_CAPACITY);
    }

    /// Returns the read view with top tables sorted descending, truncated to 10.
    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.counters.lock();
        let success_rate = if c.total == 0 {
            0.0
        } else {
            c.successful as f64 * 100.0 / c.total as f64
        };

        StatsSnapshot {
            total_requests: c.total,
            successful_requests: c.successful,
            failed_requests: c.failed,
            success_rate,
            average_response_time_ms: average(c.latency_sum_ms, c.latencies_ms.len()),
            top_domains: top_n(&c.domains),
            top_ips: top_n(&c.ips),
            status_codes: c.status_codes.clone(),
            hourly_requests: c.hourly.iter().copied().collect(),
        }
    }

    /// Latency distribution of the current sample ring.
    pub fn latency_summary(&self) -> LatencySummary {
        let (mut samples, sum) = {
            let c = self.counters.lock();
            (c.latencies_ms.iter().copied().collect::<Vec<_>>(), c.latency_sum_ms)
        };
        if samples.is_empty() {
            return LatencySummary::default();
        }
        samples.sort_unstable();

        LatencySummary {
            samples: samples.len(),
            average_ms: average(sum, samples.len()),
            min_ms: samples[0],
            max_ms: samples[samples.len() - 1],
            p50_ms: percentile(&samples, 50),
            p95_ms: percentile(&samples, 95),
        }
    }

    /// Zeroes live counters. The hourly ring is kept.
    pub fn reset(&self) {
        let mut c = self.counters.lock();
        let hourly = std::mem::take(&mut c.hourly);
        *c = Counters {
            hourly,
            ..Counters::default()
        };
        debug!("Statistics reset");
    }

    /// Takes an hourly snapshot every `interval` until `token` is cancelled.
    pub fn spawn_hourly(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let stats = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => stats.hourly_snapshot(),
                }
            }
        })
    }
}

fn average(sum: u64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// Nearest-rank percentile of sorted, non-empty samples.
fn percentile(sorted: &[u64], pct: usize) -> u64 {
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

/// Keeps the `keep` most frequent entries.
fn prune(table: &mut HashMap<String, u64>, keep: usize) {
    if table.len() <= keep {
        return;
    }
    let mut rows: Vec<(String, u64)> = table.drain().collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows.truncate(keep);
    table.extend(rows);
}

fn top_n(table: &HashMap<String, u64>) -> Vec<CountEntry> {
    let mut rows: Vec<CountEntry> = table
        .iter()
        .map(|(name, count)| CountEntry {
            name: name.clone(),
            count: *count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    rows.truncate(defaults::TOP_N);
    rows
}
