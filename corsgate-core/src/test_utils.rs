//! Test utilities for corsgate.
//!
//! This module provides a configuration builder and an in-memory upstream
//! shared across unit tests. It is only compiled when running tests (`#[cfg(test)]`).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::StatusCode;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{ConfigError, GatewayError, Result};
use crate::proxy::{OutboundRequest, Upstream, UpstreamResponse};
use crate::types::{ConfigSource, GatewayConfig};

/// Builder over [`GatewayConfig`] with test-friendly setters.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    config: GatewayConfig,
}

fn owned(values: Vec<&str>) -> Vec<String> {
    values.into_iter().map(String::from).collect()
}

impl TestConfig {
    /// Create a new test configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }

    pub fn with_allowed_origins(mut self, origins: Vec<&str>) -> Self {
        self.config.allowed_origins = owned(origins);
        self
    }

    pub fn with_blocked_ips(mut self, ips: Vec<&str>) -> Self {
        self.config.blocked_ips = owned(ips);
        self
    }

    pub fn with_blocked_domains(mut self, domains: Vec<&str>) -> Self {
        self.config.blocked_domains = owned(domains);
        self
    }

    pub fn with_allowed_domains(mut self, domains: Vec<&str>) -> Self {
        self.config.allowed_domains = owned(domains);
        self
    }

    pub fn with_trusted_proxies(mut self, proxies: Vec<&str>) -> Self {
        self.config.trusted_proxy_ips = owned(proxies);
        self
    }

    /// Configure rate limiting.
    pub fn with_rate_limit(mut self, max_requests: u32, window_secs: u64) -> Self {
        self.config.rate_limit = max_requests;
        self.config.rate_limit_window = Duration::from_secs(window_secs);
        self
    }

    pub fn with_concurrency(mut self, per_client: usize, total: usize) -> Self {
        self.config.concurrent_limit = per_client;
        self.config.total_concurrent_limit = total;
        self
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.config.api_key = Some(key.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_max_body_size(mut self, max: usize) -> Self {
        self.config.max_body_size = max;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.config.enable_logging = enabled;
        self
    }

    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.config.enable_stats = enabled;
        self
    }
}

/// [`ConfigSource`] whose next answer can be swapped by the test.
#[derive(Debug)]
pub struct StaticSource {
    next: Mutex<std::result::Result<GatewayConfig, ConfigError>>,
}

impl StaticSource {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            next: Mutex::new(Ok(config)),
        }
    }

    pub fn set(&self, next: std::result::Result<GatewayConfig, ConfigError>) {
        *self.next.lock() = next;
    }
}

impl ConfigSource for StaticSource {
    fn load(&self) -> std::result::Result<GatewayConfig, ConfigError> {
        self.next.lock().clone()
    }
}

/// In-memory [`Upstream`] that counts calls and records the last request.
#[derive(Debug)]
pub struct MockUpstream {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    delay: Option<Duration>,
    fail: bool,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<OutboundRequest>>,
}

impl MockUpstream {
    /// Answers `200 OK` with `body`.
    pub fn ok(body: &'static str) -> Self {
        Self::with_status(StatusCode::OK, body)
    }

    pub fn with_status(status: StatusCode, body: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        Self {
            status,
            headers,
            body: Bytes::from_static(body.as_bytes()),
            delay: None,
            fail: false,
            gate: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Fails every call with a connection error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ok("")
        }
    }

    /// Sleeps before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Holds every call until `gate` is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.append(name, HeaderValue::from_static(value));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<OutboundRequest> {
        self.last_request.lock().clone()
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(GatewayError::UpstreamConnectionFailed(
                "connection refused".into(),
            ));
        }

        Ok(UpstreamResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TestConfig::new().build();
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn test_builder_methods() {
        let config = TestConfig::new()
            .with_rate_limit(50, 30)
            .with_blocked_ips(vec!["1.2.3.4"])
            .with_blocked_domains(vec!["evil.example"])
            .with_api_key("k")
            .build();

        assert_eq!(config.rate_limit, 50);
        assert_eq!(config.rate_limit_window, Duration::from_secs(30));
        assert_eq!(config.blocked_ips, vec!["1.2.3.4"]);
        assert_eq!(config.blocked_domains, vec!["evil.example"]);
        assert_eq!(config.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_static_source_swaps() {
        let source = StaticSource::new(GatewayConfig::default());
        assert!(source.load().is_ok());
        source.set(Err(ConfigError::single("PORT", "bad")));
        assert!(source.load().is_err());
    }
}
