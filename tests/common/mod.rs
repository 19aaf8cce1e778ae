//! Shared harness for integration tests: an in-memory upstream and helpers
//! that drive [`Gateway::handle`] directly.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use tokio::sync::Notify;

use corsgate_core::error::{ConfigError, Result};
use corsgate_core::proxy::{OutboundRequest, UpstreamResponse};
use corsgate_core::{ConfigSource, Gateway, GatewayConfig, Upstream};

/// Upstream answering `200 OK` with a fixed body, optionally held on a gate.
pub struct TestUpstream {
    body: &'static str,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl TestUpstream {
    pub fn new(body: &'static str) -> Self {
        Self {
            body,
            delay: None,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for TestUpstream {
    async fn send(&self, _request: OutboundRequest) -> Result<UpstreamResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        Ok(UpstreamResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(self.body.as_bytes()),
        })
    }
}

/// Source returning the same configuration on every load.
pub struct FixedSource(pub GatewayConfig);

impl ConfigSource for FixedSource {
    fn load(&self) -> std::result::Result<GatewayConfig, ConfigError> {
        Ok(self.0.clone())
    }
}

pub struct Harness {
    pub gateway: Arc<Gateway>,
    pub upstream: Arc<TestUpstream>,
}

impl Harness {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_upstream(config, TestUpstream::new("hello from upstream"))
    }

    pub fn with_upstream(config: GatewayConfig, upstream: TestUpstream) -> Self {
        let upstream = Arc::new(upstream);
        let source = Arc::new(FixedSource(config.clone()));
        let gateway = Gateway::new(config, source, upstream.clone()).expect("valid config");
        Self {
            gateway: Arc::new(gateway),
            upstream,
        }
    }

    /// Sends a bodyless request from `ip`.
    pub async fn send(&self, method: Method, uri: &str, ip: &str) -> Response<Full<Bytes>> {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Empty::<Bytes>::new())
            .unwrap();
        self.gateway.handle(req, peer(ip)).await
    }

    pub async fn get(&self, uri: &str, ip: &str) -> Response<Full<Bytes>> {
        self.send(Method::GET, uri, ip).await
    }
}

pub fn peer(ip: &str) -> SocketAddr {
    SocketAddr::new(ip.parse().unwrap(), 50_000)
}

pub async fn body_text(response: Response<Full<Bytes>>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
