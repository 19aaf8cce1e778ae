//! Request orchestration.
//!
//! [`Gateway`] owns every piece of process-local state and routes each
//! request down one of four paths:
//!
//! - preflight: answered from the CORS policy alone
//! - `/health`: unauthenticated liveness
//! - `/_api/*`: the management API
//! - everything else: the proxy pipeline
//!
//! # Proxy pipeline
//!
//! 1. Decode the target from the path and check its length
//! 2. Rate limit on the client key
//! 3. Take a concurrency permit
//! 4. Validate the target (blocklists, allowlists, SSRF)
//! 5. Serve from cache (GET only)
//! 6. Read and prepare the body, call the target under the timeout
//! 7. Build the response and rebuild CORS headers
//! 8. Record stats and log, then release the permit
//!
//! Every exit, including gate failures, goes through step 8.
//!
//! # Reload
//!
//! The rate limiter, concurrency limiter and logger are rebuilt from scratch
//! on reload. Rate history and in-flight accounting of the previous
//! generation are discarded. Cache and stats persist.

use std::sync::Arc;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::http::request::Parts;
use hyper::{Method, Request, Response, StatusCode, Uri};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{self, ResponseCache};
use crate::concurrency::{ConcurrencyLimiter, ConcurrencyPermit, ConcurrencyStats};
use crate::error::{GatewayError, Result};
use crate::logger::{self, LogRecord, RequestLogger};
use crate::proxy::{self, OutboundRequest, ProxyExecutor, Upstream};
use crate::rate_limiter::{RateLimiter, RateLimiterStats};
use crate::response::{GatewayResponse, empty_response, error_response, json_response};
use crate::security::{self, Denial};
use crate::stats::{LatencySummary, StatsCollector, StatsSnapshot};
use crate::types::{ConfigSource, GatewayConfig};
use crate::{auth, client_ip, cors, defaults, headers, management};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unauthenticated liveness path.
pub const HEALTH_PATH: &str = "/health";

const USAGE: &str = "missing target URL, use /<url> (for example /https://example.com/data.json)";

const PROXIED_BY: &str = "corsgate";

/// State rebuilt on every configuration change.
#[derive(Debug)]
pub struct Components {
    pub config: Arc<GatewayConfig>,
    pub rate_limiter: RateLimiter,
    pub concurrency: ConcurrencyLimiter,
    pub logger: RequestLogger,
    timers: CancellationToken,
}

impl Components {
    /// Builds the components for `config` and starts their timers.
    ///
    /// Must be called from within a Tokio runtime.
    fn start(config: GatewayConfig, parent: &CancellationToken) -> Result<Self> {
        let timers = parent.child_token();
        let rate_limiter = RateLimiter::new(config.rate_limit, config.rate_limit_window);
        let concurrency =
            ConcurrencyLimiter::new(config.concurrent_limit, config.total_concurrent_limit);
        let logger = RequestLogger::from_config(&config)?;

        if rate_limiter.is_enabled() {
            rate_limiter.spawn_sweeper(timers.clone());
        }
        if logger.is_enabled() {
            logger.spawn_flusher(defaults::LOG_FLUSH_INTERVAL, timers.clone());
        }

        Ok(Self {
            config: Arc::new(config),
            rate_limiter,
            concurrency,
            logger,
            timers,
        })
    }

    /// Stops the timers and flushes pending log records.
    fn stop(&self) {
        self.timers.cancel();
        self.logger.flush();
    }
}

/// Liveness answer.
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

/// Performance view over the latency ring and live admission state.
#[derive(Clone, Debug, Serialize)]
pub struct PerformanceReport {
    pub latency: LatencySummary,
    pub concurrency: ConcurrencyStats,
    pub rate_limiter: RateLimiterStats,
    pub cache_entries: usize,
    pub uptime_secs: u64,
}

/// The gateway: configuration, admission state, cache, stats and upstream.
pub struct Gateway {
    components: RwLock<Arc<Components>>,
    cache: ResponseCache,
    stats: StatsCollector,
    source: Arc<dyn ConfigSource>,
    executor: ProxyExecutor,
    shutdown: CancellationToken,
    started_at: Instant,
}

/// What the pipeline learned, kept for stats and logging.
#[derive(Default)]
struct ProxyTrace {
    target: Option<Url>,
}

impl Gateway {
    /// Creates a gateway and starts its background timers.
    ///
    /// `config` is validated first. Must be called from within a Tokio runtime.
    pub fn new(
        config: GatewayConfig,
        source: Arc<dyn ConfigSource>,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let cache = ResponseCache::new(config.cache_ttl);
        let stats = StatsCollector::new();
        let components = Components::start(config, &shutdown)?;
        cache.spawn_sweeper(shutdown.child_token());
        stats.spawn_hourly(defaults::HOURLY_INTERVAL, shutdown.child_token());

        Ok(Self {
            components: RwLock::new(Arc::new(components)),
            cache,
            stats,
            source,
            executor: ProxyExecutor::new(upstream),
            shutdown,
            started_at: Instant::now(),
        })
    }

    /// Current component generation.
    pub fn components(&self) -> Arc<Components> {
        self.components.read().clone()
    }

    /// Active configuration.
    pub fn config(&self) -> Arc<GatewayConfig> {
        self.components().config.clone()
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Handles one request. Never fails: every error becomes a response.
    pub async fn handle<B>(&self, req: Request<B>, peer: SocketAddr) -> GatewayResponse
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let components = self.components();
        let config = components.config.as_ref();
        let origin = header_str(req.headers(), headers::ORIGIN).map(str::to_string);

        if cors::is_preflight(req.method(), req.headers()) {
            let status = cors::preflight_status(config, origin.as_deref());
            debug!(origin = origin.as_deref().unwrap_or("-"), status = status.as_u16(), "Preflight");
            let mut response = empty_response(status);
            cors::apply(
                &mut response,
                cors::cors_headers(config, origin.as_deref(), req.headers()),
            );
            return response;
        }

        let path = req.uri().path();
        if path == HEALTH_PATH {
            let mut response = json_response(StatusCode::OK, &self.health());
            cors::apply(
                &mut response,
                cors::cors_headers(config, origin.as_deref(), req.headers()),
            );
            return response;
        }

        if management::is_management_path(path) {
            let mut response = management::handle(
                self,
                config,
                req.method(),
                path,
                req.headers(),
                req.uri().query(),
            )
            .await;
            cors::apply(
                &mut response,
                cors::cors_headers(config, origin.as_deref(), req.headers()),
            );
            return response;
        }

        let client_ip =
            client_ip::resolve_client_ip(req.headers(), peer.ip(), &config.trusted_proxy_ips);
        self.proxy(&components, req, client_ip, origin).await
    }

    async fn proxy<B>(
        &self,
        components: &Components,
        req: Request<B>,
        client_ip: String,
        origin: Option<String>,
    ) -> GatewayResponse
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let started = Instant::now();
        let config = components.config.as_ref();
        let (parts, body) = req.into_parts();

        let mut trace = ProxyTrace::default();
        let mut permit: Option<ConcurrencyPermit> = None;
        let result = self
            .run_pipeline(
                components,
                &parts,
                body,
                &client_ip,
                origin.as_deref(),
                &mut trace,
                &mut permit,
            )
            .await;

        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                if err.is_server_error() {
                    warn!(client = %client_ip, error = %err, "Proxy request failed");
                } else {
                    debug!(client = %client_ip, error = %err, "Proxy request rejected");
                }
                error_response(&err, HeaderMap::new())
            }
        };

        cors::apply(
            &mut response,
            cors::cors_headers(config, origin.as_deref(), &parts.headers),
        );
        response.headers_mut().insert(
            HeaderName::from_static(headers::X_PROXIED_BY),
            HeaderValue::from_static(PROXIED_BY),
        );

        let latency = started.elapsed();
        let status = response.status().as_u16();
        let domain = trace.target.as_ref().and_then(Url::host_str);

        if config.enable_stats {
            self.stats
                .record(&client_ip, domain, status, latency, status < 400);
        }
        components.logger.log(LogRecord::new(
            parts.method.as_str(),
            parts.uri.path_and_query().map_or("/", |pq| pq.as_str()),
            trace.target.as_ref().map(Url::as_str),
            status,
            latency,
            header_str(&parts.headers, headers::USER_AGENT),
            &client_ip,
        ));

        drop(permit);
        response
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline<B>(
        &self,
        components: &Components,
        parts: &Parts,
        body: B,
        client_ip: &str,
        origin: Option<&str>,
        trace: &mut ProxyTrace,
        permit: &mut Option<ConcurrencyPermit>,
    ) -> Result<GatewayResponse>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let config = components.config.as_ref();

        let target = extract_target(&parts.uri);
        if target.is_empty() {
            return Err(GatewayError::InvalidRequest(USAGE.to_string()));
        }
        let length = target.chars().count();
        if length > config.max_url_length {
            return Err(GatewayError::Policy(Denial::UrlTooLong {
                length,
                max: config.max_url_length,
            }));
        }

        let provided_key = auth::extract_api_key(&parts.headers, parts.uri.query());
        let key = auth::client_key(config, provided_key.as_deref(), client_ip);

        if !components.rate_limiter.try_admit(&key).await {
            return Err(GatewayError::RateLimited {
                retry_after_secs: components.rate_limiter.retry_after_secs(),
                client: key,
            });
        }

        *permit = Some(components.concurrency.try_acquire_permit(&key).ok_or_else(|| {
            GatewayError::Overloaded {
                client: key.clone(),
                retry_after_secs: defaults::OVERLOAD_RETRY_AFTER_SECS,
            }
        })?);

        let mut url = security::validate(config, &target, client_ip, origin)
            .map_err(GatewayError::Policy)?;
        auth::strip_key_from_url(&mut url, config);
        trace.target = Some(url.clone());

        let cache_key = (parts.method == Method::GET && self.cache.is_enabled()).then(|| {
            cache::fingerprint(
                &parts.method,
                url.as_str(),
                header_str(&parts.headers, headers::USER_AGENT),
                header_str(&parts.headers, headers::ACCEPT),
                header_str(&parts.headers, headers::ACCEPT_LANGUAGE),
            )
        });
        if let Some(hit) = cache_key.as_deref().and_then(|k| self.cache.get(k)) {
            debug!(target_url = %logger::sanitize_url(url.as_str()), "Cache hit");
            return Ok(build_response(hit.status, hit.headers, hit.body, Some("HIT")));
        }

        let declared_length = header_str(&parts.headers, headers::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<usize>().ok());
        let body = read_body(body, config.max_body_size, declared_length).await?;
        let body = proxy::prepare_body(
            header_str(&parts.headers, headers::CONTENT_TYPE),
            body,
            config.max_body_size,
        )?;

        let request = OutboundRequest {
            method: parts.method.clone(),
            url,
            headers: proxy::build_outbound_headers(&parts.headers, config.api_key.as_deref()),
            body,
        };
        let upstream = self
            .executor
            .execute(request, config.timeout, &self.shutdown)
            .await?;

        let response_headers = proxy::filter_response_headers(&upstream.headers);
        let cache_state = cache_key.is_some().then_some("MISS");
        if let Some(key) = cache_key {
            self.cache.insert(
                key,
                &parts.method,
                upstream.status,
                response_headers.clone(),
                upstream.body.clone(),
            );
        }

        Ok(build_response(
            upstream.status,
            response_headers,
            upstream.body,
            cache_state,
        ))
    }

    /// Liveness answer.
    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.uptime_secs(),
        }
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Empties the response cache and returns how many entries were removed.
    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        info!(removed_entries = removed, "Response cache cleared");
        removed
    }

    pub async fn performance(&self) -> PerformanceReport {
        let components = self.components();
        PerformanceReport {
            latency: self.stats.latency_summary(),
            concurrency: components.concurrency.stats(),
            rate_limiter: components.rate_limiter.stats().await,
            cache_entries: self.cache.len(),
            uptime_secs: self.uptime_secs(),
        }
    }

    /// Reloads configuration from the source.
    ///
    /// The new configuration is validated before anything changes; on error
    /// the active configuration stays in place.
    pub fn reload_config(&self) -> Result<Arc<GatewayConfig>> {
        let config = self.source.load().inspect_err(|err| {
            warn!(error = %err, "Configuration reload rejected");
        })?;
        config.validate().inspect_err(|err| {
            warn!(error = %err, "Configuration reload rejected");
        })?;

        let next = Arc::new(Components::start(config, &self.shutdown)?);
        let previous = std::mem::replace(&mut *self.components.write(), next.clone());

        if previous.config.port != next.config.port {
            warn!(
                active_port = previous.config.port,
                configured_port = next.config.port,
                "PORT changed, restart required for it to take effect"
            );
        }
        if previous.config.cache_ttl != next.config.cache_ttl {
            warn!("CACHE_TTL changed, restart required for it to take effect");
        }
        previous.stop();

        info!("Configuration reloaded");
        Ok(next.config.clone())
    }

    /// Cancels in-flight upstream calls and timers, then flushes the log buffer.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.components().stop();
        info!("Gateway stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config())
            .field("cache_entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}

fn header_str<'a>(map: &'a HeaderMap, name: &str) -> Option<&'a str> {
    map.get(name).and_then(|v| v.to_str().ok())
}

fn build_response(
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    cache_state: Option<&'static str>,
) -> GatewayResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    if let Some(state) = cache_state {
        response.headers_mut().insert(
            HeaderName::from_static(headers::X_CACHE),
            HeaderValue::from_static(state),
        );
    }
    response
}

/// Reads the request body, enforcing `max` (0 = unlimited).
///
/// A declared `Content-Length` above the limit is rejected before reading.
async fn read_body<B>(body: B, max: usize, declared: Option<usize>) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    if max > 0
        && let Some(size) = declared
        && size > max
    {
        return Err(GatewayError::BodyTooLarge { size, max });
    }

    if max == 0 {
        return body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|err| {
                let err: BoxError = err.into();
                GatewayError::BodyReadError(err.to_string())
            });
    }

    match Limited::new(body, max).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        // exact size is unknown once the limit trips
        Err(err) if err.is::<LengthLimitError>() => Err(GatewayError::BodyTooLarge {
            size: max.saturating_add(1),
            max,
        }),
        Err(err) => Err(GatewayError::BodyReadError(err.to_string())),
    }
}

/// Target URL carried in the request path, with the inbound query appended.
fn extract_target(uri: &Uri) -> String {
    let path = uri.path();
    let mut target = url_decode(path.strip_prefix('/').unwrap_or(path));

    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        target.push(if target.contains('?') { '&' } else { '?' });
        target.push_str(query);
    }
    target.trim().to_string()
}

/// Decode URL-encoded string (percent-encoding).
/// Invalid escapes are kept as-is; invalid UTF-8 becomes U+FFFD.
fn url_decode(input: &str) -> String {
    let mut bytes = Vec::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() == 2
                && let Ok(byte) = u8::from_str_radix(&hex, 16)
            {
                bytes.push(byte);
                continue;
            }
            bytes.push(b'%');
            bytes.extend_from_slice(hex.as_bytes());
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockUpstream, StaticSource, TestConfig};
    use http_body_util::Empty;
    use std::time::Duration;

    const PEER: &str = "203.0.113.50:40000";

    fn gateway(config: GatewayConfig, upstream: Arc<MockUpstream>) -> Gateway {
        let source = Arc::new(StaticSource::new(config.clone()));
        Gateway::new(config, source, upstream).unwrap()
    }

    fn get(uri: &str) -> Request<Empty<Bytes>> {
        Request::builder().uri(uri).body(Empty::new()).unwrap()
    }

    async fn body_text(response: GatewayResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // ===========================================
    // Target extraction
    // ===========================================

    #[test]
    fn test_extract_target() {
        let uri: Uri = "/https://example.com/a?b=1".parse().unwrap();
        assert_eq!(extract_target(&uri), "https://example.com/a?b=1");

        let uri: Uri = "/https%3A%2F%2Fexample.com%2Fa%3Fx%3D1?y=2".parse().unwrap();
        assert_eq!(extract_target(&uri), "https://example.com/a?x=1&y=2");

        let uri: Uri = "/".parse().unwrap();
        assert_eq!(extract_target(&uri), "");
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("a%20b"), "a b");
        assert_eq!(url_decode("%zz"), "%zz");
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("100%"), "100%");
    }

    // ===========================================
    // Routing
    // ===========================================

    #[tokio::test]
    async fn test_preflight_bypasses_pipeline() {
        let upstream = Arc::new(MockUpstream::ok("x"));
        let gw = gateway(TestConfig::new().with_rate_limit(1, 60).build(), upstream.clone());

        for _ in 0..3 {
            let req = Request::builder()
                .method(Method::OPTIONS)
                .uri("/https://example.com/")
                .header("origin", "https://app.example")
                .header("access-control-request-method", "POST")
                .body(Empty::<Bytes>::new())
                .unwrap();
            let response = gw.handle(req, PEER.parse().unwrap()).await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
            assert_eq!(response.headers()["access-control-allow-origin"], "*");
        }
        assert_eq!(upstream.calls(), 0);
        assert_eq!(gw.stats_snapshot().total_requests, 0);
    }

    #[tokio::test]
    async fn test_health_route() {
        let gw = gateway(
            TestConfig::new().with_api_key("k").build(),
            Arc::new(MockUpstream::ok("x")),
        );
        let response = gw.handle(get("/health"), PEER.parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn test_root_without_target() {
        let upstream = Arc::new(MockUpstream::ok("x"));
        let gw = gateway(TestConfig::new().build(), upstream.clone());

        let response = gw.handle(get("/"), PEER.parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("missing target URL"));
        assert_eq!(upstream.calls(), 0);
    }

    // ===========================================
    // Proxy pipeline
    // ===========================================

    #[tokio::test]
    async fn test_proxy_success() {
        let upstream = Arc::new(
            MockUpstream::ok("payload")
                .with_header("access-control-allow-origin", "https://upstream.example")
                .with_header("connection", "close"),
        );
        let gw = gateway(TestConfig::new().build(), upstream.clone());

        let response = gw
            .handle(get("/https://example.com/data?x=1"), PEER.parse().unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(response.headers()["x-proxied-by"], "corsgate");
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert!(!response.headers().contains_key("connection"));
        assert_eq!(body_text(response).await, "payload");

        let sent = upstream.last_request().unwrap();
        assert_eq!(sent.url.as_str(), "https://example.com/data?x=1");
        assert_eq!(sent.method, Method::GET);

        let snap = gw.stats_snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.top_domains[0].name, "example.com");
        assert_eq!(snap.top_ips[0].name, "203.0.113.50");
    }

    #[tokio::test]
    async fn test_cache_hit_recomputes_cors() {
        let upstream = Arc::new(MockUpstream::ok("cached"));
        let config = TestConfig::new()
            .with_allowed_origins(vec!["https://a.example", "https://b.example"])
            .build();
        let gw = gateway(config, upstream.clone());

        let first = Request::builder()
            .uri("/https://example.com/x")
            .header("origin", "https://a.example")
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = gw.handle(first, PEER.parse().unwrap()).await;
        assert_eq!(response.headers()["x-cache"], "MISS");

        let second = Request::builder()
            .uri("/https://example.com/x")
            .header("origin", "https://b.example")
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = gw.handle(second, PEER.parse().unwrap()).await;
        assert_eq!(response.headers()["x-cache"], "HIT");
        assert_eq!(response.headers()["access-control-allow-origin"], "https://b.example");
        assert_eq!(body_text(response).await, "cached");
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_post_not_cached() {
        let upstream = Arc::new(MockUpstream::ok("ok"));
        let gw = gateway(TestConfig::new().build(), upstream.clone());

        for _ in 0..2 {
            let req = Request::builder()
                .method(Method::POST)
                .uri("/https://example.com/submit")
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from_static(b"{ \"a\": 1 }")))
                .unwrap();
            let response = gw.handle(req, PEER.parse().unwrap()).await;
            assert!(!response.headers().contains_key("x-cache"));
        }
        assert_eq!(upstream.calls(), 2);
        assert_eq!(upstream.last_request().unwrap().body, Bytes::from_static(b"{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let upstream = Arc::new(MockUpstream::ok("ok"));
        let gw = gateway(TestConfig::new().with_max_body_size(8).build(), upstream.clone());

        let req = Request::builder()
            .method(Method::POST)
            .uri("/https://example.com/upload")
            .body(Full::new(Bytes::from_static(b"0123456789abcdef")))
            .unwrap();
        let response = gw.handle(req, PEER.parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(upstream.calls(), 0);
        assert_eq!(gw.components().concurrency.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_declared_length_rejected_early() {
        let err = read_body(Empty::<Bytes>::new(), 10, Some(11)).await.unwrap_err();
        assert!(matches!(err, GatewayError::BodyTooLarge { size: 11, max: 10 }));
    }

    #[tokio::test]
    async fn test_gateway_key_not_forwarded() {
        let upstream = Arc::new(MockUpstream::ok("ok"));
        let gw = gateway(TestConfig::new().with_api_key("secret123").build(), upstream.clone());

        let req = Request::builder()
            .uri("/https://example.com/a?key=secret123&q=1")
            .header("x-api-key", "secret123")
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = gw.handle(req, PEER.parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let sent = upstream.last_request().unwrap();
        assert_eq!(sent.url.as_str(), "https://example.com/a?q=1");
        assert!(!sent.headers.contains_key("x-api-key"));
    }

    #[tokio::test]
    async fn test_target_query_forwarded_verbatim() {
        let upstream = Arc::new(MockUpstream::ok("ok"));
        let gw = gateway(TestConfig::new().with_api_key("secret123").build(), upstream.clone());

        let response = gw
            .handle(get("/https://example.com/a?flag&q=a%20b&p=c%2Fd"), PEER.parse().unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let sent = upstream.last_request().unwrap();
        assert_eq!(sent.url.as_str(), "https://example.com/a?flag&q=a%20b&p=c%2Fd");
    }

    #[tokio::test]
    async fn test_upstream_failure_releases_permit() {
        let upstream = Arc::new(MockUpstream::failing());
        let gw = gateway(TestConfig::new().with_concurrency(1, 1).build(), upstream);

        for _ in 0..3 {
            let response = gw.handle(get("/https://example.com/"), PEER.parse().unwrap()).await;
            assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        }
        assert_eq!(gw.components().concurrency.stats().in_flight, 0);
        assert_eq!(gw.stats_snapshot().failed_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_504() {
        let upstream = Arc::new(MockUpstream::ok("slow").with_delay(Duration::from_secs(120)));
        let gw = gateway(
            TestConfig::new().with_timeout(Duration::from_secs(5)).build(),
            upstream,
        );

        let response = gw.handle(get("/https://example.com/"), PEER.parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(gw.components().concurrency.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_stats_disabled() {
        let gw = gateway(
            TestConfig::new().with_stats(false).build(),
            Arc::new(MockUpstream::ok("x")),
        );
        gw.handle(get("/https://example.com/"), PEER.parse().unwrap()).await;
        assert_eq!(gw.stats_snapshot().total_requests, 0);
    }

    // ===========================================
    // Reload and shutdown
    // ===========================================

    #[tokio::test]
    async fn test_reload_swaps_components() {
        let config = TestConfig::new().with_rate_limit(1, 60).build();
        let source = Arc::new(StaticSource::new(config.clone()));
        let gw = Gateway::new(config, source.clone(), Arc::new(MockUpstream::ok("x"))).unwrap();

        assert_eq!(gw.handle(get("/https://example.com/"), PEER.parse().unwrap()).await.status(), StatusCode::OK);
        assert_eq!(
            gw.handle(get("/https://example.com/"), PEER.parse().unwrap()).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        source.set(Ok(TestConfig::new().with_rate_limit(5, 60).build()));
        let active = gw.reload_config().unwrap();
        assert_eq!(active.rate_limit, 5);

        // Rate history was discarded with the old limiter
        assert_eq!(gw.handle(get("/https://example.com/"), PEER.parse().unwrap()).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reload_rejects_invalid_config() {
        let config = TestConfig::new().build();
        let source = Arc::new(StaticSource::new(config.clone()));
        let gw = Gateway::new(config, source.clone(), Arc::new(MockUpstream::ok("x"))).unwrap();

        let mut bad = TestConfig::new().with_rate_limit(7, 60).build();
        bad.timeout = Duration::ZERO;
        source.set(Ok(bad));

        let err = gw.reload_config().unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        assert_eq!(gw.config().rate_limit, 100);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let mut config = TestConfig::new().build();
        config.port = 0;
        let source = Arc::new(StaticSource::new(config.clone()));
        assert!(Gateway::new(config, source, Arc::new(MockUpstream::ok("x"))).is_err());
    }

    #[tokio::test]
    async fn test_failed_start_leaves_no_background_tasks() {
        let mut config = TestConfig::new().build();
        config.log_webhook = Some("not a url".into());
        let source = Arc::new(StaticSource::new(config.clone()));

        let err = Gateway::new(config, source, Arc::new(MockUpstream::ok("x"))).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        tokio::task::yield_now().await;
        assert_eq!(tokio::runtime::Handle::current().metrics().num_alive_tasks(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let upstream = Arc::new(MockUpstream::ok("x").with_gate(gate));
        let gw = Arc::new(gateway(TestConfig::new().build(), upstream.clone()));

        let handle = {
            let gw = gw.clone();
            tokio::spawn(async move { gw.handle(get("/https://example.com/"), PEER.parse().unwrap()).await })
        };
        while upstream.calls() == 0 {
            tokio::task::yield_now().await;
        }

        gw.shutdown();
        let response = handle.await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(gw.is_shutting_down());
    }
}
