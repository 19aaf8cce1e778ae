//! Outbound request construction and execution.
//!
//! The network call itself sits behind the [`Upstream`] trait. [`ProxyExecutor`]
//! wraps any upstream with the request timeout and the shutdown token, so a
//! slow target yields [`GatewayError::UpstreamTimeout`] and a shutdown yields
//! [`GatewayError::Cancelled`], never a generic connection error.
//!
//! # Connection Pooling
//!
//! [`ReqwestUpstream`] owns one [`reqwest::Client`] for the process lifetime.
//! Redirects are not followed: a 3xx goes back to the caller, so a target
//! cannot bounce the gateway onto an address the security checks never saw.
//! Names are resolved through a [`GuardedResolver`] and system proxies are
//! ignored, so every connection goes to an address that passed the SSRF check.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::defaults;
use crate::error::{GatewayError, Result};
use crate::headers;
use crate::resolver::{self, GuardedResolver};
use crate::security::Denial;

/// A fully prepared request for the target.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What the target answered.
#[derive(Clone, Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Transport used to reach targets.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Sends the request and buffers the full response.
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse>;
}

/// [`Upstream`] backed by a pooled `reqwest` client.
#[derive(Clone, Debug)]
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    /// Builds the shared client, resolving through the system resolver.
    pub fn new() -> Result<Self> {
        Self::with_resolver(GuardedResolver::new())
    }

    /// Builds the shared client around `resolver`.
    pub fn with_resolver(resolver: GuardedResolver) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .dns_resolver(Arc::new(resolver))
            .build()?;
        Ok(Self { client })
    }

    /// Uses an existing client (custom TLS roots, proxies, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Upstream for ReqwestUpstream {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(map_send_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::UpstreamError(format!("reading body: {err}")))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_send_error(err: reqwest::Error) -> GatewayError {
    if let Some(restricted) = resolver::find_restricted(&err) {
        return GatewayError::Policy(Denial::PrivateAddress(restricted.host.clone()));
    }
    if err.is_connect() {
        GatewayError::UpstreamConnectionFailed(err.to_string())
    } else if err.is_timeout() {
        GatewayError::UpstreamError(format!("transport timeout: {err}"))
    } else {
        GatewayError::HttpClientError(err)
    }
}

/// How a request body is treated before forwarding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
    Multipart,
    Text,
    Binary,
}

impl BodyKind {
    /// Classifies a `Content-Type` value. Missing types are opaque bytes.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return Self::Binary;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime == "application/json" || mime.ends_with("+json") {
            Self::Json
        } else if mime == "application/x-www-form-urlencoded" {
            Self::Form
        } else if mime.starts_with("multipart/") {
            Self::Multipart
        } else if mime.starts_with("text/") {
            Self::Text
        } else {
            Self::Binary
        }
    }
}

/// Prepares a request body for forwarding.
///
/// JSON is re-serialized (raw bytes are kept if it does not parse); form and
/// multipart bodies pass through untouched; text is checked against
/// `max_body_size` (0 = unlimited); anything else is forwarded as-is.
pub fn prepare_body(content_type: Option<&str>, body: Bytes, max_body_size: usize) -> Result<Bytes> {
    match BodyKind::from_content_type(content_type) {
        BodyKind::Json if !body.is_empty() => {
            match serde_json::from_slice::<serde_json::Value>(&body) {
                Ok(value) => Ok(serde_json::to_vec(&value).map(Bytes::from).unwrap_or(body)),
                Err(err) => {
                    debug!(error = %err, "JSON body did not parse, forwarding raw");
                    Ok(body)
                }
            }
        }
        BodyKind::Text if max_body_size > 0 && body.len() > max_body_size => {
            Err(GatewayError::BodyTooLarge {
                size: body.len(),
                max: max_body_size,
            })
        }
        _ => Ok(body),
    }
}

/// Copies inbound headers that are safe to send to the target.
///
/// Drops hop-by-hop and caller-identifying headers. An `Authorization` header
/// carrying the gateway's own key is dropped too. Adds a default
/// `User-Agent` when the caller sent none.
pub fn build_outbound_headers(inbound: &HeaderMap, gateway_key: Option<&str>) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len());

    for (name, value) in inbound {
        if headers::is_stripped_outbound(name.as_str()) {
            continue;
        }
        if name.as_str() == headers::AUTHORIZATION
            && let Some(key) = gateway_key
            && value
                .to_str()
                .ok()
                .and_then(crate::auth::bearer_token)
                .is_some_and(|token| crate::auth::constant_time_eq(token.as_bytes(), key.as_bytes()))
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    if !out.contains_key(headers::USER_AGENT) {
        out.insert(
            HeaderName::from_static(headers::USER_AGENT),
            HeaderValue::from_static(defaults::USER_AGENT),
        );
    }
    out
}

/// Copies upstream response headers, minus hop-by-hop, length and CORS headers.
pub fn filter_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !headers::is_stripped_inbound(name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Runs outbound calls under a timeout and a cancellation token.
#[derive(Clone)]
pub struct ProxyExecutor {
    upstream: Arc<dyn Upstream>,
}

impl ProxyExecutor {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self { upstream }
    }

    /// Sends `request`, giving up after `timeout` or when `cancel` fires.
    pub async fn execute(
        &self,
        request: OutboundRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<UpstreamResponse> {
        let target = request.url.host_str().unwrap_or_default().to_string();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(target_host = %target, "Upstream call cancelled");
                Err(GatewayError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                debug!(target_host = %target, ?timeout, "Upstream call timed out");
                Err(GatewayError::UpstreamTimeout(timeout))
            }
            result = self.upstream.send(request) => result,
        }
    }
}

impl std::fmt::Debug for ProxyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyExecutor").finish_non_exhaustive()
    }
}
