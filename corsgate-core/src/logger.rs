//! Buffered access logging.
//!
//! Records are sanitized when created, buffered, and handed to a [`LogSink`]
//! in batches: when the buffer reaches [`defaults::LOG_BATCH_SIZE`] records,
//! or when the flush timer fires, whichever comes first. Delivery is
//! fire-and-forget. A failing sink never affects the request that produced
//! the record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::defaults;
use crate::error::{ConfigError, Result};
use crate::types::GatewayConfig;

/// Tracing target used by [`TracingSink`].
pub const ACCESS_LOG_TARGET: &str = "corsgate::access";

const MAX_USER_AGENT_LEN: usize = 256;
const REDACTED: &str = "[REDACTED]";

/// Long base64/hex-like runs: session ids, tokens, fingerprints.
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9_\-\.=+/]{32,}").unwrap());

static SENSITIVE_PARAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([?&](?:api_key|key|token|password|secret|auth)=)[^&#]*").unwrap()
});

/// Strips token-like substrings and truncates.
pub fn sanitize_user_agent(user_agent: &str) -> String {
    let cleaned = TOKEN_RE.replace_all(user_agent, REDACTED);
    cleaned.chars().take(MAX_USER_AGENT_LEN).collect()
}

/// Redacts the values of sensitive query parameters.
///
/// The input is percent-decoded (twice, for double-encoded paths) first so an
/// encoded `%3Ftoken%3D` is caught like a literal `?token=`.
pub fn sanitize_url(url: &str) -> String {
    let decoded = percent_decode_str(url).decode_utf8_lossy();
    let decoded = percent_decode_str(&decoded).decode_utf8_lossy().into_owned();
    SENSITIVE_PARAM_RE
        .replace_all(&decoded, format!("${{1}}{REDACTED}"))
        .into_owned()
}

/// One access log entry.
#[derive(Clone, Debug, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub target_url: Option<String>,
    pub status: u16,
    pub latency_ms: u64,
    pub user_agent: Option<String>,
    pub client_ip: String,
}

impl LogRecord {
    /// Builds a sanitized record timestamped now.
    pub fn new(
        method: &str,
        path: &str,
        target_url: Option<&str>,
        status: u16,
        latency: Duration,
        user_agent: Option<&str>,
        client_ip: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            method: method.to_string(),
            path: sanitize_url(path),
            target_url: target_url.map(sanitize_url),
            status,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            user_agent: user_agent.map(sanitize_user_agent),
            client_ip: client_ip.to_string(),
        }
    }
}

/// Destination for flushed batches.
pub trait LogSink: Send + Sync {
    /// Takes ownership of a batch. Must not block and must not fail.
    fn deliver(&self, batch: Vec<LogRecord>);
}

/// Posts batches as a JSON array to a webhook.
#[derive(Debug)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
}

impl WebhookSink {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|err| ConfigError::single("LOG_WEBHOOK", format!("invalid URL: {err}")))?;
        let client = reqwest::Client::builder()
            .timeout(defaults::LOG_WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self { client, url })
    }
}

impl LogSink for WebhookSink {
    fn deliver(&self, batch: Vec<LogRecord>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(records = batch.len(), "No runtime available, dropping log batch");
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();

        runtime.spawn(async move {
            let count = batch.len();
            match client.post(url).json(&batch).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(records = count, "Log batch delivered");
                }
                Ok(response) => {
                    debug!(records = count, status = response.status().as_u16(), "Log webhook rejected batch");
                }
                Err(err) => {
                    debug!(records = count, error = %err, "Log webhook delivery failed");
                }
            }
        });
    }
}

/// Emits each record as a `tracing` event on [`ACCESS_LOG_TARGET`].
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn deliver(&self, batch: Vec<LogRecord>) {
        for record in batch {
            info!(
                target: ACCESS_LOG_TARGET,
                timestamp = %record.timestamp.to_rfc3339(),
                method = %record.method,
                path = %record.path,
                target_url = record.target_url.as_deref().unwrap_or("-"),
                status = record.status,
                latency_ms = record.latency_ms,
                user_agent = record.user_agent.as_deref().unwrap_or("-"),
                client = %record.client_ip,
                "request"
            );
        }
    }
}

/// Batching access logger.
#[derive(Clone)]
pub struct RequestLogger {
    buffer: Arc<Mutex<Vec<LogRecord>>>,
    sink: Arc<dyn LogSink>,
    enabled: bool,
    batch_size: usize,
}

impl RequestLogger {
    pub fn new(sink: Arc<dyn LogSink>, enabled: bool) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::with_capacity(defaults::LOG_BATCH_SIZE))),
            sink,
            enabled,
            batch_size: defaults::LOG_BATCH_SIZE,
        }
    }

    /// Picks the sink for `config`: the webhook when set, tracing otherwise.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let sink: Arc<dyn LogSink> = match config.log_webhook.as_deref() {
            Some(url) => Arc::new(WebhookSink::new(url)?),
            None => Arc::new(TracingSink),
        };
        Ok(Self::new(sink, config.enable_logging))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Buffers a record, flushing when the batch is full.
    pub fn log(&self, record: LogRecord) {
        if !self.enabled {
            return;
        }
        let full = {
            let mut buffer = self.buffer.lock();
            buffer.push(record);
            (buffer.len() >= self.batch_size).then(|| std::mem::take(&mut *buffer))
        };
        if let Some(batch) = full {
            self.sink.deliver(batch);
        }
    }

    /// Hands every buffered record to the sink.
    pub fn flush(&self) {
        let batch = std::mem::take(&mut *self.buffer.lock());
        if !batch.is_empty() {
            self.sink.deliver(batch);
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Flushes every `interval` until `token` is cancelled.
    pub fn spawn_flusher(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let logger = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => logger.flush(),
                }
            }
        })
    }
}

impl std::fmt::Debug for RequestLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLogger")
            .field("enabled", &self.enabled)
            .field("buffered", &self.buffered())
            .finish_non_exhaustive()
    }
}
