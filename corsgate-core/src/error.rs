//! Error types for corsgate.
//!
//! This module provides a unified error type for every way a request can be
//! rejected or fail, plus the structured configuration error returned by the
//! config parser and by reload.

use std::fmt;
use std::time::Duration;

use hyper::StatusCode;
use thiserror::Error;

use crate::security::Denial;

/// Result type alias for corsgate operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Unified error type for gateway operations.
///
/// Each variant maps to exactly one HTTP status via [`GatewayError::status_code`].
///
/// # Example
///
/// ```
/// use corsgate_core::error::{GatewayError, Result};
///
/// fn require_target(path: &str) -> Result<&str> {
///     if path.is_empty() {
///         return Err(GatewayError::InvalidRequest("missing target URL".into()));
///     }
///     Ok(path)
/// }
///
/// assert!(require_target("").is_err());
/// ```
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed inbound request (missing target, undecodable path).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Target rejected by the security policy.
    #[error("Request denied: {0}")]
    Policy(Denial),

    /// Missing or wrong API key on a protected route.
    #[error("Unauthorized")]
    Unauthorized,

    /// Client exceeded its sliding-window quota.
    #[error("Rate limit exceeded for {client}")]
    RateLimited {
        /// Rate-limit key of the rejected client.
        client: String,
        /// Seconds the client should wait.
        retry_after_secs: u64,
    },

    /// Per-client or global in-flight cap reached.
    #[error("Concurrency limit reached for {client}")]
    Overloaded {
        /// Admission key of the rejected client.
        client: String,
        /// Seconds the client should wait.
        retry_after_secs: u64,
    },

    /// Request body too large.
    #[error("Request body too large: {size} bytes (max: {max} bytes)")]
    BodyTooLarge {
        /// Observed (or declared) body size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// Failed to read the inbound request body.
    #[error("Body read error: {0}")]
    BodyReadError(String),

    /// Upstream did not answer within the configured timeout.
    #[error("Upstream timeout after {0:?}")]
    UpstreamTimeout(Duration),

    /// Upstream could not be reached (DNS failure, connection refused).
    #[error("Upstream connection failed: {0}")]
    UpstreamConnectionFailed(String),

    /// Upstream answered but the exchange failed.
    #[error("Upstream error: {0}")]
    UpstreamError(String),

    /// HTTP client error (from reqwest).
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    /// The request was cancelled because the gateway is shutting down.
    #[error("Request cancelled")]
    Cancelled,

    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Policy(denial) => denial.status_code(),
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BodyReadError(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamConnectionFailed(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            Self::HttpClientError(_) => StatusCode::BAD_GATEWAY,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-friendly error message suitable for HTTP responses.
    ///
    /// Upstream and internal failures get a fixed generic text; the underlying
    /// error is only ever logged. Policy denials name the rule that fired.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidRequest(detail) => format!("Invalid request: {detail}"),
            Self::Policy(denial) => denial.to_string(),
            Self::Unauthorized => "Unauthorized: missing or invalid API key".to_string(),
            Self::RateLimited { .. } => "Rate limit exceeded".to_string(),
            Self::Overloaded { .. } => "Too many concurrent requests".to_string(),
            Self::BodyTooLarge { .. } => "Request body too large".to_string(),
            Self::BodyReadError(_) => "Bad request".to_string(),
            Self::UpstreamTimeout(_) => "Gateway timeout".to_string(),
            Self::UpstreamConnectionFailed(_) => "Could not connect to target".to_string(),
            Self::UpstreamError(_) | Self::HttpClientError(_) => "Bad gateway".to_string(),
            Self::Cancelled => "Service unavailable".to_string(),
            Self::Config(_) | Self::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Returns the `Retry-After` value in seconds, if this error carries one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            }
            | Self::Overloaded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Returns true if this error should be logged at warn level.
    ///
    /// Admission and policy rejections are expected traffic and stay at debug.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout(_)
                | Self::UpstreamConnectionFailed(_)
                | Self::UpstreamError(_)
                | Self::HttpClientError(_)
                | Self::Config(_)
                | Self::Internal(_)
        )
    }
}

/// A single configuration problem, tied to the key that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Configuration key (environment variable name).
    pub key: &'static str,
    /// Human readable reason.
    pub message: String,
}

impl ConfigIssue {
    /// Creates a new issue for `key`.
    pub fn new(key: &'static str, message: impl Into<String>) -> Self {
        Self {
            key,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Every issue found while parsing or validating a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Configuration error: {}", join_issues(.issues))]
pub struct ConfigError {
    /// The collected issues, in key order of discovery.
    pub issues: Vec<ConfigIssue>,
}

impl ConfigError {
    /// Wraps a non-empty list of issues.
    pub fn new(issues: Vec<ConfigIssue>) -> Self {
        Self { issues }
    }

    /// Convenience constructor for a single issue.
    pub fn single(key: &'static str, message: impl Into<String>) -> Self {
        Self::new(vec![ConfigIssue::new(key, message)])
    }
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
