//! corsgate Core - CORS reverse proxy components
//!
//! This crate provides the request pipeline of a gateway that fetches
//! arbitrary URLs on behalf of browser clients and returns the result with
//! permissive CORS headers:
//! - Sliding-window rate limiting and in-flight concurrency caps
//! - Target validation with domain lists and SSRF protection
//! - Short-lived response caching for GET requests
//! - Statistics, batched access logging and a management API
//!
//! # Overview
//!
//! `corsgate-core` knows nothing about sockets or environment variables.
//! Configuration comes from a [`ConfigSource`], upstream calls go through an
//! [`Upstream`], and [`Gateway::handle`] turns any `hyper` request into a
//! response.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use corsgate_core::{ConfigSource, Gateway, GatewayConfig, ReqwestUpstream};
//! use corsgate_core::error::ConfigError;
//!
//! struct Fixed;
//!
//! impl ConfigSource for Fixed {
//!     fn load(&self) -> Result<GatewayConfig, ConfigError> {
//!         Ok(GatewayConfig::default())
//!     }
//! }
//!
//! # async fn run() -> corsgate_core::Result<()> {
//! let upstream = Arc::new(ReqwestUpstream::new()?);
//! let gateway = Gateway::new(GatewayConfig::default(), Arc::new(Fixed), upstream)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`gateway`] - Request routing and the proxy pipeline
//! - [`management`] - `/_api/*` routes
//! - [`security`] / [`resolver`] - Target validation and SSRF protection
//! - [`rate_limiter`] / [`concurrency`] - Admission control
//! - [`cache`] - Response cache
//! - [`stats`] / [`logger`] - Observability
//! - [`types`] / [`error`] - Configuration and error types

#![forbid(unsafe_code)]

pub mod auth;
pub mod cache;
pub mod client_ip;
pub mod concurrency;
pub mod cors;
pub mod defaults;
pub mod error;
pub mod gateway;
pub mod headers;
pub mod logger;
pub mod management;
pub mod proxy;
pub mod rate_limiter;
pub mod resolver;
pub mod response;
pub mod security;
pub mod stats;
#[cfg(test)]
pub mod test_utils;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{ConfigError, GatewayError, Result};
pub use gateway::Gateway;
pub use proxy::{ReqwestUpstream, Upstream};
pub use types::{ConfigSource, GatewayConfig};
