//! corsgate - a CORS gateway
//!
//! Fetches arbitrary URLs on behalf of browser clients and returns the
//! response with permissive CORS headers, behind rate limiting, concurrency
//! caps, SSRF protection and a small response cache.
//!
//! # Example
//!
//! ```rust,no_run
//! use corsgate::config::parse_config;
//!
//! let config = parse_config(|key| std::env::var(key)).expect("valid configuration");
//! println!("Listening on port {}", config.port);
//! ```
//!
//! # Modules
//!
//! - [`config`] - Configuration parsing from environment variables
//! - [`env_vars`] - Environment variable constants
//! - [`server`] - Listener, startup banner and graceful shutdown
//! - [`args`] - Command line argument parsing
//!
//! # Re-exports from corsgate-core
//!
//! The request pipeline lives in the `corsgate-core` crate:
//! - [`gateway`] - Routing and the proxy pipeline
//! - [`security`] - Target validation and SSRF protection
//! - [`types`] - Configuration schema

#![forbid(unsafe_code)]

pub mod args;
pub mod config;
pub mod env_vars;
pub mod server;

// Re-export corsgate-core modules
pub use corsgate_core::gateway;
pub use corsgate_core::security;
pub use corsgate_core::types;

// Re-export commonly used items at crate root
pub use config::{EnvVarConfig, parse_config};
pub use corsgate_core::{
    ConfigError, ConfigSource, Gateway, GatewayConfig, GatewayError, ReqwestUpstream, Upstream,
};
