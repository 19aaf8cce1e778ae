//! Command line argument parsing for corsgate.
//!
//! This module defines the CLI interface using [`clap`]. Everything about
//! gateway behavior comes from the environment (see [`crate::env_vars`]);
//! the command line only covers where to listen and how to log.
//!
//! # Example
//!
//! ```no_run
//! use corsgate::args::Args;
//! use clap::Parser;
//!
//! let args = Args::parse();
//! if let Err(e) = args.validate() {
//!     eprintln!("Configuration error: {}", e);
//!     std::process::exit(1);
//! }
//! ```

use clap::Parser;

/// Command line arguments for corsgate.
#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    long_about = "A CORS gateway: fetches any URL on behalf of browser clients and returns it with CORS headers\n\nExample usage:\n  corsgate --port 8080\n  curl http://localhost:8080/https://example.com/data.json"
)]
#[command(
    after_help = "Environment variables:\n  PORT                    Listen port (default: 8080, --port wins)\n  ALLOWED_ORIGINS         Origins allowed to call the gateway (default: *)\n  BLOCKED_IPS             Client IPs always rejected\n  BLOCKED_DOMAINS         Target domains always rejected\n  ALLOWED_DOMAINS         When set, the only target domains allowed\n  TRUSTED_PROXY_IPS       Peers allowed to set X-Forwarded-For / Forwarded\n  RATE_LIMIT              Requests per window per client (default: 100, 0 = off)\n  RATE_LIMIT_WINDOW       Window in milliseconds (default: 60000)\n  CONCURRENT_LIMIT        In-flight requests per client (default: 10)\n  TOTAL_CONCURRENT_LIMIT  In-flight requests overall (default: 1000)\n  API_KEY                 Key for /_api/* and privileged clients\n  ENABLE_STATS            Collect statistics (default: true)\n  ENABLE_LOGGING          Emit access records (default: true)\n  LOG_WEBHOOK             URL receiving batched access records\n  MAX_URL_LENGTH          Maximum target URL length (default: 2048)\n  TIMEOUT                 Upstream timeout in milliseconds (default: 30000)\n  MAX_BODY_SIZE           Maximum request body in bytes (default: 10 MiB)\n  CACHE_TTL               Response cache TTL in milliseconds (default: 60000, 0 = off)\n\nLists accept a JSON array or a comma-separated string."
)]
pub struct Args {
    /// Address to bind to
    #[arg(
        long,
        short = 'b',
        help = "Bind address for listening",
        value_name = "ADDRESS",
        default_value = "0.0.0.0"
    )]
    pub bind: String,

    /// Port to listen on, overriding `PORT`
    #[arg(
        long,
        short = 'p',
        help = "Listen port (overrides the PORT environment variable)",
        value_name = "PORT"
    )]
    pub port: Option<u16>,

    /// Enable verbose output
    #[arg(
        long,
        short = 'v',
        help = "Show detailed configuration and startup information"
    )]
    pub verbose: bool,

    /// Enable quiet mode (minimal output)
    #[arg(
        long,
        short = 'q',
        help = "Suppress configuration output, show only essential messages",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    /// Output logs in JSON format (for structured logging)
    #[arg(long, help = "Output logs in JSON format for structured logging")]
    pub json_logs: bool,
}

impl Args {
    /// Validates the parsed command line arguments.
    ///
    /// - The port, when given, must be greater than 0
    /// - The bind address must be a valid IP address
    ///
    /// # Example
    ///
    /// ```
    /// use corsgate::args::Args;
    /// use clap::Parser;
    ///
    /// let args = Args::try_parse_from(["corsgate", "-p", "0"]).unwrap();
    /// assert!(args.validate().is_err());
    ///
    /// let args = Args::try_parse_from(["corsgate", "-p", "8080"]).unwrap();
    /// assert!(args.validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<(), String> {
        if self.port == Some(0) {
            return Err("Port must be greater than 0".to_string());
        }

        if self.bind.parse::<std::net::IpAddr>().is_err() {
            return Err(format!("Invalid bind address: '{}'", self.bind));
        }

        Ok(())
    }

    /// Parsed bind address. Call [`Args::validate`] first.
    pub fn bind_ip(&self) -> Result<std::net::IpAddr, String> {
        self.bind
            .parse()
            .map_err(|_| format!("Invalid bind address: '{}'", self.bind))
    }
}
