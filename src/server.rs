//! Listener, startup banner and graceful shutdown.

use std::convert::Infallible;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::args::Args;
use crate::config::EnvVarConfig;
use crate::env_vars;
use corsgate_core::{ConfigSource, Gateway, GatewayConfig, ReqwestUpstream, defaults};

/// Loads configuration, binds the listener and serves until Ctrl-C or SIGTERM.
pub async fn run(args: Args) -> Result<(), String> {
    let source = EnvVarConfig::new().with_port_override(args.port);
    let config = source.load().map_err(|err| err.to_string())?;

    print_startup_info(&args, &config);

    let addr = SocketAddr::from((args.bind_ip()?, config.port));
    let upstream = ReqwestUpstream::new().map_err(|err| err.to_string())?;
    let gateway = Gateway::new(config, Arc::new(source), Arc::new(upstream))
        .map_err(|err| err.to_string())?;
    let gateway = Arc::new(gateway);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| format!("Failed to bind to {addr}: {err}"))?;
    info!(address = %addr, version = env!("CARGO_PKG_VERSION"), "corsgate is running");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    serve(listener, gateway.clone(), shutdown).await;
    gateway.shutdown();
    Ok(())
}

/// Accepts connections until `shutdown` fires, then drains them.
///
/// Open connections get [`defaults::SHUTDOWN_GRACE`] to finish their
/// current request.
pub async fn serve(listener: TcpListener, gateway: Arc<Gateway>, shutdown: CancellationToken) {
    let tracker = TaskTracker::new();

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "Failed to accept connection");
                    continue;
                }
            },
        };

        debug!(peer = %peer, "New connection");
        tracker.spawn(serve_connection(
            stream,
            peer,
            gateway.clone(),
            shutdown.clone(),
        ));
    }

    tracker.close();
    info!(open_connections = tracker.len(), "Shutdown signal received, draining connections");
    if tokio::time::timeout(defaults::SHUTDOWN_GRACE, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            open_connections = tracker.len(),
            "Shutdown grace period elapsed with connections still open"
        );
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let gateway = gateway.clone();
        async move { Ok::<_, Infallible>(gateway.handle(req, peer).await) }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(err) = result {
        debug!(peer = %peer, error = %err, "Connection error");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Print startup banner with configuration
pub fn print_startup_info(args: &Args, config: &GatewayConfig) {
    if args.quiet {
        // Quiet mode: only essential information
        println!("🚀 corsgate v{} starting on port {}", env!("CARGO_PKG_VERSION"), config.port);
        return;
    }

    println!("🌐 {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("   {}", env!("CARGO_PKG_DESCRIPTION"));
    println!();
    println!("📡 Network Configuration:");
    println!("   Bind Address:   {}", args.bind);
    println!("   Listen Port:    {}", config.port);
    println!();

    println!("⚡ Admission Control:");
    if config.rate_limit == 0 {
        println!("   Rate Limit:     disabled");
    } else {
        println!(
            "   Rate Limit:     {} per {} ms",
            config.rate_limit,
            config.rate_limit_window.as_millis()
        );
    }
    println!("   Per Client:     {}", limit_display(config.concurrent_limit));
    println!("   Total:          {}", limit_display(config.total_concurrent_limit));
    println!();

    println!("🔧 Proxy Configuration:");
    println!("   Timeout:        {} ms", config.timeout.as_millis());
    println!("   Max Body Size:  {}", config.max_body_size_display());
    println!("   Max URL Length: {}", config.max_url_length);
    if config.cache_enabled() {
        println!("   Cache TTL:      {} ms", config.cache_ttl.as_millis());
    } else {
        println!("   Cache:          disabled");
    }
    println!();

    print_security_config(config);

    if args.verbose {
        print_env_config();
    }

    println!();
    println!("🚀 Server starting...");
}

fn limit_display(limit: usize) -> String {
    if limit == 0 {
        "unlimited".to_string()
    } else {
        limit.to_string()
    }
}

/// Print security configuration summary
fn print_security_config(config: &GatewayConfig) {
    println!("🔒 Security Configuration:");

    if config.allows_any_origin() {
        println!("   Origins:        any");
    } else {
        println!("   Origins:        {}", config.allowed_origins.join(", "));
    }
    println!(
        "   API Key:        {}",
        if config.api_key.is_some() { "[CONFIGURED]" } else { "not set (management API open)" }
    );
    if !config.trusted_proxy_ips.is_empty() {
        println!("   Trusted Proxies: {} configured", config.trusted_proxy_ips.len());
    }
    if !config.blocked_ips.is_empty() {
        println!("   Blocked IPs:    {} configured", config.blocked_ips.len());
    }
    if !config.blocked_domains.is_empty() {
        println!("   Blocked Domains: {}", config.blocked_domains.join(", "));
    }
    if !config.allowed_domains.is_empty() {
        println!("   Allowed Domains: {}", config.allowed_domains.join(", "));
    }
    println!(
        "   Stats/Logging:  {}/{}",
        on_off(config.enable_stats),
        on_off(config.enable_logging)
    );
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

/// Print environment variable configuration status (used in verbose mode)
fn print_env_config() {
    println!();
    println!("🔧 Environment Variables:");

    for &var_name in env_vars::all_env_vars() {
        match env::var(var_name) {
            Ok(value) => {
                let display_value = if env_vars::SECRET_VARS.contains(&var_name) {
                    "[CONFIGURED]".to_string()
                } else {
                    value
                };
                println!("   {:<25} = {}", var_name, display_value);
            }
            Err(_) => {
                println!("   {:<25} = [NOT SET]", var_name);
            }
        }
    }
}
