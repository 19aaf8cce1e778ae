use clap::Parser;
use tracing_subscriber::EnvFilter;

use corsgate::args::Args;
use corsgate::server;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Validate arguments
    if let Err(err) = args.validate() {
        eprintln!("❌ Configuration error: {err}");
        std::process::exit(1);
    }

    init_tracing(&args);

    if let Err(err) = server::run(args).await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise `debug` with `--verbose`, `warn` with `--quiet`, `info` by default.
fn init_tracing(args: &Args) {
    let fallback = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
