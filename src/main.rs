use anyhow::Result;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kbase::constants;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI to get loglevel (need this before tracing init)
    let args: Vec<String> = std::env::args().collect();
    let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");

    let loglevel = args
        .iter()
        .position(|a| a == "-l" || a == "--loglevel")
        .and_then(|pos| args.get(pos + 1))
        .cloned()
        .unwrap_or_else(|| "info".to_string());

    let log_level = kbase::logger::LogLevel::from_str(&loglevel).unwrap_or(kbase::logger::LogLevel::Info);
    let log_level_str = log_level.as_str();

    // Create cancellation token for async shutdown (serve/mcp long-running commands)
    let cancel_token = CancellationToken::new();
    let cancel_clone = cancel_token.clone();

    // CTRL-C handling. First press: graceful shutdown via CancellationToken. Second
    // press: force exit.
    ctrlc::set_handler(move || {
        if constants::SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            eprintln!("\nForce shutdown!");
            std::process::exit(130);
        }
        if !is_quiet {
            eprintln!("\nShutting down gracefully... (press Ctrl-C again to force)");
        }
        constants::SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        cancel_clone.cancel();
    })
    .expect("Failed to set CTRL-C handler");

    // For serve/mcp: DON'T initialize tracing here. init_logger() in cli::run will
    // set up console+file logging as the FIRST and ONLY global subscriber (it can
    // only be set once per process). mcp in particular must never touch stdout.
    let is_long_running = args.iter().any(|a| a == "mcp" || a == "serve");

    if !is_quiet && !is_long_running {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| format!("kbase={}", log_level_str).into()),
            )
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();

        info!("Starting kbase v{} (loglevel: {})", env!("CARGO_PKG_VERSION_FULL"), log_level_str);
    }

    kbase::cli::run(cancel_token).await
}
