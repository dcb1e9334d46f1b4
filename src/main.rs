//! WebSocket Echo/Relay Server - Entry Point
//!
//! `serve` runs the server until Ctrl-C/SIGTERM; `connect` runs the
//! interactive line client.

use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use echo_relay::config::{CliArgs, Command, Config};
use echo_relay::{client, server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    match cli.command {
        Command::Serve(args) => {
            let config = Config::load(&args)?;
            init_logging(&config.log_level);

            if let Err(e) = server::run(&config, shutdown_signal()).await {
                error!("Server failed: {}", e);
                return Err(e);
            }
            Ok(())
        }
        Command::Connect(args) => {
            init_logging(&args.log_level);

            let stdin = BufReader::new(tokio::io::stdin());
            client::run(&args.url, &args.sentinel, stdin, tokio::io::stdout()).await?;
            Ok(())
        }
    }
}

/// Initialize logging with environment filter
///
/// RUST_LOG overrides the configured level,
/// e.g. RUST_LOG=debug or RUST_LOG=echo_relay=trace
fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("echo_relay={}", level))),
        )
        .init();
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, initiating graceful shutdown"),
        _ = terminate => info!("SIGTERM received, initiating graceful shutdown"),
    }
}
