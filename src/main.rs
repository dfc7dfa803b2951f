//! Waypoint - a caching DNS forwarder with local authoritative records.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

use waypoint::config::Config;
use waypoint::logging;
use waypoint::server::Server;

/// Caching DNS forwarder with local authoritative records.
#[derive(Parser)]
#[command(name = "waypoint", version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    logging::init(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_file = %args.config.display(),
        "starting dns server"
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?
        .block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let server = Server::bind(config)
        .await
        .context("failed to start server")?;

    let shutdown = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = sigint.recv() => info!(signal = "SIGINT", "received shutdown signal"),
                _ = sigterm.recv() => info!(signal = "SIGTERM", "received shutdown signal"),
            }
            shutdown.cancel();
        }
    });

    server.run(shutdown).await.context("server error")?;
    info!("dns server shutdown complete");
    Ok(())
}
