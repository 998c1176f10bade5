// CertFlux - Real-time Certificate Transparency stream aggregator
// Licensed under GPL-3.0

use certflux::ct_stream::Watcher;
use certflux::sink::{ExampleCertStore, MetricsRegistry, StdoutBroadcaster};
use certflux::{AppConfig, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Tail every public CT log and emit enriched certificate events as JSON
/// lines.
#[derive(Debug, Parser)]
#[command(name = "certflux", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "certflux.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging - respect RUST_LOG environment variable
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    let cli = Cli::parse();
    let config = AppConfig::from_file(&cli.config)?;

    let broadcaster = Arc::new(StdoutBroadcaster::new());
    let metrics = Arc::new(MetricsRegistry::new());
    let status = Arc::new(ExampleCertStore::new());

    let mut watcher = Watcher::new(config, broadcaster, metrics, status)?;

    let handle = watcher.handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
        handle.stop();
    });

    watcher.start().await
}
