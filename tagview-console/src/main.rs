//! Tagview Console
//!
//! A headless runtime that tails scanner push channels and reconciles them
//! against the inventory server, exposing predictive/confirmed streams to
//! console screens.

mod app;
mod config;
mod push;
mod shutdown;

use clap::Parser;
use config::ConfigLoader;
use shutdown::{spawn_config_reload_handler, spawn_shutdown_listener};
use std::path::PathBuf;
use std::sync::Arc;
use tagview_core::config::ConfigStore;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// Tagview Console - real-time RFID inventory reconciliation
#[derive(Parser, Debug)]
#[command(name = "tagview-console")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./tagview-config.toml")]
    config: PathBuf,

    /// Override the inventory server base URL
    #[arg(short, long)]
    server: Option<Url>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting tagview-console v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.server));
    let config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Scanner set is runtime-reloadable; everything else needs a restart.
    let scanner_store = ConfigStore::new(config.scanner_set());

    let reload_notify =
        spawn_config_reload_handler(config_loader, scanner_store.clone());
    let shutdown_rx = spawn_shutdown_listener();

    let result = app::run(config, scanner_store, shutdown_rx).await;

    reload_notify.notify_one();
    tracing::info!("Console shutdown complete");

    result
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tagview_core=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
