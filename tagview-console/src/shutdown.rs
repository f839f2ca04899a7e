//! Signal handling for graceful shutdown and config reload.

use crate::config::ConfigLoader;
use std::sync::Arc;
use tagview_core::config::{ConfigStore, ScannerSet};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Notify, watch};

/// Creates a future that completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C).
pub async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

/// Spawns a task that flips the shutdown watch when a signal arrives.
pub fn spawn_shutdown_listener() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });
    shutdown_rx
}

/// Spawns a task that listens for SIGHUP and reloads the configuration.
///
/// On reload, the scanner set is swapped through the [`ConfigStore`] so
/// the fan-in and the push transport reconcile their channel sets.
/// Returns a Notify used to stop the handler at shutdown.
pub fn spawn_config_reload_handler(
    config_loader: Arc<ConfigLoader>,
    scanner_store: ConfigStore<ScannerSet>,
) -> Arc<Notify> {
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();

    tokio::spawn(async move {
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(config) => {
                            scanner_store.update(config.scanner_set()).await;
                            tracing::info!("Configuration reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload configuration: {}", e);
                        }
                    }
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    shutdown_notify
}
