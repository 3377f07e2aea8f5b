//! Worker command: runs the polling loop in the foreground.
//!
//! - Signal handler (SIGTERM/SIGINT for shutdown, SIGHUP for reload)
//! - Hub directory re-read from the config file on reload
//! - Aggregator over the file-backed stores

use std::path::PathBuf;
use std::sync::Arc;

use hubcal_server::{SignalHandler, Worker};
use tracing::{info, warn};

use crate::commands::{Stores, build_aggregator};
use crate::config::{AppConfig, TomlHubSource};
use crate::error::CliResult;

/// Starts the worker and blocks until a shutdown signal is received.
pub async fn run(config_path: Option<PathBuf>, config: &AppConfig) -> CliResult<()> {
    let stores = Stores::open(config);
    let aggregator = build_aggregator(config, &stores)?;

    let signals = SignalHandler::new();
    signals.spawn_listener();

    let source = Arc::new(TomlHubSource::new(config_path));
    let worker = Worker::new(aggregator, source, signals.shutdown_handle())?;
    if worker.directory().is_empty() {
        warn!("no hubs configured; waiting for a reload");
    }
    let handle = worker.handle();

    let mut reload = signals.reload();
    let forwarder = tokio::spawn(async move {
        while reload.recv().await {
            if handle.reload().await.is_err() {
                break;
            }
        }
    });

    let result = worker.run().await;
    forwarder.abort();
    info!("worker exited");
    result?;
    Ok(())
}
