//! Unix signal handling for the worker.
//!
//! - SIGTERM/SIGINT: graceful shutdown. Runs in progress stop at the next
//!   feed or page boundary and release their locks.
//! - SIGHUP: reload the hub configuration.

use std::sync::Arc;

use hubcal_collector::StopSignal;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Signal handler that manages Unix signal processing.
pub struct SignalHandler {
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    reload_tx: Arc<watch::Sender<bool>>,
    reload_rx: watch::Receiver<bool>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHandler {
    /// Creates a new signal handler.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (reload_tx, reload_rx) = watch::channel(false);

        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            reload_tx: Arc::new(reload_tx),
            reload_rx,
        }
    }

    /// Spawns the signal listener task.
    #[cfg(unix)]
    pub fn spawn_listener(&self) {
        let shutdown_tx = self.shutdown_tx.clone();
        let reload_tx = self.reload_tx.clone();

        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};

            let installed = (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
                signal(SignalKind::hangup()),
            );
            let (Ok(mut sigterm), Ok(mut sigint), Ok(mut sighup)) = installed else {
                error!("failed to install signal handlers");
                return;
            };

            loop {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("received SIGTERM, initiating shutdown");
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                    _ = sigint.recv() => {
                        info!("received SIGINT, initiating shutdown");
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                    _ = sighup.recv() => {
                        info!("received SIGHUP, triggering reload");
                        let _ = reload_tx.send(true);
                    }
                }
            }

            debug!("signal listener stopped");
        });
    }

    /// Non-Unix implementation: Ctrl+C only.
    #[cfg(not(unix))]
    pub fn spawn_listener(&self) {
        let shutdown_tx = self.shutdown_tx.clone();

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("received Ctrl+C, initiating shutdown");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    /// Returns a receiver of reload requests.
    pub fn reload(&self) -> ReloadSignal {
        ReloadSignal {
            rx: self.reload_rx.clone(),
        }
    }

    /// Returns true if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Programmatically triggers a shutdown.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Programmatically triggers a reload.
    pub fn trigger_reload(&self) {
        let _ = self.reload_tx.send(true);
    }

    /// Creates a shutdown handle that can be passed to other components.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
            rx: self.shutdown_rx.clone(),
        }
    }
}

/// Receives reload requests.
pub struct ReloadSignal {
    rx: watch::Receiver<bool>,
}

impl ReloadSignal {
    /// Waits for the next reload request. Returns false once the handler is
    /// gone.
    pub async fn recv(&mut self) -> bool {
        loop {
            if self.rx.changed().await.is_err() {
                return false;
            }
            if *self.rx.borrow_and_update() {
                return true;
            }
        }
    }
}

/// A handle for triggering or checking shutdown status.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }
}

impl ShutdownHandle {
    /// Triggers a shutdown.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Returns true if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns the cancellation flag polled by collectors.
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal::new(self.rx.clone())
    }

    /// Completes when shutdown is triggered.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // an Err means every sender is gone, which also ends the wait
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}
