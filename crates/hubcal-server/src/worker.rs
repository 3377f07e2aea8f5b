//! The polling worker.
//!
//! On every tick the worker offers each configured hub to the
//! [`Aggregator`]; hubs whose interval has elapsed (and whose lock is free)
//! run on background tasks. Commands arrive over an mpsc channel through a
//! [`WorkerHandle`]:
//!
//! - `RunNow { hub }` runs one hub immediately, ignoring its interval
//! - `Reload` asks the [`HubConfigSource`] for a fresh directory
//! - `Stop` finishes the loop after in-flight runs end
//!
//! Shutdown stops in-flight runs at their next feed or page boundary.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hubcal_core::{HubConfigSource, HubDefinition, HubDirectory};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::aggregator::{Aggregator, RunOutcome};
use crate::error::{ServerError, ServerResult};
use crate::signals::ShutdownHandle;

/// Commands that can be sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Run one hub now, regardless of its interval.
    RunNow { hub: String },
    /// Reload the hub directory.
    Reload,
    /// Stop the worker.
    Stop,
}

/// Counters describing the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerState {
    /// Hubs in the current directory.
    pub hubs: usize,
    /// Completed ticks.
    pub ticks: u64,
    /// Runs that finished.
    pub runs_completed: u64,
    /// Runs that failed.
    pub runs_failed: u64,
    /// Last tick time.
    pub last_tick: Option<DateTime<Utc>>,
    /// Last run error, with its hub.
    pub last_error: Option<String>,
}

/// Shared worker state.
pub type SharedWorkerState = Arc<RwLock<WorkerState>>;

type RunResult = (String, ServerResult<RunOutcome>);

/// The polling worker.
pub struct Worker {
    aggregator: Aggregator,
    source: Arc<dyn HubConfigSource>,
    directory: HubDirectory,
    shutdown: ShutdownHandle,
    state: SharedWorkerState,
    command_tx: mpsc::Sender<WorkerCommand>,
    command_rx: Option<mpsc::Receiver<WorkerCommand>>,
}

impl Worker {
    /// Creates a worker and loads the first hub directory.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the directory cannot be loaded.
    pub fn new(
        aggregator: Aggregator,
        source: Arc<dyn HubConfigSource>,
        shutdown: ShutdownHandle,
    ) -> ServerResult<Self> {
        let directory = source.load()?;
        let (command_tx, command_rx) = mpsc::channel(16);
        let state = WorkerState {
            hubs: directory.len(),
            ..Default::default()
        };
        Ok(Self {
            aggregator,
            source,
            directory,
            shutdown,
            state: Arc::new(RwLock::new(state)),
            command_tx,
            command_rx: Some(command_rx),
        })
    }

    /// Returns a handle for sending commands to the worker.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            command_tx: self.command_tx.clone(),
            state: self.state.clone(),
        }
    }

    /// Returns the current directory.
    pub fn directory(&self) -> &HubDirectory {
        &self.directory
    }

    /// Runs the worker loop until stopped or shut down.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if called twice.
    pub async fn run(mut self) -> ServerResult<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| ServerError::config("worker loop already started"))?;
        let tick = self.aggregator.config().tick.max(Duration::from_secs(1));
        let mut runs: JoinSet<RunResult> = JoinSet::new();
        // the first tick completes immediately
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(hubs = self.directory.len(), tick_secs = tick.as_secs(), "worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => {
                    info!("worker shutting down");
                    break;
                }
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    match joined {
                        Ok((hub, result)) => self.record(&hub, result).await,
                        Err(e) => error!(error = %e, "run task panicked"),
                    }
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(WorkerCommand::RunNow { hub }) => {
                            debug!(hub = %hub, "received RunNow command");
                            match self.directory.get(&hub) {
                                Some(def) => self.spawn_run(&mut runs, def.clone(), Utc::now(), true),
                                None => warn!(hub = %hub, "RunNow for unknown hub"),
                            }
                        }
                        Some(WorkerCommand::Reload) => self.reload().await,
                        Some(WorkerCommand::Stop) | None => {
                            info!("worker stopping");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.tick(&mut runs, Utc::now()).await;
                }
            }
        }

        while let Some(joined) = runs.join_next().await {
            if let Ok((hub, result)) = joined {
                self.record(&hub, result).await;
            }
        }
        info!("worker stopped");
        Ok(())
    }

    async fn tick(&self, runs: &mut JoinSet<RunResult>, now: DateTime<Utc>) {
        debug!(hubs = self.directory.len(), in_flight = runs.len(), "worker waking");
        for def in self.directory.iter() {
            self.spawn_run(runs, def.clone(), now, false);
        }
        let mut state = self.state.write().await;
        state.ticks += 1;
        state.last_tick = Some(now);
    }

    fn spawn_run(
        &self,
        runs: &mut JoinSet<RunResult>,
        def: HubDefinition,
        now: DateTime<Utc>,
        force: bool,
    ) {
        let aggregator = self.aggregator.clone();
        let stop = self.shutdown.stop_signal();
        runs.spawn(async move {
            let result = aggregator.run(&def, now, force, &stop).await;
            (def.id, result)
        });
    }

    async fn record(&self, hub: &str, result: ServerResult<RunOutcome>) {
        let mut state = self.state.write().await;
        match result {
            Ok(RunOutcome::Completed(summary)) => {
                info!(hub, count = summary.events, "run completed");
                state.runs_completed += 1;
            }
            Ok(RunOutcome::NotDue) | Ok(RunOutcome::Locked) => {}
            Err(ServerError::Shutdown) => info!(hub, "run stopped by shutdown"),
            Err(e) => {
                error!(hub, error = %e, "run failed");
                state.runs_failed += 1;
                state.last_error = Some(format!("{hub}: {e}"));
            }
        }
    }

    async fn reload(&mut self) {
        match self.source.load() {
            Ok(directory) => {
                info!(hubs = directory.len(), "hub directory reloaded");
                self.state.write().await.hubs = directory.len();
                self.directory = directory;
            }
            Err(e) => warn!(error = %e, "reload failed, keeping current hubs"),
        }
    }
}

/// Handle for sending commands to a running worker.
#[derive(Clone, Debug)]
pub struct WorkerHandle {
    command_tx: mpsc::Sender<WorkerCommand>,
    state: SharedWorkerState,
}

impl WorkerHandle {
    /// Runs a hub immediately.
    pub async fn run_now(
        &self,
        hub: impl Into<String>,
    ) -> Result<(), mpsc::error::SendError<WorkerCommand>> {
        self.command_tx
            .send(WorkerCommand::RunNow { hub: hub.into() })
            .await
    }

    /// Reloads the hub directory.
    pub async fn reload(&self) -> Result<(), mpsc::error::SendError<WorkerCommand>> {
        self.command_tx.send(WorkerCommand::Reload).await
    }

    /// Stops the worker.
    pub async fn stop(&self) -> Result<(), mpsc::error::SendError<WorkerCommand>> {
        self.command_tx.send(WorkerCommand::Stop).await
    }

    /// Returns a snapshot of the worker state.
    pub async fn state(&self) -> WorkerState {
        self.state.read().await.clone()
    }
}
