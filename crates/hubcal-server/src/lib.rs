//! Scheduling and running hub aggregations.
//!
//! This crate provides the hubcal worker that:
//! - Keeps per-hub task and lock records ([`Scheduler`])
//! - Runs one hub end to end: collect, merge, save ([`Aggregator`])
//! - Polls every hub on a fixed tick and takes commands ([`Worker`])
//! - Turns Unix signals into shutdown and reload requests
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hubcal_collector::{CollectOptions, Credentials, EventCollector, ReqwestFetcher};
//! use hubcal_core::{HubDirectory, StaticHubSource};
//! use hubcal_server::{Aggregator, Scheduler, SignalHandler, Worker, WorkerConfig};
//! use hubcal_store::{FsBlobStore, FsTableStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let blobs = Arc::new(FsBlobStore::new("/var/lib/hubcal"));
//!     let tables = Arc::new(FsTableStore::new("/var/lib/hubcal"));
//!     let config = WorkerConfig::default();
//!     let collector = EventCollector::new(
//!         Arc::new(ReqwestFetcher::new()?),
//!         blobs.clone(),
//!         tables.clone(),
//!         Credentials::default(),
//!         config.collect.clone(),
//!     );
//!     let aggregator = Aggregator::new(
//!         collector,
//!         Scheduler::new(tables.clone()),
//!         blobs,
//!         tables,
//!         config,
//!     );
//!
//!     let signals = SignalHandler::new();
//!     signals.spawn_listener();
//!     let source = Arc::new(StaticHubSource::new(HubDirectory::default()));
//!     Worker::new(aggregator, source, signals.shutdown_handle())?.run().await?;
//!     Ok(())
//! }
//! ```

mod aggregator;
mod config;
mod error;
mod scheduler;
mod signals;
mod worker;

pub use aggregator::{Aggregator, FlavorReport, FlavorStatus, RunOutcome, RunSummary};
pub use config::WorkerConfig;
pub use error::{ServerError, ServerResult};
pub use scheduler::{
    HubStatus, LOCK_PARTITION, LockOutcome, LockRecord, MASTER_PARTITION, Scheduler,
    TASKS_TABLE, TaskRecord,
};
pub use signals::{ReloadSignal, ShutdownHandle, SignalHandler};
pub use worker::{SharedWorkerState, Worker, WorkerCommand, WorkerHandle, WorkerState};
