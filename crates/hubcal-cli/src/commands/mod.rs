//! Subcommand implementations.

pub mod aggregate;
pub mod config;
pub mod days;
pub mod status;
pub mod worker;

use std::sync::Arc;

use hubcal_collector::{EventCollector, ReqwestFetcher};
use hubcal_server::{Aggregator, Scheduler};
use hubcal_store::{BlobStore, FsBlobStore, FsTableStore, TableStore};
use tracing::debug;

use crate::config::AppConfig;
use crate::error::CliResult;

/// Table and blob stores under the configured root.
#[derive(Clone)]
pub struct Stores {
    pub blobs: Arc<dyn BlobStore>,
    pub tables: Arc<dyn TableStore>,
}

impl Stores {
    /// Opens the file-backed stores.
    pub fn open(config: &AppConfig) -> Self {
        let root = config.storage_root();
        debug!(root = %root.display(), "opening stores");
        Self {
            blobs: Arc::new(FsBlobStore::new(root.clone())),
            tables: Arc::new(FsTableStore::new(root)),
        }
    }

    /// Returns a scheduler over the task and lock tables.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.tables.clone())
    }
}

/// Builds an aggregator that fetches over HTTP.
pub fn build_aggregator(config: &AppConfig, stores: &Stores) -> CliResult<Aggregator> {
    let worker = config.to_worker_config();
    let collector = EventCollector::new(
        Arc::new(ReqwestFetcher::new()?),
        stores.blobs.clone(),
        stores.tables.clone(),
        config.credentials.clone(),
        worker.collect.clone(),
    );
    Ok(Aggregator::new(
        collector,
        stores.scheduler(),
        stores.blobs.clone(),
        stores.tables.clone(),
        worker,
    ))
}
