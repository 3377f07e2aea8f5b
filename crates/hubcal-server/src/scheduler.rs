//! Task and lock records for hub aggregation runs.
//!
//! Each hub has one task record in the `master` partition of the `tasks`
//! table (`start`, `stop`, `running`) and, while a run is in progress, a lock
//! record in the `lock` partition. Locks are taken with an atomic
//! insert-if-absent so two workers sharing a store never run the same hub at
//! once.
//!
//! ```text
//!  uninitialized ──init──▶ idle ──maybe_start (interval elapsed)──▶ running
//!                           ▲                                         │
//!                           └──────────────────stop───────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hubcal_core::HubDirectory;
use hubcal_store::{InsertOutcome, TableEntity, TableStore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::ServerResult;

/// Table holding task and lock records.
pub const TASKS_TABLE: &str = "tasks";

/// Partition of task records.
pub const MASTER_PARTITION: &str = "master";

/// Partition of lock records.
pub const LOCK_PARTITION: &str = "lock";

/// A hub's task record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    /// Hub id.
    pub hub: String,
    /// When the latest run started.
    pub start: DateTime<Utc>,
    /// When the latest run stopped.
    pub stop: DateTime<Utc>,
    /// Whether a run is in progress.
    pub running: bool,
}

impl TaskRecord {
    /// An idle task that has never run.
    pub fn idle(hub: impl Into<String>) -> Self {
        Self {
            hub: hub.into(),
            start: DateTime::<Utc>::UNIX_EPOCH,
            stop: DateTime::<Utc>::UNIX_EPOCH,
            running: false,
        }
    }

    fn to_entity(&self) -> TableEntity {
        TableEntity::new(MASTER_PARTITION, &self.hub)
            .with_time("start", self.start)
            .with_time("stop", self.stop)
            .with("running", self.running)
    }

    fn from_entity(entity: &TableEntity) -> Self {
        Self {
            hub: entity.row.clone(),
            start: entity.get_time("start").unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            stop: entity.get_time("stop").unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            running: entity.get_bool("running").unwrap_or(false),
        }
    }
}

/// A hub's lock record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Hub id.
    pub hub: String,
    /// When the lock was taken.
    pub locked_at: Option<DateTime<Utc>>,
    /// Worker that took the lock.
    pub owner: String,
}

impl LockRecord {
    fn from_entity(entity: &TableEntity) -> Self {
        Self {
            hub: entity.row.clone(),
            locked_at: entity.get_time("locked_at"),
            owner: entity.get_str("owner").unwrap_or_default().to_string(),
        }
    }
}

/// Result of trying to lock a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The lock was taken by this worker.
    Acquired,
    /// Another run holds the lock.
    AlreadyLocked,
}

/// Scheduling state of one hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStatus {
    /// Hub id.
    pub hub: String,
    /// Task record, if created.
    pub task: Option<TaskRecord>,
    /// Lock record, if held.
    pub lock: Option<LockRecord>,
    /// Whether the latest run looks abandoned.
    pub abandoned: bool,
}

/// Reads and writes task and lock records.
#[derive(Clone)]
pub struct Scheduler {
    tables: Arc<dyn TableStore>,
    owner: String,
}

impl Scheduler {
    /// Creates a scheduler with a random owner id for its locks.
    pub fn new(tables: Arc<dyn TableStore>) -> Self {
        Self::with_owner(tables, Uuid::new_v4().to_string())
    }

    /// Creates a scheduler with a fixed owner id.
    pub fn with_owner(tables: Arc<dyn TableStore>, owner: impl Into<String>) -> Self {
        Self {
            tables,
            owner: owner.into(),
        }
    }

    /// Returns this scheduler's lock owner id.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Clears the hub's lock and resets its task to idle.
    pub async fn init(&self, hub: &str) -> ServerResult<()> {
        self.unlock(hub).await?;
        self.tables
            .upsert(TASKS_TABLE, TaskRecord::idle(hub).to_entity())
            .await?;
        info!(hub, "task initialized");
        Ok(())
    }

    /// Creates an idle task record if the hub has none.
    pub async fn ensure_task_record(&self, hub: &str) -> ServerResult<()> {
        let outcome = self
            .tables
            .insert_if_absent(TASKS_TABLE, TaskRecord::idle(hub).to_entity())
            .await?;
        if outcome == InsertOutcome::Inserted {
            info!(hub, "created task record");
        }
        Ok(())
    }

    /// Reads the hub's task record.
    pub async fn task(&self, hub: &str) -> ServerResult<Option<TaskRecord>> {
        let entity = self.tables.get(TASKS_TABLE, MASTER_PARTITION, hub).await?;
        Ok(entity.as_ref().map(TaskRecord::from_entity))
    }

    /// Marks the hub's task running from `now`.
    pub async fn start(&self, hub: &str, now: DateTime<Utc>) -> ServerResult<()> {
        let entity = TableEntity::new(MASTER_PARTITION, hub)
            .with_time("start", now)
            .with("running", true);
        self.tables.upsert(TASKS_TABLE, entity).await?;
        info!(hub, "task started");
        Ok(())
    }

    /// Starts the task if more than `interval` has passed since its last
    /// start. Returns whether it started.
    pub async fn maybe_start(
        &self,
        hub: &str,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> ServerResult<bool> {
        let Some(task) = self.task(hub).await? else {
            error!(hub, "task record does not exist but should");
            return Ok(false);
        };
        if !elapsed_beyond(task.start, now, interval) {
            debug!(hub, start = %task.start, "not due");
            return Ok(false);
        }
        self.start(hub, now).await?;
        Ok(true)
    }

    /// Marks the hub's task stopped at `now`.
    pub async fn stop(&self, hub: &str, now: DateTime<Utc>) -> ServerResult<()> {
        let entity = TableEntity::new(MASTER_PARTITION, hub)
            .with_time("stop", now)
            .with("running", false);
        self.tables.upsert(TASKS_TABLE, entity).await?;
        info!(hub, "task stopped");
        Ok(())
    }

    /// Takes the hub's lock.
    pub async fn lock(&self, hub: &str, now: DateTime<Utc>) -> ServerResult<LockOutcome> {
        let entity = TableEntity::new(LOCK_PARTITION, hub)
            .with_time("locked_at", now)
            .with("owner", self.owner.as_str());
        match self.tables.insert_if_absent(TASKS_TABLE, entity).await? {
            InsertOutcome::Inserted => {
                debug!(hub, owner = %self.owner, "locked");
                Ok(LockOutcome::Acquired)
            }
            InsertOutcome::AlreadyExists => {
                warn!(hub, "expected to create lock but could not");
                Ok(LockOutcome::AlreadyLocked)
            }
        }
    }

    /// Releases the hub's lock. Returns true if a lock existed.
    pub async fn unlock(&self, hub: &str) -> ServerResult<bool> {
        let existed = self.tables.delete(TASKS_TABLE, LOCK_PARTITION, hub).await?;
        if existed {
            debug!(hub, "unlocked");
        }
        Ok(existed)
    }

    /// Reads the hub's lock record.
    pub async fn lock_record(&self, hub: &str) -> ServerResult<Option<LockRecord>> {
        let entity = self.tables.get(TASKS_TABLE, LOCK_PARTITION, hub).await?;
        Ok(entity.as_ref().map(LockRecord::from_entity))
    }

    /// Returns true if the hub is locked.
    pub async fn is_locked(&self, hub: &str) -> ServerResult<bool> {
        Ok(self.lock_record(hub).await?.is_some())
    }

    /// Returns true if the hub's last run looks abandoned: a lock is held
    /// while the task is not running, or the task started more than
    /// `interval` ago.
    pub async fn is_abandoned(
        &self,
        hub: &str,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> ServerResult<bool> {
        let task = self.task(hub).await?.unwrap_or_else(|| TaskRecord::idle(hub));
        if !task.running && self.is_locked(hub).await? {
            return Ok(true);
        }
        Ok(elapsed_beyond(task.start, now, interval))
    }

    /// Returns the scheduling state of a hub.
    pub async fn status(
        &self,
        hub: &str,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> ServerResult<HubStatus> {
        Ok(HubStatus {
            hub: hub.to_string(),
            task: self.task(hub).await?,
            lock: self.lock_record(hub).await?,
            abandoned: self.is_abandoned(hub, now, interval).await?,
        })
    }

    /// Lists the hubs whose last run looks abandoned.
    ///
    /// Hubs that never got a task record are skipped.
    pub async fn abandoned_hubs(
        &self,
        directory: &HubDirectory,
        now: DateTime<Utc>,
        config: &WorkerConfig,
    ) -> ServerResult<Vec<String>> {
        let mut abandoned = Vec::new();
        for hub in directory.iter() {
            let task = self.task(&hub.id).await?;
            let Some(task) = task else {
                continue;
            };
            if !task.running && !self.is_locked(&hub.id).await? {
                continue;
            }
            if self.is_abandoned(&hub.id, now, config.interval_for(hub.kind)).await? {
                abandoned.push(hub.id.clone());
            }
        }
        Ok(abandoned)
    }
}

fn elapsed_beyond(start: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> bool {
    let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);
    now.signed_duration_since(start) > interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hubcal_core::{FeedSpec, HubDefinition};
    use hubcal_store::MemoryTableStore;

    const HOUR: Duration = Duration::from_secs(3600);

    fn scheduler() -> Scheduler {
        Scheduler::with_owner(Arc::new(MemoryTableStore::new()), "worker-1")
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, 1, h, 0, 0).unwrap()
    }

    mod tasks {
        use super::*;

        #[tokio::test]
        async fn init_resets_to_idle() {
            let s = scheduler();
            s.start("elmcity", at(9)).await.unwrap();
            s.lock("elmcity", at(9)).await.unwrap();

            s.init("elmcity").await.unwrap();

            assert_eq!(s.task("elmcity").await.unwrap(), Some(TaskRecord::idle("elmcity")));
            assert!(!s.is_locked("elmcity").await.unwrap());
        }

        #[tokio::test]
        async fn ensure_keeps_existing_record() {
            let s = scheduler();
            s.ensure_task_record("elmcity").await.unwrap();
            s.start("elmcity", at(9)).await.unwrap();
            s.ensure_task_record("elmcity").await.unwrap();

            let task = s.task("elmcity").await.unwrap().unwrap();
            assert!(task.running);
            assert_eq!(task.start, at(9));
        }

        #[tokio::test]
        async fn maybe_start_without_record_is_false() {
            let s = scheduler();
            assert!(!s.maybe_start("elmcity", at(9), 8 * HOUR).await.unwrap());
            assert!(s.task("elmcity").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn maybe_start_honours_interval() {
            let s = scheduler();
            s.ensure_task_record("elmcity").await.unwrap();

            assert!(s.maybe_start("elmcity", at(9), 8 * HOUR).await.unwrap());
            s.stop("elmcity", at(10)).await.unwrap();
            assert!(!s.maybe_start("elmcity", at(16), 8 * HOUR).await.unwrap());
            assert!(!s.maybe_start("elmcity", at(17), 8 * HOUR).await.unwrap());
            assert!(s.maybe_start("elmcity", at(18), 8 * HOUR).await.unwrap());

            let task = s.task("elmcity").await.unwrap().unwrap();
            assert_eq!(task.start, at(18));
            assert_eq!(task.stop, at(10));
            assert!(task.running);
        }
    }

    mod locks {
        use super::*;

        #[tokio::test]
        async fn mutual_exclusion() {
            let tables: Arc<dyn TableStore> = Arc::new(MemoryTableStore::new());
            let a = Scheduler::with_owner(tables.clone(), "a");
            let b = Scheduler::with_owner(tables, "b");

            assert_eq!(a.lock("elmcity", at(9)).await.unwrap(), LockOutcome::Acquired);
            assert_eq!(b.lock("elmcity", at(9)).await.unwrap(), LockOutcome::AlreadyLocked);
            assert_eq!(b.lock_record("elmcity").await.unwrap().unwrap().owner, "a");

            assert!(a.unlock("elmcity").await.unwrap());
            assert!(!a.unlock("elmcity").await.unwrap());
            assert_eq!(b.lock("elmcity", at(10)).await.unwrap(), LockOutcome::Acquired);
            let lock = a.lock_record("elmcity").await.unwrap().unwrap();
            assert_eq!(lock.owner, "b");
            assert_eq!(lock.locked_at, Some(at(10)));
        }

        #[tokio::test]
        async fn random_owners_differ() {
            let tables: Arc<dyn TableStore> = Arc::new(MemoryTableStore::new());
            assert_ne!(Scheduler::new(tables.clone()).owner(), Scheduler::new(tables).owner());
        }
    }

    mod abandonment {
        use super::*;

        #[tokio::test]
        async fn lock_without_running_task() {
            let s = scheduler();
            s.ensure_task_record("elmcity").await.unwrap();
            s.start("elmcity", at(9)).await.unwrap();
            s.stop("elmcity", at(9)).await.unwrap();
            s.lock("elmcity", at(9)).await.unwrap();

            assert!(s.is_abandoned("elmcity", at(10), 8 * HOUR).await.unwrap());
        }

        #[tokio::test]
        async fn running_within_interval_is_live() {
            let s = scheduler();
            s.ensure_task_record("elmcity").await.unwrap();
            s.start("elmcity", at(9)).await.unwrap();
            s.lock("elmcity", at(9)).await.unwrap();

            assert!(!s.is_abandoned("elmcity", at(10), 8 * HOUR).await.unwrap());
            assert!(s.is_abandoned("elmcity", at(18), 8 * HOUR).await.unwrap());
        }

        #[tokio::test]
        async fn lists_abandoned_hubs() {
            let s = scheduler();
            let feed = FeedSpec::new("http://a.org/cal.ics", "A");
            let directory = HubDirectory::new(vec![
                HubDefinition::place("stuck", "eastern", "keene,nh").with_feed(feed.clone()),
                HubDefinition::place("busy", "eastern", "keene,nh").with_feed(feed.clone()),
                HubDefinition::place("idle", "eastern", "keene,nh").with_feed(feed.clone()),
                HubDefinition::place("new", "eastern", "keene,nh").with_feed(feed),
            ]);
            for hub in ["stuck", "busy", "idle"] {
                s.ensure_task_record(hub).await.unwrap();
            }
            s.start("stuck", at(0)).await.unwrap();
            s.start("busy", at(9)).await.unwrap();

            let abandoned = s
                .abandoned_hubs(&directory, at(10), &WorkerConfig::default())
                .await
                .unwrap();
            assert_eq!(abandoned, vec!["stuck".to_string()]);

            let status = s.status("stuck", at(10), 8 * HOUR).await.unwrap();
            assert!(status.abandoned);
            assert!(status.lock.is_none());
        }
    }
}
