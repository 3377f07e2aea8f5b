//! One aggregation run of one hub.
//!
//! A run collects every active flavor concurrently, merges the zoned stores
//! into the hub's zoneless store and records when it finished. [`Aggregator::run`]
//! wraps that in the task/lock protocol of [`Scheduler`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use hubcal_collector::{CollectorErrorCode, EventCollector, StopSignal};
use hubcal_core::{HubDefinition, HubSettings, SourceFlavor};
use hubcal_store::{
    BlobStore, METADATA_TABLE, TableStore, ZonedEventStore, ZonelessEventStore,
    merge_zoned_stores, summary_entity,
};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{ServerError, ServerResult};
use crate::scheduler::{LockOutcome, Scheduler};

/// How one flavor fared in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlavorStatus {
    /// Collected fresh events.
    Collected { count: usize },
    /// Disabled or unconfigured.
    Skipped,
    /// Failed; the previously saved store, if any, was used instead.
    Failed { error: String, retained: bool },
}

/// Result of collecting one flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorReport {
    /// The flavor.
    pub flavor: SourceFlavor,
    /// What happened.
    pub status: FlavorStatus,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Hub id.
    pub hub: String,
    /// Per-flavor outcomes, ical first.
    pub flavors: Vec<FlavorReport>,
    /// Events in the merged store.
    pub events: usize,
    /// When the merged store was written.
    pub aggregated_at: DateTime<Utc>,
}

/// What [`Aggregator::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run finished.
    Completed(RunSummary),
    /// The interval has not elapsed since the last start.
    NotDue,
    /// Another run holds the hub's lock.
    Locked,
}

/// Runs hub aggregations.
#[derive(Clone)]
pub struct Aggregator {
    collector: EventCollector,
    scheduler: Scheduler,
    blobs: Arc<dyn BlobStore>,
    tables: Arc<dyn TableStore>,
    config: WorkerConfig,
}

impl Aggregator {
    /// Creates an aggregator.
    pub fn new(
        collector: EventCollector,
        scheduler: Scheduler,
        blobs: Arc<dyn BlobStore>,
        tables: Arc<dyn TableStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            collector,
            scheduler,
            blobs,
            tables,
            config,
        }
    }

    /// Returns the scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns the worker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Runs a hub under the task/lock protocol.
    ///
    /// A held lock, abandoned or not, means the run does not start; clearing
    /// an abandoned lock is left to the operator. Unless `force` is set the
    /// run only starts once the hub's interval has elapsed. The lock is
    /// released on every exit; the task is marked stopped only when the run
    /// finishes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any network access when the hub
    /// does not resolve, [`ServerError::Shutdown`] when stopped mid-run, or a
    /// storage error.
    pub async fn run(
        &self,
        definition: &HubDefinition,
        now: DateTime<Utc>,
        force: bool,
        stop: &StopSignal,
    ) -> ServerResult<RunOutcome> {
        let settings = definition.resolve().inspect_err(|e| {
            error!(hub = %definition.id, error = %e, "hub configuration rejected");
        })?;
        let hub = settings.id.as_str();
        let interval = self.config.interval_for(settings.kind);

        self.scheduler.ensure_task_record(hub).await?;
        if self.scheduler.is_locked(hub).await? {
            if self.scheduler.is_abandoned(hub, now, interval).await? {
                warn!(hub, "lock looks abandoned; clear it with `hubcal unlock`");
            } else {
                debug!(hub, "locked, skipping");
            }
            return Ok(RunOutcome::Locked);
        }
        if self.scheduler.lock(hub, now).await? == LockOutcome::AlreadyLocked {
            return Ok(RunOutcome::Locked);
        }

        let started = if force {
            self.scheduler.start(hub, now).await.map(|()| true)
        } else {
            self.scheduler.maybe_start(hub, now, interval).await
        };
        let started = match started {
            Ok(started) => started,
            Err(e) => {
                self.scheduler.unlock(hub).await?;
                return Err(e);
            }
        };
        if !started {
            self.scheduler.unlock(hub).await?;
            return Ok(RunOutcome::NotDue);
        }

        let result = self.aggregate(&settings, now, stop).await;
        if result.is_ok() {
            self.scheduler.stop(hub, now).await?;
        }
        self.scheduler.unlock(hub).await?;
        result.map(RunOutcome::Completed)
    }

    /// Collects every active flavor, merges and saves the zoneless store.
    ///
    /// A failed flavor contributes its previously saved store so one broken
    /// source does not empty the hub.
    pub async fn aggregate(
        &self,
        settings: &HubSettings,
        now: DateTime<Utc>,
        stop: &StopSignal,
    ) -> ServerResult<RunSummary> {
        let hub = settings.id.as_str();
        info!(hub, "aggregating");
        let flavors = settings.active_flavors();
        let results = join_all(
            flavors
                .iter()
                .map(|&flavor| self.collector.collect(settings, flavor, now, stop)),
        )
        .await;

        let mut stores = Vec::new();
        let mut reports = Vec::with_capacity(flavors.len());
        for (&flavor, result) in flavors.iter().zip(results) {
            let status = match result {
                Ok(Some(store)) => {
                    let count = store.len();
                    stores.push(store);
                    FlavorStatus::Collected { count }
                }
                Ok(None) => FlavorStatus::Skipped,
                Err(e) if e.code() == CollectorErrorCode::Cancelled => {
                    info!(hub, %flavor, "run cancelled");
                    return Err(ServerError::Shutdown);
                }
                Err(e) => {
                    warn!(hub, %flavor, error = %e, "flavor failed, keeping prior data");
                    let previous = ZonedEventStore::load(self.blobs.as_ref(), hub, flavor).await?;
                    let retained = previous.is_some();
                    stores.extend(previous);
                    FlavorStatus::Failed {
                        error: e.to_string(),
                        retained,
                    }
                }
            };
            reports.push(FlavorReport { flavor, status });
        }
        if stop.is_requested() {
            return Err(ServerError::Shutdown);
        }

        let merged = merge_zoned_stores(hub, settings.tz, &stores, now, self.config.dedup_mode);
        merged.save(self.blobs.as_ref()).await?;
        self.tables
            .upsert(METADATA_TABLE, summary_entity(hub).with_time("aggregated_at", now))
            .await?;

        info!(hub, count = merged.len(), "aggregated");
        Ok(RunSummary {
            hub: hub.to_string(),
            flavors: reports,
            events: merged.len(),
            aggregated_at: now,
        })
    }

    /// Reads the hub's merged store.
    pub async fn merged(&self, hub: &str) -> ServerResult<Option<ZonelessEventStore>> {
        Ok(ZonelessEventStore::load(self.blobs.as_ref(), hub).await?)
    }

    /// Returns when the hub was last aggregated.
    pub async fn aggregated_at(&self, hub: &str) -> ServerResult<Option<DateTime<Utc>>> {
        let summary = self.tables.get(METADATA_TABLE, hub, hub).await?;
        Ok(summary.and_then(|s| s.get_time("aggregated_at")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hubcal_collector::{
        CollectOptions, Credentials, HttpFetcher, RetryPolicy, StaticFetcher, StaticResponse,
    };
    use hubcal_core::FeedSpec;
    use crate::scheduler::LockOutcome;
    use hubcal_store::{FsTableStore, MemoryBlobStore, MemoryTableStore};
    use std::time::Duration;

    const FEED_A: &str = "http://a.org/cal.ics";
    const FEED_B: &str = "http://b.org/cal.ics";
    const FEED_C: &str = "http://c.org/cal.ics";

    fn ics(uid: &str, summary: &str, day: u32) -> String {
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//T//T//EN\r\n\
             BEGIN:VEVENT\r\nUID:{uid}\r\nSUMMARY:{summary}\r\n\
             DTSTART;TZID=America/New_York:203003{day:02}T190000\r\nEND:VEVENT\r\n\
             END:VCALENDAR\r\n"
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, 1, 14, 0, 0).unwrap()
    }

    fn hub() -> HubDefinition {
        HubDefinition::place("elmcity", "eastern", "keene,nh")
            .with_feed(FeedSpec::new(FEED_A, "A"))
            .with_feed(FeedSpec::new(FEED_B, "B"))
            .with_feed(FeedSpec::new(FEED_C, "C"))
    }

    fn healthy() -> StaticFetcher {
        StaticFetcher::new()
            .with_response(FEED_A, StaticResponse::ok(ics("a1", "Contra dance", 5), "text/calendar"))
            .with_response(FEED_B, StaticResponse::ok(ics("b1", "Book club", 6), "text/calendar"))
            .with_response(FEED_C, StaticResponse::ok(ics("c1", "Contra dance", 5), "text/calendar"))
    }

    struct Harness {
        blobs: Arc<MemoryBlobStore>,
        tables: Arc<dyn TableStore>,
        aggregator: Aggregator,
    }

    fn harness(fetcher: Arc<dyn HttpFetcher>) -> Harness {
        build(
            fetcher,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryTableStore::new()),
            Credentials::default(),
            "test",
        )
    }

    fn build(
        fetcher: Arc<dyn HttpFetcher>,
        blobs: Arc<MemoryBlobStore>,
        tables: Arc<dyn TableStore>,
        credentials: Credentials,
        owner: &str,
    ) -> Harness {
        let collect = CollectOptions {
            retry: RetryPolicy {
                wait: Duration::from_millis(1),
                max_attempts: 1,
                timeout: Duration::from_secs(5),
            },
            ..Default::default()
        };
        let config = WorkerConfig::default().with_collect(collect.clone());
        let collector = EventCollector::new(
            fetcher,
            blobs.clone(),
            tables.clone(),
            credentials,
            collect,
        );
        let scheduler = Scheduler::with_owner(tables.clone(), owner);
        Harness {
            aggregator: Aggregator::new(collector, scheduler, blobs.clone(), tables.clone(), config),
            blobs,
            tables,
        }
    }

    async fn zoneless_bytes(blobs: &MemoryBlobStore) -> Vec<u8> {
        blobs
            .get("elmcity", "elmcity.zoneless.json")
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn merges_feeds_and_records_time() {
        let h = harness(Arc::new(healthy()));

        let outcome = h.aggregator.run(&hub(), now(), false, &StopSignal::never()).await.unwrap();

        let RunOutcome::Completed(summary) = outcome else {
            panic!("expected a completed run, got {outcome:?}");
        };
        assert_eq!(summary.events, 2);
        assert_eq!(summary.flavors.len(), 1);
        assert_eq!(summary.flavors[0].status, FlavorStatus::Collected { count: 3 });

        let merged = h.aggregator.merged("elmcity").await.unwrap().unwrap();
        assert_eq!(merged.events[0].event.title, "Contra dance");
        assert_eq!(merged.events[1].event.title, "Book club");
        assert_eq!(h.aggregator.aggregated_at("elmcity").await.unwrap(), Some(now()));

        let scheduler = h.aggregator.scheduler();
        assert!(!scheduler.is_locked("elmcity").await.unwrap());
        let task = scheduler.task("elmcity").await.unwrap().unwrap();
        assert!(!task.running);
        assert_eq!(task.stop, now());
    }

    #[tokio::test]
    async fn re_aggregation_is_byte_stable() {
        let h = harness(Arc::new(healthy()));
        let later = now() + chrono::Duration::hours(1);

        h.aggregator.run(&hub(), now(), true, &StopSignal::never()).await.unwrap();
        let first = zoneless_bytes(&h.blobs).await;
        h.aggregator.run(&hub(), later, true, &StopSignal::never()).await.unwrap();
        let second = zoneless_bytes(&h.blobs).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn second_run_within_interval_is_not_due() {
        let h = harness(Arc::new(healthy()));
        let later = now() + chrono::Duration::hours(1);

        h.aggregator.run(&hub(), now(), false, &StopSignal::never()).await.unwrap();
        let outcome = h.aggregator.run(&hub(), later, false, &StopSignal::never()).await.unwrap();

        assert_eq!(outcome, RunOutcome::NotDue);
        assert!(!h.aggregator.scheduler().is_locked("elmcity").await.unwrap());
    }

    #[tokio::test]
    async fn held_lock_blocks_run() {
        let h = harness(Arc::new(healthy()));
        let scheduler = h.aggregator.scheduler();
        scheduler.ensure_task_record("elmcity").await.unwrap();
        scheduler.start("elmcity", now()).await.unwrap();
        scheduler.lock("elmcity", now()).await.unwrap();

        let outcome = h.aggregator.run(&hub(), now(), true, &StopSignal::never()).await.unwrap();

        assert_eq!(outcome, RunOutcome::Locked);
        assert!(h.blobs.get("elmcity", "elmcity.zoneless.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn abandoned_lock_waits_for_operator() {
        let h = harness(Arc::new(healthy()));
        let scheduler = h.aggregator.scheduler();
        scheduler.ensure_task_record("elmcity").await.unwrap();
        scheduler.lock("elmcity", now()).await.unwrap();
        let interval = h.aggregator.config().where_interval;
        assert!(scheduler.is_abandoned("elmcity", now(), interval).await.unwrap());

        let outcome = h.aggregator.run(&hub(), now(), false, &StopSignal::never()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Locked);
        assert!(scheduler.is_locked("elmcity").await.unwrap());

        scheduler.init("elmcity").await.unwrap();
        let outcome = h.aggregator.run(&hub(), now(), false, &StopSignal::never()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn second_worker_leaves_a_fresh_lock_alone() {
        let a = harness(Arc::new(healthy()));
        let scheduler = a.aggregator.scheduler();
        scheduler.ensure_task_record("elmcity").await.unwrap();
        assert_eq!(scheduler.lock("elmcity", now()).await.unwrap(), LockOutcome::Acquired);

        let fetcher = Arc::new(healthy());
        let b = build(
            fetcher.clone(),
            a.blobs.clone(),
            a.tables.clone(),
            Credentials::default(),
            "worker-b",
        );
        for force in [false, true] {
            let outcome = b.aggregator.run(&hub(), now(), force, &StopSignal::never()).await.unwrap();
            assert_eq!(outcome, RunOutcome::Locked);
        }

        let lock = scheduler.lock_record("elmcity").await.unwrap().unwrap();
        assert_eq!(lock.owner, "test");
        assert!(fetcher.requested_urls().await.is_empty());
        assert!(a.blobs.get("elmcity", "elmcity.zoneless.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_flavors_all_reach_the_summary() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"data": [
            {"id": "1", "name": "Open mic", "location": "Tavern", "start_time": "2030-03-05T21:00:00"}
        ]}"#;
        let fetcher = healthy().with_response(
            "https://graph.facebook.com/",
            StaticResponse::ok(body, "application/json"),
        );
        let credentials = Credentials {
            facebook_access_token: Some("TOKEN".into()),
            ..Default::default()
        };
        let tables: Arc<dyn TableStore> = Arc::new(FsTableStore::new(dir.path()));
        let h = build(
            Arc::new(fetcher),
            Arc::new(MemoryBlobStore::new()),
            tables.clone(),
            credentials,
            "test",
        );
        let def = hub().with_flavor(SourceFlavor::Facebook);

        let outcome = h.aggregator.run(&def, now(), true, &StopSignal::never()).await.unwrap();

        let RunOutcome::Completed(summary) = outcome else {
            panic!("expected a completed run, got {outcome:?}");
        };
        assert_eq!(summary.flavors.len(), 2);
        let record = tables.get(METADATA_TABLE, "elmcity", "elmcity").await.unwrap().unwrap();
        assert_eq!(record.get_u64("ical_events"), Some(3));
        assert_eq!(record.get_u64("facebook_events"), Some(1));
        assert_eq!(record.get_time("aggregated_at"), Some(now()));
    }

    #[tokio::test]
    async fn failing_feed_is_isolated() {
        let fetcher = Arc::new(healthy());
        let h = harness(fetcher.clone());
        h.aggregator.run(&hub(), now(), true, &StopSignal::never()).await.unwrap();

        fetcher.set_response(FEED_B, StaticResponse::status(500)).await;
        fetcher.set_response(FEED_A, StaticResponse::ok(ics("a2", "Poetry slam", 7), "text/calendar")).await;
        h.aggregator.run(&hub(), now(), true, &StopSignal::never()).await.unwrap();

        let merged = h.aggregator.merged("elmcity").await.unwrap().unwrap();
        let titles: Vec<_> = merged.events.iter().map(|e| e.event.title.as_str()).collect();
        assert_eq!(titles, vec!["Contra dance", "Book club", "Poetry slam"]);
    }

    #[tokio::test]
    async fn unresolvable_hub_fails_before_network() {
        let fetcher = Arc::new(healthy());
        let h = harness(fetcher.clone());
        let mut def = hub();
        def.timezone = "Nowhere/Land".into();

        let err = h.aggregator.run(&def, now(), true, &StopSignal::never()).await.unwrap_err();

        assert!(matches!(err, ServerError::Core(_)));
        assert!(fetcher.requested_urls().await.is_empty());
        assert!(h.aggregator.scheduler().task("elmcity").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_releases_lock_and_keeps_task_running() {
        let h = harness(Arc::new(healthy()));
        let (_tx, rx) = tokio::sync::watch::channel(true);

        let err = h
            .aggregator
            .run(&hub(), now(), true, &StopSignal::new(rx))
            .await
            .unwrap_err();

        assert!(err.is_shutdown());
        let scheduler = h.aggregator.scheduler();
        assert!(!scheduler.is_locked("elmcity").await.unwrap());
        assert!(scheduler.task("elmcity").await.unwrap().unwrap().running);
    }
}
