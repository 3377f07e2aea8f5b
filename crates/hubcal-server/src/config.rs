//! Worker configuration.

use std::time::Duration;

use hubcal_collector::CollectOptions;
use hubcal_core::HubKind;
use hubcal_store::DedupMode;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between polls of every hub.
    pub tick: Duration,

    /// Minimum time between runs of a place hub.
    pub where_interval: Duration,

    /// Minimum time between runs of a topic hub.
    pub what_interval: Duration,

    /// How merged events are matched across flavors.
    pub dedup_mode: DedupMode,

    /// Collection settings shared by every run.
    pub collect: CollectOptions,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            where_interval: hours(8),
            what_interval: hours(24),
            dedup_mode: DedupMode::default(),
            collect: CollectOptions::default(),
        }
    }
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h * 3600)
}

impl WorkerConfig {
    /// Builder: set the poll tick.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Builder: set both run intervals, in hours.
    pub fn with_interval_hours(mut self, where_hours: u64, what_hours: u64) -> Self {
        self.where_interval = hours(where_hours);
        self.what_interval = hours(what_hours);
        self
    }

    /// Builder: set the dedup mode.
    pub fn with_dedup_mode(mut self, mode: DedupMode) -> Self {
        self.dedup_mode = mode;
        self
    }

    /// Builder: set collection options.
    pub fn with_collect(mut self, collect: CollectOptions) -> Self {
        self.collect = collect;
        self
    }

    /// Returns the run interval for a hub kind.
    pub fn interval_for(&self, kind: HubKind) -> Duration {
        match kind {
            HubKind::Where => self.where_interval,
            HubKind::What => self.what_interval,
        }
    }
}
