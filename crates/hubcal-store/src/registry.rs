//! Feed registry and per-source statistics.
//!
//! The registry is the ordered list of a hub's iCalendar feeds with one
//! [`IcalStats`] record each. Stats for every feed are saved together in the
//! hub's `ical_stats.json` blob and the total number of loaded events lands
//! in the hub's summary record. Non-ical flavors keep one [`NonIcalStats`]
//! each in `{flavor}_stats.json`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hubcal_core::{FeedSpec, SourceFlavor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::blob::BlobStore;
use crate::error::StoreResult;
use crate::table::{TableEntity, TableStore};

/// Table holding per-hub summary records.
pub const METADATA_TABLE: &str = "metadata";

/// Blob name of the ical stats map.
pub const ICAL_STATS_BLOB: &str = "ical_stats.json";

/// Returns the summary record key for a hub, to be filled with counts.
pub fn summary_entity(hub: &str) -> TableEntity {
    TableEntity::new(hub, hub)
}

/// Health and counts of one iCalendar feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcalStats {
    /// Producer id declared by the feed, or `unknown`.
    pub prodid: String,
    /// Source name the feed is registered under.
    pub source: String,
    /// Parsed and structurally complete.
    pub valid: bool,
    /// Structural validation score, 0 to 100.
    pub score: u8,
    /// Events added to the zoned store from this feed.
    pub loaded: u64,
    /// Last fetch or parse error; empty when the last pass succeeded.
    pub dday_error: String,
    /// Response content type.
    pub contenttype: String,
    /// Non-recurring events seen.
    pub singlecount: u64,
    /// Distinct recurring events seen.
    pub recurringcount: u64,
    /// Occurrences produced by recurrence expansion.
    pub recurringinstancecount: u64,
    /// Events at or after midnight today.
    pub futurecount: u64,
    /// When the feed was last processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whenchecked: Option<DateTime<Utc>>,
}

impl IcalStats {
    /// Creates empty stats for a source.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }
}

/// Counts for one non-ical flavor of a hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonIcalStats {
    /// Events kept after coalescing.
    pub eventcount: u64,
    /// Distinct venues among them.
    pub venuecount: u64,
    /// When the flavor was last collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whenchecked: Option<DateTime<Utc>>,
}

impl NonIcalStats {
    /// Returns the blob name for a flavor's stats.
    pub fn blob_name(flavor: SourceFlavor) -> String {
        format!("{flavor}_stats.json")
    }

    /// Writes the stats blob and the flavor's count in the summary record.
    pub async fn save(
        &self,
        hub: &str,
        flavor: SourceFlavor,
        blobs: &dyn BlobStore,
        tables: &dyn TableStore,
    ) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        blobs.put(hub, &Self::blob_name(flavor), bytes).await?;
        tables
            .upsert(
                METADATA_TABLE,
                summary_entity(hub).with(format!("{flavor}_events"), self.eventcount),
            )
            .await?;
        debug!(hub, %flavor, events = self.eventcount, venues = self.venuecount, "saved flavor stats");
        Ok(())
    }

    /// Reads a flavor's stats, if saved.
    pub async fn load(
        hub: &str,
        flavor: SourceFlavor,
        blobs: &dyn BlobStore,
    ) -> StoreResult<Option<Self>> {
        match blobs.get(hub, &Self::blob_name(flavor)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// The iCalendar feeds of a hub and their stats.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedRegistry {
    hub: String,
    feeds: Vec<(String, String)>,
    stats: BTreeMap<String, IcalStats>,
}

impl FeedRegistry {
    /// Creates an empty registry.
    pub fn new(hub: impl Into<String>) -> Self {
        Self {
            hub: hub.into(),
            ..Default::default()
        }
    }

    /// Creates a registry from configured feeds. Repeated URLs are skipped.
    pub fn from_specs(hub: impl Into<String>, specs: &[FeedSpec]) -> Self {
        let mut registry = Self::new(hub);
        for spec in specs {
            registry.add_feed(&spec.url, &spec.source);
        }
        registry
    }

    /// Returns the hub id.
    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// Registers a feed. Returns false, changing nothing, if the URL is
    /// already registered.
    pub fn add_feed(&mut self, url: &str, source: &str) -> bool {
        if self.stats.contains_key(url) {
            warn!(hub = %self.hub, feed = url, source, "feed already registered");
            return false;
        }
        self.feeds.push((url.to_string(), source.to_string()));
        self.stats.insert(url.to_string(), IcalStats::new(source));
        true
    }

    /// Iterates over `(url, source)` pairs in registration order.
    pub fn feeds(&self) -> impl Iterator<Item = (&str, &str)> {
        self.feeds.iter().map(|(u, s)| (u.as_str(), s.as_str()))
    }

    /// Returns the number of registered feeds.
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    /// Returns true if no feed is registered.
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Returns the source name of a feed.
    pub fn source_of(&self, url: &str) -> Option<&str> {
        self.feeds
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, s)| s.as_str())
    }

    /// Returns a feed's stats.
    pub fn stats(&self, url: &str) -> Option<&IcalStats> {
        self.stats.get(url)
    }

    /// Returns a feed's stats for update.
    pub fn stats_mut(&mut self, url: &str) -> Option<&mut IcalStats> {
        self.stats.get_mut(url)
    }

    /// Replaces a registered feed's stats. Unregistered URLs are ignored.
    pub fn record(&mut self, url: &str, stats: IcalStats) {
        if let Some(slot) = self.stats.get_mut(url) {
            *slot = stats;
        }
    }

    /// Returns the total events loaded across feeds.
    pub fn total_loaded(&self) -> u64 {
        self.stats.values().map(|s| s.loaded).sum()
    }

    /// Restores stats saved by an earlier run, for feeds still registered.
    pub async fn load_stats(&mut self, blobs: &dyn BlobStore) -> StoreResult<()> {
        let Some(bytes) = blobs.get(&self.hub, ICAL_STATS_BLOB).await? else {
            return Ok(());
        };
        let saved: BTreeMap<String, IcalStats> = serde_json::from_slice(&bytes)?;
        let mut restored = 0usize;
        for (url, mut stats) in saved {
            if let Some(source) = self.source_of(&url).map(str::to_string) {
                stats.source = source;
                self.stats.insert(url, stats);
                restored += 1;
            }
        }
        debug!(hub = %self.hub, restored, "loaded feed stats");
        Ok(())
    }

    /// Saves every feed's stats and the loaded-event total.
    pub async fn save_stats(&self, blobs: &dyn BlobStore, tables: &dyn TableStore) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(&self.stats)?;
        blobs.put(&self.hub, ICAL_STATS_BLOB, bytes).await?;
        tables
            .upsert(
                METADATA_TABLE,
                summary_entity(&self.hub).with("ical_events", self.total_loaded()),
            )
            .await?;
        debug!(hub = %self.hub, feeds = self.len(), loaded = self.total_loaded(), "saved feed stats");
        Ok(())
    }
}
