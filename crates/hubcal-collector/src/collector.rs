//! Per-hub, per-flavor collection with persistence.
//!
//! An [`EventCollector`] runs one flavor for one hub and writes that
//! flavor's outputs: the zoned store, the ICS export and the stats. Merging
//! flavors is the aggregator's job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hubcal_core::{HubSettings, SourceFlavor};
use hubcal_store::{BlobStore, FeedRegistry, TableStore, ZonedEventStore};
use tracing::{info, warn};

use crate::adapter::{CollectOptions, PageQuery, convert_listings, drive_pages};
use crate::error::CollectorResult;
use crate::export::save_ics;
use crate::fetch::HttpFetcher;
use crate::ical::collect_ical;
use crate::shutdown::StopSignal;
use crate::sources::{Credentials, adapter_for};

/// Collects flavors for hubs and persists their outputs.
#[derive(Clone)]
pub struct EventCollector {
    fetcher: Arc<dyn HttpFetcher>,
    blobs: Arc<dyn BlobStore>,
    tables: Arc<dyn TableStore>,
    credentials: Credentials,
    options: CollectOptions,
}

impl EventCollector {
    /// Creates a collector.
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        blobs: Arc<dyn BlobStore>,
        tables: Arc<dyn TableStore>,
        credentials: Credentials,
        options: CollectOptions,
    ) -> Self {
        Self {
            fetcher,
            blobs,
            tables,
            credentials,
            options,
        }
    }

    /// Returns the run options.
    pub fn options(&self) -> &CollectOptions {
        &self.options
    }

    /// Collects one flavor.
    ///
    /// Returns `Ok(None)` when the flavor is disabled for the hub or has no
    /// credential.
    ///
    /// # Errors
    ///
    /// Returns the flavor's fetch error (after retries), a cancellation error,
    /// or a storage error. The previously saved store is left untouched.
    pub async fn collect(
        &self,
        settings: &HubSettings,
        flavor: SourceFlavor,
        now: DateTime<Utc>,
        stop: &StopSignal,
    ) -> CollectorResult<Option<ZonedEventStore>> {
        if flavor.is_ical() {
            return self.collect_ical(settings, now, stop).await.map(Some);
        }
        if !settings.is_enabled(flavor) {
            return Ok(None);
        }
        let Some(adapter) = adapter_for(flavor, self.fetcher.clone(), &self.credentials) else {
            warn!(hub = %settings.id, %flavor, "flavor enabled but not configured, skipping");
            return Ok(None);
        };

        let query = PageQuery::for_hub(settings, now, &self.options, adapter.page_size());
        let listings = drive_pages(adapter.as_ref(), &query, &self.options, stop).await?;
        let converted = convert_listings(flavor, settings.tz, listings, now, self.options.max_events);

        let mut store = ZonedEventStore::new(&settings.id, flavor, settings.tz);
        store.events = converted.events;
        store.save(self.blobs.as_ref()).await?;
        save_ics(&store, self.blobs.as_ref(), now).await?;
        converted
            .stats
            .save(&settings.id, flavor, self.blobs.as_ref(), self.tables.as_ref())
            .await?;

        info!(hub = %settings.id, %flavor, count = store.len(), "flavor collected");
        Ok(Some(store))
    }

    /// Collects the hub's iCalendar feeds.
    ///
    /// # Errors
    ///
    /// Returns a cancellation or storage error.
    pub async fn collect_ical(
        &self,
        settings: &HubSettings,
        now: DateTime<Utc>,
        stop: &StopSignal,
    ) -> CollectorResult<ZonedEventStore> {
        let blobs = self.blobs.as_ref();
        let mut registry = FeedRegistry::from_specs(&settings.id, &settings.feeds);
        registry.load_stats(blobs).await?;
        let previous = ZonedEventStore::load(blobs, &settings.id, SourceFlavor::Ical).await?;

        let store = collect_ical(
            settings,
            self.fetcher.as_ref(),
            &mut registry,
            previous.as_ref(),
            now,
            &self.options,
            stop,
        )
        .await?;

        store.save(blobs).await?;
        save_ics(&store, blobs, now).await?;
        registry.save_stats(blobs, self.tables.as_ref()).await?;
        Ok(store)
    }
}
