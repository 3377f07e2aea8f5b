//! Zoned and zoneless event stores.
//!
//! A [`ZonedEventStore`] holds one flavor's events for a hub, each with its
//! own zone. A [`ZonelessEventStore`] holds the merged hub view in the hub's
//! wall clock; it is what renderers read.
//!
//! Both persist as versioned JSON envelopes:
//!
//! ```json
//! { "format": "hubcal.zoneless", "version": 1, "hub": "elmcity",
//!   "timezone": "America/New_York", "events": [ ... ] }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveTime, Utc};
use hubcal_core::{
    DateKey, SourceFlavor, Tz, ZonedEvent, ZonelessEvent, midnight_in_tz, resolve_zone,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blob::BlobStore;
use crate::error::{StoreError, StoreResult};

/// Current envelope version.
pub const STORE_VERSION: u32 = 1;

const ZONED_FORMAT: &str = "hubcal.zoned";
const ZONELESS_FORMAT: &str = "hubcal.zoneless";

#[derive(Serialize)]
struct EnvelopeRef<'a, E> {
    format: &'static str,
    version: u32,
    hub: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    flavor: Option<SourceFlavor>,
    timezone: &'a str,
    events: &'a [E],
}

#[derive(Deserialize)]
struct Envelope<E> {
    format: String,
    version: u32,
    hub: String,
    #[serde(default)]
    flavor: Option<SourceFlavor>,
    timezone: String,
    events: Vec<E>,
}

impl<E> Envelope<E> {
    fn check(&self, format: &str) -> StoreResult<Tz> {
        if self.format != format {
            return Err(StoreError::schema(format!(
                "expected format {format}, found {}",
                self.format
            )));
        }
        if self.version != STORE_VERSION {
            return Err(StoreError::schema(format!(
                "unsupported {format} version {}",
                self.version
            )));
        }
        resolve_zone(&self.timezone).map_err(|e| StoreError::schema(e.to_string()))
    }
}

/// Sorts merged events by start, then case-insensitive title, then exact
/// title, then source.
pub fn sort_events(events: &mut [ZonelessEvent]) {
    events.sort_by(|a, b| {
        a.dtstart
            .cmp(&b.dtstart)
            .then_with(|| a.event.title.to_lowercase().cmp(&b.event.title.to_lowercase()))
            .then_with(|| a.event.title.cmp(&b.event.title))
            .then_with(|| a.event.source.cmp(&b.event.source))
    });
}

/// One flavor's events for a hub.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonedEventStore {
    /// Hub identifier.
    pub hub: String,
    /// Flavor that produced the events.
    pub flavor: SourceFlavor,
    /// Hub timezone.
    pub tz: Tz,
    /// Events in insertion order.
    pub events: Vec<ZonedEvent>,
}

impl ZonedEventStore {
    /// Creates an empty store.
    pub fn new(hub: impl Into<String>, flavor: SourceFlavor, tz: Tz) -> Self {
        Self {
            hub: hub.into(),
            flavor,
            tz,
            events: Vec::new(),
        }
    }

    /// Returns the blob name for a hub and flavor.
    pub fn blob_name_for(hub: &str, flavor: SourceFlavor) -> String {
        format!("{hub}.{flavor}.zoned.json")
    }

    /// Returns this store's blob name.
    pub fn blob_name(&self) -> String {
        Self::blob_name_for(&self.hub, self.flavor)
    }

    /// Appends an event.
    pub fn add(&mut self, event: ZonedEvent) {
        self.events.push(event);
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the store has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Serializes the store.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        let envelope = EnvelopeRef {
            format: ZONED_FORMAT,
            version: STORE_VERSION,
            hub: &self.hub,
            flavor: Some(self.flavor),
            timezone: self.tz.name(),
            events: &self.events,
        };
        Ok(serde_json::to_vec_pretty(&envelope)?)
    }

    /// Deserializes a store.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        let envelope: Envelope<ZonedEvent> = serde_json::from_slice(bytes)?;
        let tz = envelope.check(ZONED_FORMAT)?;
        let flavor = envelope
            .flavor
            .ok_or_else(|| StoreError::schema("zoned store without flavor"))?;
        Ok(Self {
            hub: envelope.hub,
            flavor,
            tz,
            events: envelope.events,
        })
    }

    /// Writes the store to the hub's container.
    pub async fn save(&self, blobs: &dyn BlobStore) -> StoreResult<()> {
        let bytes = self.to_bytes()?;
        blobs.put(&self.hub, &self.blob_name(), bytes).await?;
        debug!(hub = %self.hub, flavor = %self.flavor, count = self.len(), "saved zoned store");
        Ok(())
    }

    /// Reads a previously saved store, if any.
    pub async fn load(
        blobs: &dyn BlobStore,
        hub: &str,
        flavor: SourceFlavor,
    ) -> StoreResult<Option<Self>> {
        match blobs.get(hub, &Self::blob_name_for(hub, flavor)).await? {
            Some(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// The merged, deduplicated event list of a hub.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonelessEventStore {
    /// Hub identifier.
    pub hub: String,
    /// Hub timezone; event times are wall clock in this zone.
    pub tz: Tz,
    /// Events, sorted after [`ZonelessEventStore::sort`].
    pub events: Vec<ZonelessEvent>,
}

impl ZonelessEventStore {
    /// Creates an empty store.
    pub fn new(hub: impl Into<String>, tz: Tz) -> Self {
        Self {
            hub: hub.into(),
            tz,
            events: Vec::new(),
        }
    }

    /// Returns the blob name for a hub.
    pub fn blob_name_for(hub: &str) -> String {
        format!("{hub}.zoneless.json")
    }

    /// Returns this store's blob name.
    pub fn blob_name(&self) -> String {
        Self::blob_name_for(&self.hub)
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the store has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drops events starting before midnight today in the hub's zone.
    pub fn exclude_past(&mut self, now: DateTime<Utc>) {
        let midnight = midnight_in_tz(now, self.tz).local_time();
        self.events.retain(|e| e.dtstart >= midnight);
    }

    /// Sorts events with [`sort_events`].
    pub fn sort(&mut self) {
        sort_events(&mut self.events);
    }

    /// Groups events by local calendar date.
    ///
    /// Within a day, timed events come first in store order, then events
    /// starting at midnight (all-day and untimed listings).
    pub fn datekey_index(&self) -> BTreeMap<DateKey, Vec<&ZonelessEvent>> {
        let mut index: BTreeMap<DateKey, Vec<&ZonelessEvent>> = BTreeMap::new();
        for event in &self.events {
            index
                .entry(DateKey::from_local(&event.dtstart))
                .or_default()
                .push(event);
        }
        for day in index.values_mut() {
            // stable: keeps store order within each group
            day.sort_by_key(|e| e.dtstart.time() == NaiveTime::MIN);
        }
        index
    }

    /// Serializes the store.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        let envelope = EnvelopeRef {
            format: ZONELESS_FORMAT,
            version: STORE_VERSION,
            hub: &self.hub,
            flavor: None,
            timezone: self.tz.name(),
            events: &self.events,
        };
        Ok(serde_json::to_vec_pretty(&envelope)?)
    }

    /// Deserializes a store.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        let envelope: Envelope<ZonelessEvent> = serde_json::from_slice(bytes)?;
        let tz = envelope.check(ZONELESS_FORMAT)?;
        Ok(Self {
            hub: envelope.hub,
            tz,
            events: envelope.events,
        })
    }

    /// Writes the store to the hub's container.
    pub async fn save(&self, blobs: &dyn BlobStore) -> StoreResult<()> {
        let bytes = self.to_bytes()?;
        blobs.put(&self.hub, &self.blob_name(), bytes).await?;
        debug!(hub = %self.hub, count = self.len(), "saved zoneless store");
        Ok(())
    }

    /// Reads a previously saved store, if any.
    pub async fn load(blobs: &dyn BlobStore, hub: &str) -> StoreResult<Option<Self>> {
        match blobs.get(hub, &Self::blob_name_for(hub)).await? {
            Some(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use chrono::{NaiveDate, NaiveDateTime, TimeZone};
    use hubcal_core::{DateTimeWithZone, Event};

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn zoneless(title: &str, start: NaiveDateTime) -> ZonelessEvent {
        let tz = Tz::America__New_York;
        ZonedEvent::new(
            Event::new(title, "Town Hall").with_url(format!("http://example.org/{title}")),
            DateTimeWithZone::from_local(start, tz),
            DateTimeWithZone::from_local(start, tz).plus(chrono::Duration::hours(1)),
        )
        .to_zoneless(tz)
    }

    mod zoned {
        use super::*;

        #[tokio::test]
        async fn save_and_load() {
            let blobs = MemoryBlobStore::new();
            let tz = Tz::America__Chicago;
            let mut store = ZonedEventStore::new("elmcity", SourceFlavor::Eventful, tz);
            let start = DateTimeWithZone::from_local(local(2030, 1, 5, 20, 0), tz);
            store.add(ZonedEvent::new(Event::new("Show", "eventful: Colonial"), start, start));

            store.save(&blobs).await.unwrap();
            assert!(blobs.exists("elmcity", "elmcity.eventful.zoned.json").await.unwrap());

            let loaded = ZonedEventStore::load(&blobs, "elmcity", SourceFlavor::Eventful)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(loaded, store);
            assert!(
                ZonedEventStore::load(&blobs, "elmcity", SourceFlavor::Upcoming)
                    .await
                    .unwrap()
                    .is_none()
            );
        }

        #[test]
        fn zoneless_document_is_rejected() {
            let store = ZonelessEventStore::new("elmcity", Tz::UTC);
            let err = ZonedEventStore::from_bytes(&store.to_bytes().unwrap()).unwrap_err();
            assert!(matches!(err, StoreError::Schema { .. }));
        }
    }

    mod zoneless {
        use super::*;

        #[test]
        fn envelope_schema() {
            let mut store = ZonelessEventStore::new("elmcity", Tz::America__New_York);
            let mut event = zoneless("Contra", local(2030, 7, 4, 19, 0));
            event.event.categories = "dance,music".into();
            store.events.push(event);

            let envelope = EnvelopeRef {
                format: ZONELESS_FORMAT,
                version: STORE_VERSION,
                hub: &store.hub,
                flavor: None,
                timezone: store.tz.name(),
                events: &store.events,
            };
            insta::assert_json_snapshot!(envelope, {
                ".events[].dtend" => "[dtend]",
            }, @r#"
            {
              "format": "hubcal.zoneless",
              "version": 1,
              "hub": "elmcity",
              "timezone": "America/New_York",
              "events": [
                {
                  "title": "Contra",
                  "url": "http://example.org/Contra",
                  "source": "Town Hall",
                  "allday": false,
                  "categories": "dance,music",
                  "description": "",
                  "location": "",
                  "dtstart": "2030-07-04T19:00:00",
                  "dtend": "[dtend]",
                  "urls_and_sources": {
                    "http://example.org/Contra": "Town Hall"
                  }
                }
              ]
            }
            "#);
        }

        #[test]
        fn bytes_roundtrip_and_version_check() {
            let mut store = ZonelessEventStore::new("elmcity", Tz::America__New_York);
            store.events.push(zoneless("Contra", local(2030, 7, 4, 19, 0)));
            let bytes = store.to_bytes().unwrap();
            assert_eq!(ZonelessEventStore::from_bytes(&bytes).unwrap(), store);

            let text = String::from_utf8(bytes).unwrap().replace("\"version\": 1", "\"version\": 7");
            let err = ZonelessEventStore::from_bytes(text.as_bytes()).unwrap_err();
            assert!(err.to_string().contains("version 7"));
        }

        #[test]
        fn exclude_past_uses_hub_midnight() {
            let tz = Tz::America__New_York;
            // 2030-07-04 10:00 local
            let now = Utc.with_ymd_and_hms(2030, 7, 4, 14, 0, 0).unwrap();
            let mut store = ZonelessEventStore::new("elmcity", tz);
            store.events.push(zoneless("yesterday", local(2030, 7, 3, 23, 59)));
            store.events.push(zoneless("midnight", local(2030, 7, 4, 0, 0)));
            store.events.push(zoneless("earlier today", local(2030, 7, 4, 8, 0)));

            store.exclude_past(now);
            let titles: Vec<_> = store.events.iter().map(|e| e.event.title.as_str()).collect();
            assert_eq!(titles, vec!["midnight", "earlier today"]);
        }

        #[test]
        fn sort_breaks_ties_by_title() {
            let at = local(2030, 7, 4, 19, 0);
            let mut store = ZonelessEventStore::new("elmcity", Tz::America__New_York);
            store.events.push(zoneless("banjo", at));
            store.events.push(zoneless("Accordion", at));
            store.events.push(zoneless("early", local(2030, 7, 4, 9, 0)));
            store.sort();
            let titles: Vec<_> = store.events.iter().map(|e| e.event.title.as_str()).collect();
            assert_eq!(titles, vec!["early", "Accordion", "banjo"]);
        }

        #[test]
        fn datekey_index_groups_by_day() {
            let mut store = ZonelessEventStore::new("elmcity", Tz::America__New_York);
            store.events.push(zoneless("fair", local(2030, 7, 4, 0, 0)));
            store.events.push(zoneless("parade", local(2030, 7, 4, 10, 0)));
            store.events.push(zoneless("fireworks", local(2030, 7, 4, 21, 0)));
            store.events.push(zoneless("cleanup", local(2030, 7, 5, 8, 0)));

            let index = store.datekey_index();
            let keys: Vec<_> = index.keys().map(ToString::to_string).collect();
            assert_eq!(keys, vec!["d20300704", "d20300705"]);

            let fourth: Vec<_> = index[&"d20300704".parse::<DateKey>().unwrap()]
                .iter()
                .map(|e| e.event.title.as_str())
                .collect();
            assert_eq!(fourth, vec!["parade", "fireworks", "fair"]);
        }
    }
}
