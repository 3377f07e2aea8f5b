//! Per-flavor ICS export of a zoned store.

use chrono::{DateTime, Utc};
use hubcal_core::{SourceFlavor, ZonedEvent};
use hubcal_store::{BlobStore, StoreResult, ZonedEventStore};
use icalendar::{Calendar, Component, EventLike, Property};
use tracing::debug;

const PRODID: &str = "PRODID:-//hubcal//hubcal//EN";

/// Blob name of a flavor's export.
pub fn ics_blob_name(hub: &str, flavor: SourceFlavor) -> String {
    format!("{hub}_{flavor}.ics")
}

fn datetime_property(name: &str, event: &ZonedEvent, at: hubcal_core::DateTimeWithZone) -> Property {
    if event.event.allday {
        let mut prop = Property::new(name, at.local_date().format("%Y%m%d").to_string());
        prop.add_parameter("VALUE", "DATE");
        prop
    } else {
        let mut prop = Property::new(name, at.local_time().format("%Y%m%dT%H%M%S").to_string());
        prop.add_parameter("TZID", at.time_zone().name());
        prop
    }
}

fn to_ical(store: &ZonedEventStore, index: usize, event: &ZonedEvent, stamp: &str) -> icalendar::Event {
    let mut ev = icalendar::Event::new();
    ev.uid(&format!("{}-{}-{index}@hubcal", store.hub, store.flavor));
    ev.add_property("DTSTAMP", stamp);
    ev.summary(&event.event.title);
    ev.append_property(datetime_property("DTSTART", event, event.dtstart));
    if event.dtend > event.dtstart {
        ev.append_property(datetime_property("DTEND", event, event.dtend));
    }
    if !event.event.description.is_empty() {
        ev.description(&event.event.description);
    }
    if !event.event.location.is_empty() {
        ev.location(&event.event.location);
    }
    if !event.event.url.is_empty() {
        ev.add_property("URL", &event.event.url);
    }
    if !event.event.categories.is_empty() {
        ev.add_property("CATEGORIES", &event.event.categories);
    }
    if let (Some(lat), Some(lon)) = (&event.event.lat, &event.event.lon) {
        ev.add_property("GEO", format!("{lat};{lon}"));
    }
    ev.add_property("X-HUBCAL-SOURCE", &event.event.source);
    ev.done()
}

/// Renders a zoned store as an iCalendar document.
pub fn export_ics(store: &ZonedEventStore, now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let mut cal = Calendar::new();
    cal.name(&format!("{} {}", store.hub, store.flavor));
    cal.timezone(store.tz.name());
    for (index, event) in store.events.iter().enumerate() {
        cal.push(to_ical(store, index, event, &stamp));
    }
    let cal = cal.done();

    let mut output = String::new();
    for line in cal.to_string().lines() {
        output.push_str(if line.starts_with("PRODID:") { PRODID } else { line });
        output.push_str("\r\n");
    }
    output
}

/// Writes a store's export to the hub's container.
pub async fn save_ics(store: &ZonedEventStore, blobs: &dyn BlobStore, now: DateTime<Utc>) -> StoreResult<()> {
    let name = ics_blob_name(&store.hub, store.flavor);
    blobs.put(&store.hub, &name, export_ics(store, now).into_bytes()).await?;
    debug!(hub = %store.hub, flavor = %store.flavor, count = store.len(), "saved ics export");
    Ok(())
}
