//! Event model shared by collectors and stores.
//!
//! - [`Event`]: the fields every event carries regardless of time model
//! - [`ZonedEvent`]: produced by source adapters, times as [`DateTimeWithZone`]
//! - [`ZonelessEvent`]: the merged hub view, times as hub-local wall clock
//!
//! Categories are kept as a comma-joined tag list. Helpers in this module
//! treat the list as an ordered set when merging.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::time::{DateTimeWithZone, format_local};

/// Splits a comma-joined category list into trimmed, non-empty tags.
pub fn category_tags(categories: &str) -> Vec<String> {
    categories
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Joins tags into a comma-joined list, dropping repeats but keeping order.
pub fn join_categories<I, S>(tags: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !seen.iter().any(|t| t == tag) {
            seen.push(tag.to_string());
        }
    }
    seen.join(",")
}

/// Fields common to zoned and zoneless events.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Event {
    /// Event title. May be empty but never absent.
    pub title: String,
    /// Link back to the event at its source. May be empty.
    #[serde(default)]
    pub url: String,
    /// Free-text label of the source that reported the event.
    pub source: String,
    /// Whether the event spans whole days rather than a time.
    #[serde(default)]
    pub allday: bool,
    /// Latitude, as reported upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<String>,
    /// Longitude, as reported upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<String>,
    /// Comma-joined tag list.
    #[serde(default)]
    pub categories: String,
    /// Description text.
    #[serde(default)]
    pub description: String,
    /// Location text.
    #[serde(default)]
    pub location: String,
}

impl Event {
    /// Creates an event with a title and source label.
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    /// Builder method to set the URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Builder method to mark the event all-day.
    pub fn with_allday(mut self, allday: bool) -> Self {
        self.allday = allday;
        self
    }

    /// Builder method to set coordinates.
    pub fn with_coordinates(mut self, lat: Option<String>, lon: Option<String>) -> Self {
        self.lat = lat.filter(|v| !v.trim().is_empty());
        self.lon = lon.filter(|v| !v.trim().is_empty());
        self
    }

    /// Builder method to set the category list.
    pub fn with_categories(mut self, categories: impl AsRef<str>) -> Self {
        self.categories = join_categories(category_tags(categories.as_ref()));
        self
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder method to set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Returns the category tags.
    pub fn tags(&self) -> Vec<String> {
        category_tags(&self.categories)
    }

    /// Adds tags from a comma-joined list, skipping ones already present.
    pub fn add_categories(&mut self, extra: &str) {
        let mut tags = self.tags();
        tags.extend(category_tags(extra));
        self.categories = join_categories(tags);
    }
}

/// An event with explicit zoned start and end times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonedEvent {
    #[serde(flatten)]
    pub event: Event,
    pub dtstart: DateTimeWithZone,
    pub dtend: DateTimeWithZone,
    /// Feed URL the event was collected from, for ical events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed: Option<String>,
}

impl ZonedEvent {
    /// Creates a zoned event.
    pub fn new(event: Event, dtstart: DateTimeWithZone, dtend: DateTimeWithZone) -> Self {
        Self {
            event,
            dtstart,
            dtend,
            feed: None,
        }
    }

    /// Builder method to record the originating feed.
    pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
        self.feed = Some(feed.into());
        self
    }

    /// Converts to the hub's wall clock, dropping the UTC instant.
    ///
    /// The resulting event's `urls_and_sources` holds this event's own pair.
    pub fn to_zoneless(&self, hub_tz: Tz) -> ZonelessEvent {
        let mut urls_and_sources = BTreeMap::new();
        urls_and_sources.insert(self.event.url.clone(), self.event.source.clone());
        ZonelessEvent {
            event: self.event.clone(),
            dtstart: self.dtstart.in_zone(hub_tz).local_time(),
            dtend: self.dtend.in_zone(hub_tz).local_time(),
            urls_and_sources,
            original_categories: None,
        }
    }
}

/// An event in a hub's merged, zone-implied timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonelessEvent {
    #[serde(flatten)]
    pub event: Event,
    pub dtstart: NaiveDateTime,
    pub dtend: NaiveDateTime,
    /// Every contributing URL mapped to the source label that reported it.
    pub urls_and_sources: BTreeMap<String, String>,
    /// Categories before cross-source merging, when merging changed them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_categories: Option<String>,
}

impl ZonelessEvent {
    /// Returns `title + start`, the exact-match identity of an event.
    pub fn title_and_time(&self) -> String {
        format!("{}{}", self.event.title, format_local(&self.dtstart))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    mod categories {
        use super::*;

        #[test]
        fn tags_are_trimmed_and_non_empty() {
            assert_eq!(category_tags(" music, ,arts ,"), vec!["music", "arts"]);
            assert!(category_tags("").is_empty());
        }

        #[test]
        fn join_drops_repeats_in_order() {
            assert_eq!(join_categories(["b", "a", "b", " a "]), "b,a");
        }

        #[test]
        fn add_categories_is_a_union() {
            let mut event = Event::new("Jam", "feed").with_categories("music,folk");
            event.add_categories("folk, dance");
            assert_eq!(event.categories, "music,folk,dance");
        }
    }

    mod event {
        use super::*;

        #[test]
        fn builder_sets_fields() {
            let event = Event::new("Contra dance", "Town Hall")
                .with_url("http://example.org/contra")
                .with_allday(false)
                .with_coordinates(Some("42.93".into()), Some(" ".into()))
                .with_description("Live band")
                .with_location("Main St");

            assert_eq!(event.title, "Contra dance");
            assert_eq!(event.source, "Town Hall");
            assert_eq!(event.url, "http://example.org/contra");
            assert_eq!(event.lat.as_deref(), Some("42.93"));
            assert!(event.lon.is_none());
            assert_eq!(event.location, "Main St");
        }
    }

    mod zoned {
        use super::*;

        #[test]
        fn to_zoneless_uses_hub_wall_clock() {
            let start = DateTimeWithZone::from_local(local(2024, 7, 4, 19, 0), Tz::America__Chicago);
            let end = start.plus(chrono::Duration::hours(2));
            let zoned = ZonedEvent::new(
                Event::new("Fireworks", "eventful: Park").with_url("http://e/1"),
                start,
                end,
            );

            let zoneless = zoned.to_zoneless(Tz::America__New_York);
            assert_eq!(zoneless.dtstart, local(2024, 7, 4, 20, 0));
            assert_eq!(zoneless.dtend, local(2024, 7, 4, 22, 0));
            assert_eq!(zoneless.urls_and_sources.len(), 1);
            assert_eq!(zoneless.urls_and_sources["http://e/1"], "eventful: Park");
        }

        #[test]
        fn title_and_time_key() {
            let start = DateTimeWithZone::from_local(local(2024, 7, 4, 19, 0), Tz::UTC);
            let zoneless = ZonedEvent::new(Event::new("Parade", "x"), start, start).to_zoneless(Tz::UTC);
            assert_eq!(zoneless.title_and_time(), "Parade2024-07-04T19:00:00");
        }

        #[test]
        fn feed_is_omitted_when_absent() {
            let start = DateTimeWithZone::from_local(local(2024, 7, 4, 19, 0), Tz::UTC);
            let zoned = ZonedEvent::new(Event::new("Parade", "x"), start, start);
            let json = serde_json::to_value(&zoned).unwrap();
            assert!(json.get("feed").is_none());
            assert_eq!(json["title"], "Parade");

            let with_feed = zoned.with_feed("http://feed");
            let json = serde_json::to_value(&with_feed).unwrap();
            assert_eq!(json["feed"], "http://feed");
        }
    }
}
