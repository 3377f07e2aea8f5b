//! Hub configuration.
//!
//! A [`HubDefinition`] is the configuration as written by curators: loosely
//! typed, possibly inconsistent. [`HubDefinition::resolve`] turns it into a
//! [`HubSettings`] value that collectors can trust, or explains why the hub
//! cannot run. A [`HubDirectory`] is an immutable snapshot of every hub;
//! reloading configuration produces a new directory rather than mutating the
//! current one.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::flavor::SourceFlavor;
use crate::time::resolve_zone;

/// Whether a hub is centered on a place or a topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubKind {
    /// A geographic hub, searched by location.
    #[default]
    Where,
    /// A topical hub, searched by keyword.
    What,
}

impl HubKind {
    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Where => "where",
            Self::What => "what",
        }
    }
}

/// Named feed text filters applied before iCalendar parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuirkKind {
    /// Replace escaped semicolons (`\;`) with bare ones.
    UnescapeSemicolons,
}

/// One registered iCalendar feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSpec {
    /// Feed URL.
    pub url: String,
    /// Human source name shown next to its events.
    pub source: String,
    /// Categories applied to every event of the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<String>,
    /// A URL used for every event of the feed, ahead of per-event links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_override: Option<String>,
}

impl FeedSpec {
    /// Creates a feed spec.
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
            categories: None,
            url_override: None,
        }
    }

    /// Builder method to set feed-level categories.
    pub fn with_categories(mut self, categories: impl Into<String>) -> Self {
        self.categories = Some(categories.into());
        self
    }

    /// Builder method to set the feed-level URL.
    pub fn with_url_override(mut self, url: impl Into<String>) -> Self {
        self.url_override = Some(url.into());
        self
    }
}

/// A hub as configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubDefinition {
    /// Hub identifier, also the storage container name.
    pub id: String,
    /// Place or topic hub.
    pub kind: HubKind,
    /// Timezone name (IANA or Windows-style).
    pub timezone: String,
    /// Free-form place query, e.g. `keene,nh`.
    #[serde(rename = "where")]
    pub where_: Option<String>,
    /// City name for APIs that take one.
    pub city: Option<String>,
    /// Region or state for APIs that take one.
    pub region: Option<String>,
    /// Center latitude.
    pub lat: Option<String>,
    /// Center longitude.
    pub lon: Option<String>,
    /// Search radius in miles.
    pub radius: u32,
    /// Population, used to narrow API date ranges for large places.
    pub population: Option<u64>,
    /// Topic keyword for `what` hubs.
    pub keyword: Option<String>,
    /// Enabled non-ical flavors.
    pub flavors: Vec<String>,
    /// Feed text filter for this hub's feeds.
    pub quirk: Option<QuirkKind>,
    /// Registered iCalendar feeds.
    pub feeds: Vec<FeedSpec>,
}

impl HubDefinition {
    /// Creates a place hub definition.
    pub fn place(id: impl Into<String>, timezone: impl Into<String>, where_: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: HubKind::Where,
            timezone: timezone.into(),
            where_: Some(where_.into()),
            radius: 15,
            ..Default::default()
        }
    }

    /// Creates a topic hub definition.
    pub fn topic(id: impl Into<String>, timezone: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: HubKind::What,
            timezone: timezone.into(),
            keyword: Some(keyword.into()),
            ..Default::default()
        }
    }

    /// Builder method to register a feed.
    pub fn with_feed(mut self, feed: FeedSpec) -> Self {
        self.feeds.push(feed);
        self
    }

    /// Builder method to enable a non-ical flavor.
    pub fn with_flavor(mut self, flavor: SourceFlavor) -> Self {
        self.flavors.push(flavor.as_str().to_string());
        self
    }

    /// Validates the definition and resolves names into typed values.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HubConfig`] when the hub has no resolvable
    /// timezone, no search scope, an unknown flavor, or nothing to collect.
    pub fn resolve(&self) -> CoreResult<HubSettings> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(CoreError::hub_config("<unnamed>", "hub id is empty"));
        }

        let tz = resolve_zone(&self.timezone)
            .map_err(|e| CoreError::hub_config(id, format!("no resolvable timezone ({e})")))?;

        let scope = match self.kind {
            HubKind::Where => {
                let where_ = non_empty(&self.where_);
                let lat_lon = match (non_empty(&self.lat), non_empty(&self.lon)) {
                    (Some(lat), Some(lon)) => Some((lat, lon)),
                    _ => None,
                };
                if where_.is_none() && lat_lon.is_none() {
                    return Err(CoreError::hub_config(id, "place hub needs `where` or lat/lon"));
                }
                HubScope::Place(PlaceScope {
                    where_,
                    city: non_empty(&self.city),
                    region: non_empty(&self.region),
                    lat_lon,
                    radius: self.radius,
                    population: self.population,
                })
            }
            HubKind::What => {
                let keyword = non_empty(&self.keyword)
                    .ok_or_else(|| CoreError::hub_config(id, "topic hub needs a keyword"))?;
                HubScope::Topic { keyword }
            }
        };

        let mut flavors = BTreeSet::new();
        for name in &self.flavors {
            let flavor: SourceFlavor = name
                .parse()
                .map_err(|e| CoreError::hub_config(id, format!("{e}")))?;
            if !flavor.is_ical() {
                flavors.insert(flavor);
            }
        }

        if self.feeds.is_empty() && flavors.is_empty() {
            return Err(CoreError::hub_config(id, "no enabled source flavor"));
        }

        Ok(HubSettings {
            id: id.to_string(),
            kind: self.kind,
            tz,
            scope,
            flavors,
            quirk: self.quirk,
            feeds: self.feeds.clone(),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Search parameters for a place hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceScope {
    /// Free-form place query.
    pub where_: Option<String>,
    /// City name.
    pub city: Option<String>,
    /// Region or state.
    pub region: Option<String>,
    /// Center point, when configured.
    pub lat_lon: Option<(String, String)>,
    /// Radius in miles.
    pub radius: u32,
    /// Population, if known.
    pub population: Option<u64>,
}

/// What the non-ical adapters search for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubScope {
    /// Search around a place.
    Place(PlaceScope),
    /// Search by keyword.
    Topic { keyword: String },
}

/// A validated hub, ready to aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct HubSettings {
    /// Hub identifier.
    pub id: String,
    /// Place or topic hub.
    pub kind: HubKind,
    /// Resolved timezone.
    pub tz: Tz,
    /// Search scope for non-ical adapters.
    pub scope: HubScope,
    /// Enabled non-ical flavors.
    pub flavors: BTreeSet<SourceFlavor>,
    /// Feed text filter.
    pub quirk: Option<QuirkKind>,
    /// Registered iCalendar feeds.
    pub feeds: Vec<FeedSpec>,
}

impl HubSettings {
    /// Returns the flavors to collect, ical first.
    pub fn active_flavors(&self) -> Vec<SourceFlavor> {
        let mut flavors = vec![SourceFlavor::Ical];
        flavors.extend(self.flavors.iter().copied());
        flavors
    }

    /// Returns true if a non-ical flavor is enabled.
    pub fn is_enabled(&self, flavor: SourceFlavor) -> bool {
        flavor.is_ical() || self.flavors.contains(&flavor)
    }

    /// Returns the place scope for place hubs.
    pub fn place(&self) -> Option<&PlaceScope> {
        match &self.scope {
            HubScope::Place(place) => Some(place),
            HubScope::Topic { .. } => None,
        }
    }

    /// Returns the keyword for topic hubs.
    pub fn keyword(&self) -> Option<&str> {
        match &self.scope {
            HubScope::Topic { keyword } => Some(keyword),
            HubScope::Place(_) => None,
        }
    }
}

/// An immutable snapshot of all configured hubs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubDirectory {
    hubs: Vec<HubDefinition>,
}

impl HubDirectory {
    /// Creates a directory from definitions. Later duplicates of an id are dropped.
    pub fn new(hubs: Vec<HubDefinition>) -> Self {
        let mut unique: Vec<HubDefinition> = Vec::with_capacity(hubs.len());
        for hub in hubs {
            if unique.iter().any(|h| h.id == hub.id) {
                tracing::warn!(hub = %hub.id, "duplicate hub id ignored");
                continue;
            }
            unique.push(hub);
        }
        Self { hubs: unique }
    }

    /// Returns a hub definition by id.
    pub fn get(&self, id: &str) -> Option<&HubDefinition> {
        self.hubs.iter().find(|h| h.id == id)
    }

    /// Iterates over hub definitions in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &HubDefinition> {
        self.hubs.iter()
    }

    /// Returns the number of hubs.
    pub fn len(&self) -> usize {
        self.hubs.len()
    }

    /// Returns true when no hub is configured.
    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }
}

/// Produces hub directory snapshots.
pub trait HubConfigSource: Send + Sync {
    /// Loads a fresh snapshot.
    fn load(&self) -> CoreResult<HubDirectory>;
}

/// A source that always returns the same snapshot.
#[derive(Debug, Clone)]
pub struct StaticHubSource(Arc<HubDirectory>);

impl StaticHubSource {
    /// Wraps a directory.
    pub fn new(directory: HubDirectory) -> Self {
        Self(Arc::new(directory))
    }
}

impl HubConfigSource for StaticHubSource {
    fn load(&self) -> CoreResult<HubDirectory> {
        Ok(self.0.as_ref().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keene() -> HubDefinition {
        HubDefinition::place("elmcity", "eastern", "keene,nh")
            .with_feed(FeedSpec::new("http://example.org/a.ics", "A"))
    }

    mod resolve {
        use super::*;

        #[test]
        fn place_hub_resolves() {
            let mut def = keene().with_flavor(SourceFlavor::Eventful);
            def.lat = Some("42.93".into());
            def.lon = Some("-72.28".into());
            def.population = Some(23_000);

            let hub = def.resolve().unwrap();
            assert_eq!(hub.tz, Tz::America__New_York);
            assert_eq!(hub.active_flavors(), vec![SourceFlavor::Ical, SourceFlavor::Eventful]);
            let place = hub.place().unwrap();
            assert_eq!(place.where_.as_deref(), Some("keene,nh"));
            assert_eq!(place.lat_lon, Some(("42.93".into(), "-72.28".into())));
            assert!(hub.keyword().is_none());
        }

        #[test]
        fn topic_hub_needs_keyword() {
            let mut def = HubDefinition::topic("jazz", "UTC", "jazz")
                .with_flavor(SourceFlavor::Facebook);
            assert_eq!(def.resolve().unwrap().keyword(), Some("jazz"));

            def.keyword = Some("  ".into());
            let err = def.resolve().unwrap_err();
            assert!(err.to_string().contains("keyword"));
        }

        #[test]
        fn unresolvable_timezone_is_config_error() {
            let mut def = keene();
            def.timezone = "Nowhere/Land".into();
            let err = def.resolve().unwrap_err();
            assert!(matches!(err, CoreError::HubConfig { .. }));
            assert!(err.to_string().contains("timezone"));
        }

        #[test]
        fn hub_without_sources_is_config_error() {
            let def = HubDefinition::place("empty", "UTC", "nowhere");
            let err = def.resolve().unwrap_err();
            assert!(err.to_string().contains("no enabled source flavor"));
        }

        #[test]
        fn unknown_flavor_is_config_error() {
            let mut def = keene();
            def.flavors.push("myspace".into());
            assert!(def.resolve().is_err());
        }

        #[test]
        fn listing_ical_as_flavor_is_harmless() {
            let mut def = keene();
            def.flavors.push("ical".into());
            let hub = def.resolve().unwrap();
            assert!(hub.flavors.is_empty());
            assert!(hub.is_enabled(SourceFlavor::Ical));
            assert!(!hub.is_enabled(SourceFlavor::Upcoming));
        }
    }

    mod directory {
        use super::*;

        #[test]
        fn duplicate_ids_keep_first() {
            let mut second = keene();
            second.timezone = "UTC".into();
            let dir = HubDirectory::new(vec![keene(), second]);
            assert_eq!(dir.len(), 1);
            assert_eq!(dir.get("elmcity").unwrap().timezone, "eastern");
        }

        #[test]
        fn static_source_returns_snapshot() {
            let source = StaticHubSource::new(HubDirectory::new(vec![keene()]));
            let a = source.load().unwrap();
            let b = source.load().unwrap();
            assert_eq!(a, b);
            assert!(!a.is_empty());
        }
    }
}
