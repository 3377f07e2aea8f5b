//! The non-ical adapter contract and the shared page driver.
//!
//! Every REST directory adapter implements [`SourceAdapter`]: a first request
//! that reports the page count along with page 1, then one request per further
//! page. [`drive_pages`] turns that into the finite listing sequence: a failure
//! on page 1 fails the flavor, a failure on a later page ends the sequence with
//! what was already collected.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use hubcal_core::{
    BoxFuture, DateTimeWithZone, Event, HubScope, HubSettings, SourceFlavor, Tz, ZonedEvent,
    midnight_in_tz,
};
use hubcal_store::NonIcalStats;
use tracing::{debug, warn};

use crate::error::{CollectorError, CollectorResult};
use crate::retry::RetryPolicy;
use crate::shutdown::StopSignal;

/// Page count used in test mode.
pub const TEST_PAGE_COUNT: u32 = 1;

/// Page size used in test mode.
pub const TEST_PAGE_SIZE: u32 = 10;

/// Number of ical feeds processed in test mode.
pub const TEST_MAX_FEEDS: usize = 6;

/// Knobs shared by every collector of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectOptions {
    /// Caps pages, page sizes and feed counts.
    pub test_mode: bool,
    /// Days after midnight to collect.
    pub horizon_days: u32,
    /// Cap on coalesced events per non-ical flavor.
    pub max_events: usize,
    /// Ical feeds fetched at once.
    pub max_concurrent_feeds: usize,
    /// Retry policy for ical feeds and adapters without their own.
    pub retry: RetryPolicy,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            test_mode: false,
            horizon_days: 90,
            max_events: 1000,
            max_concurrent_feeds: 8,
            retry: RetryPolicy::default(),
        }
    }
}

impl CollectOptions {
    /// Page size for an adapter, honoring test mode.
    pub fn page_size(&self, adapter_page_size: u32) -> u32 {
        if self.test_mode {
            TEST_PAGE_SIZE
        } else {
            adapter_page_size.max(1)
        }
    }
}

/// Narrows the search window for populous places, where directories return
/// far more events than a hub can use.
pub fn search_horizon_days(population: Option<u64>, default_days: u32) -> u32 {
    match population.unwrap_or(0) {
        p if p > 500_000 => 30,
        p if p > 300_000 => 60,
        p if p > 100_000 => 90,
        _ => default_days,
    }
}

/// Number of pages needed for `total` results, at least one.
pub fn page_count(total: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    u32::try_from(total.div_ceil(page_size)).unwrap_or(u32::MAX).max(1)
}

/// The search an adapter runs for a hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// Hub id, for logging.
    pub hub: String,
    /// Place or keyword search.
    pub scope: HubScope,
    /// First day to search, hub local.
    pub from: NaiveDate,
    /// Last day to search, hub local.
    pub to: NaiveDate,
    /// Results per page.
    pub page_size: u32,
}

impl PageQuery {
    /// Builds the query for a hub, starting at today's local midnight.
    pub fn for_hub(
        settings: &HubSettings,
        now: DateTime<Utc>,
        options: &CollectOptions,
        adapter_page_size: u32,
    ) -> Self {
        let from = midnight_in_tz(now, settings.tz).local_date();
        let population = settings.place().and_then(|p| p.population);
        let days = search_horizon_days(population, options.horizon_days);
        Self {
            hub: settings.id.clone(),
            scope: settings.scope.clone(),
            from,
            to: from.checked_add_days(Days::new(u64::from(days))).unwrap_or(from),
            page_size: options.page_size(adapter_page_size),
        }
    }
}

/// Start time as a directory reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingTime {
    /// Hub-local wall clock.
    Local(NaiveDateTime),
    /// A UTC instant.
    Utc(DateTime<Utc>),
}

impl ListingTime {
    fn to_zoned(self, tz: Tz) -> DateTimeWithZone {
        match self {
            Self::Local(local) => DateTimeWithZone::from_local(local, tz),
            Self::Utc(utc) => DateTimeWithZone::from_utc(utc, tz),
        }
    }
}

/// One record from a directory API, before conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawListing {
    /// Upstream id.
    pub id: String,
    /// Event title.
    pub title: String,
    /// Start time.
    pub start: ListingTime,
    /// All-day flag.
    pub allday: bool,
    /// Venue name, possibly empty.
    pub venue: String,
    /// Event page.
    pub url: String,
    /// Source label shown next to the event.
    pub source: String,
    /// Description, possibly empty.
    pub description: String,
    /// Location text, possibly empty.
    pub location: String,
    /// Latitude.
    pub lat: Option<String>,
    /// Longitude.
    pub lon: Option<String>,
    /// Comma-joined categories.
    pub categories: String,
}

impl RawListing {
    /// Creates a listing with the required fields.
    pub fn new(id: impl Into<String>, title: impl Into<String>, start: ListingTime) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            start,
            allday: false,
            venue: String::new(),
            url: String::new(),
            source: String::new(),
            description: String::new(),
            location: String::new(),
            lat: None,
            lon: None,
            categories: String::new(),
        }
    }

    fn coalesce_key(&self) -> String {
        let start = match self.start {
            ListingTime::Local(local) => local.to_string(),
            ListingTime::Utc(utc) => utc.to_rfc3339(),
        };
        format!("{}\u{1f}{}\u{1f}{}", self.venue, self.title, start)
    }
}

/// The first page of results with the total page count.
#[derive(Debug, Clone, PartialEq)]
pub struct FirstPage {
    /// Total pages, at least one.
    pub page_count: u32,
    /// Listings on page 1.
    pub listings: Vec<RawListing>,
}

/// A REST directory source.
pub trait SourceAdapter: Send + Sync {
    /// Which flavor this adapter serves.
    fn flavor(&self) -> SourceFlavor;

    /// Production page size.
    fn page_size(&self) -> u32;

    /// Fetches page 1 and the page count.
    fn first_page<'a>(&'a self, query: &'a PageQuery) -> BoxFuture<'a, CollectorResult<FirstPage>>;

    /// Fetches page `page` (1-based, > 1).
    fn page<'a>(
        &'a self,
        query: &'a PageQuery,
        page: u32,
    ) -> BoxFuture<'a, CollectorResult<Vec<RawListing>>>;
}

/// Collects every page of a query.
///
/// # Errors
///
/// Returns the page-1 error, or a cancellation error when `stop` is raised
/// between pages.
pub async fn drive_pages(
    adapter: &dyn SourceAdapter,
    query: &PageQuery,
    options: &CollectOptions,
    stop: &StopSignal,
) -> CollectorResult<Vec<RawListing>> {
    let flavor = adapter.flavor();
    let first = adapter
        .first_page(query)
        .await
        .map_err(|e| e.with_feed(flavor.as_str()))?;

    let mut pages = first.page_count.max(1);
    if options.test_mode {
        pages = pages.min(TEST_PAGE_COUNT);
    }
    debug!(hub = %query.hub, %flavor, pages, "collecting pages");

    let mut listings = first.listings;
    for n in 2..=pages {
        if stop.is_requested() {
            return Err(CollectorError::cancelled(format!("stopped at page {n}")).with_feed(flavor.as_str()));
        }
        match adapter.page(query, n).await {
            Ok(page) => listings.extend(page),
            Err(e) => {
                warn!(hub = %query.hub, %flavor, page = n, error = %e, "page failed, keeping earlier pages");
                break;
            }
        }
    }
    Ok(listings)
}

/// Converted listings of one flavor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedListings {
    /// Events in listing order.
    pub events: Vec<ZonedEvent>,
    /// Event and venue counts.
    pub stats: NonIcalStats,
}

/// Coalesces, filters and converts listings into zoned events.
///
/// Exact duplicates (venue, title, start) keep their first occurrence. Events
/// before today's local midnight are dropped, and at most `max_events`
/// coalesced listings are considered.
pub fn convert_listings(
    flavor: SourceFlavor,
    tz: Tz,
    listings: Vec<RawListing>,
    now: DateTime<Utc>,
    max_events: usize,
) -> ConvertedListings {
    let midnight = midnight_in_tz(now, tz);
    let mut seen = HashSet::new();
    let mut venues = BTreeSet::new();
    let mut events = Vec::new();

    let unique = listings
        .into_iter()
        .filter(|listing| seen.insert(listing.coalesce_key()))
        .take(max_events);

    for listing in unique {
        let start = listing.start.to_zoned(tz);
        if start < midnight {
            continue;
        }
        if !listing.venue.is_empty() {
            venues.insert(listing.venue.clone());
        }

        let mut event = Event::new(listing.title, listing.source)
            .with_url(listing.url)
            .with_allday(listing.allday)
            .with_coordinates(listing.lat, listing.lon)
            .with_description(listing.description)
            .with_location(listing.location)
            .with_categories(flavor.as_str());
        event.add_categories(&listing.categories);
        events.push(ZonedEvent::new(event, start, start));
    }

    debug!(%flavor, count = events.len(), venues = venues.len(), "converted listings");
    ConvertedListings {
        stats: NonIcalStats {
            eventcount: events.len() as u64,
            venuecount: venues.len() as u64,
            whenchecked: Some(now),
        },
        events,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use hubcal_core::HubDefinition;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub(crate) const TZ: Tz = Tz::America__New_York;

    pub(crate) fn now() -> DateTime<Utc> {
        // 2030-03-01 09:00 local
        Utc.with_ymd_and_hms(2030, 3, 1, 14, 0, 0).unwrap()
    }

    pub(crate) fn local(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 3, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn listing(id: &str, title: &str, venue: &str, start: NaiveDateTime) -> RawListing {
        let mut l = RawListing::new(id, title, ListingTime::Local(start));
        l.venue = venue.into();
        l.source = format!("test: {venue}");
        l.url = format!("http://example.org/{id}");
        l
    }

    /// Serves a fixed number of pages with one listing each; fails on `fail_on`.
    struct PagedAdapter {
        pages: u32,
        fail_on: Option<u32>,
        calls: AtomicU32,
    }

    impl PagedAdapter {
        fn new(pages: u32, fail_on: Option<u32>) -> Self {
            Self {
                pages,
                fail_on,
                calls: AtomicU32::new(0),
            }
        }

        fn listing_for(n: u32) -> RawListing {
            listing(&n.to_string(), &format!("Event {n}"), "Hall", local(5, 12))
        }
    }

    impl SourceAdapter for PagedAdapter {
        fn flavor(&self) -> SourceFlavor {
            SourceFlavor::Eventful
        }

        fn page_size(&self) -> u32 {
            1
        }

        fn first_page<'a>(&'a self, _query: &'a PageQuery) -> BoxFuture<'a, CollectorResult<FirstPage>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail_on == Some(1) {
                    return Err(CollectorError::server("down"));
                }
                Ok(FirstPage {
                    page_count: self.pages,
                    listings: vec![Self::listing_for(1)],
                })
            })
        }

        fn page<'a>(
            &'a self,
            _query: &'a PageQuery,
            page: u32,
        ) -> BoxFuture<'a, CollectorResult<Vec<RawListing>>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail_on == Some(page) {
                    return Err(CollectorError::server("down"));
                }
                Ok(vec![Self::listing_for(page)])
            })
        }
    }

    fn query() -> PageQuery {
        let settings = HubDefinition::place("elmcity", "eastern", "keene,nh")
            .with_flavor(SourceFlavor::Eventful)
            .resolve()
            .unwrap();
        PageQuery::for_hub(&settings, now(), &CollectOptions::default(), 100)
    }

    mod paging {
        use super::*;

        #[test]
        fn page_count_is_ceiling_and_at_least_one() {
            assert_eq!(page_count(0, 100), 1);
            assert_eq!(page_count(100, 100), 1);
            assert_eq!(page_count(101, 100), 2);
            assert_eq!(page_count(5, 0), 5);
        }

        #[test]
        fn horizon_shrinks_with_population() {
            assert_eq!(search_horizon_days(Some(600_000), 90), 30);
            assert_eq!(search_horizon_days(Some(400_000), 90), 60);
            assert_eq!(search_horizon_days(Some(200_000), 120), 90);
            assert_eq!(search_horizon_days(Some(23_000), 120), 120);
            assert_eq!(search_horizon_days(None, 90), 90);
        }

        #[test]
        fn query_spans_horizon_from_local_midnight() {
            let q = query();
            assert_eq!(q.from, NaiveDate::from_ymd_opt(2030, 3, 1).unwrap());
            assert_eq!(q.to, NaiveDate::from_ymd_opt(2030, 5, 30).unwrap());
            assert_eq!(q.page_size, 100);

            let test_mode = CollectOptions {
                test_mode: true,
                ..Default::default()
            };
            assert_eq!(test_mode.page_size(100), TEST_PAGE_SIZE);
        }

        #[tokio::test]
        async fn all_pages_are_collected() {
            let adapter = PagedAdapter::new(3, None);
            let listings = drive_pages(&adapter, &query(), &CollectOptions::default(), &StopSignal::never())
                .await
                .unwrap();
            assert_eq!(listings.len(), 3);
            assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
        }

        #[tokio::test]
        async fn later_page_failure_truncates() {
            let adapter = PagedAdapter::new(4, Some(3));
            let listings = drive_pages(&adapter, &query(), &CollectOptions::default(), &StopSignal::never())
                .await
                .unwrap();
            let titles: Vec<_> = listings.iter().map(|l| l.title.as_str()).collect();
            assert_eq!(titles, vec!["Event 1", "Event 2"]);
        }

        #[tokio::test]
        async fn first_page_failure_fails_the_flavor() {
            let adapter = PagedAdapter::new(4, Some(1));
            let err = drive_pages(&adapter, &query(), &CollectOptions::default(), &StopSignal::never())
                .await
                .unwrap_err();
            assert_eq!(err.feed(), Some("eventful"));
        }

        #[tokio::test]
        async fn test_mode_reads_one_page() {
            let adapter = PagedAdapter::new(4, None);
            let options = CollectOptions {
                test_mode: true,
                ..Default::default()
            };
            let listings = drive_pages(&adapter, &query(), &options, &StopSignal::never())
                .await
                .unwrap();
            assert_eq!(listings.len(), 1);
        }

        #[tokio::test]
        async fn stop_between_pages_cancels() {
            let (tx, rx) = tokio::sync::watch::channel(true);
            let adapter = PagedAdapter::new(4, None);
            let err = drive_pages(&adapter, &query(), &CollectOptions::default(), &StopSignal::new(rx))
                .await
                .unwrap_err();
            assert_eq!(err.code(), crate::error::CollectorErrorCode::Cancelled);
            drop(tx);
        }
    }

    mod conversion {
        use super::*;

        #[test]
        fn duplicates_coalesce_and_past_is_dropped() {
            let listings = vec![
                listing("1", "Jazz", "Hall", local(2, 20)),
                listing("2", "Jazz", "Hall", local(2, 20)),
                listing("3", "Jazz", "Cafe", local(2, 20)),
                listing("4", "Yesterday", "Hall", NaiveDate::from_ymd_opt(2030, 2, 28).unwrap().and_hms_opt(20, 0, 0).unwrap()),
                listing("5", "Early", "Barn", local(1, 1)),
            ];
            let converted = convert_listings(SourceFlavor::Eventful, TZ, listings, now(), 1000);

            let ids: Vec<_> = converted.events.iter().map(|e| e.event.url.as_str()).collect();
            assert_eq!(
                ids,
                vec!["http://example.org/1", "http://example.org/3", "http://example.org/5"]
            );
            assert_eq!(converted.stats.eventcount, 3);
            assert_eq!(converted.stats.venuecount, 3);
            assert_eq!(converted.stats.whenchecked, Some(now()));

            let first = &converted.events[0];
            assert_eq!(first.event.source, "test: Hall");
            assert_eq!(first.event.categories, "eventful");
            assert_eq!(first.dtstart, first.dtend);
            assert_eq!(first.dtstart.time_zone(), TZ);
        }

        #[test]
        fn utc_listings_convert_to_hub_zone() {
            let start = Utc.with_ymd_and_hms(2030, 3, 2, 1, 0, 0).unwrap();
            let mut l = RawListing::new("1", "Late show", ListingTime::Utc(start));
            l.categories = "music".into();
            let converted = convert_listings(SourceFlavor::Upcoming, TZ, vec![l], now(), 1000);
            let event = &converted.events[0];
            assert_eq!(event.dtstart.local_time(), local(1, 20));
            assert_eq!(event.event.categories, "upcoming,music");
            assert_eq!(converted.stats.venuecount, 0);
        }

        #[test]
        fn max_events_caps_coalesced_listings() {
            let listings = (0..5)
                .map(|n| listing(&n.to_string(), &format!("E{n}"), "Hall", local(3, 12)))
                .collect();
            let converted = convert_listings(SourceFlavor::Eventbrite, TZ, listings, now(), 2);
            assert_eq!(converted.events.len(), 2);
        }
    }
}
