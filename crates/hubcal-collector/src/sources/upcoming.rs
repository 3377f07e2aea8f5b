//! The upcoming.org event search.
//!
//! Place-name searches sometimes come back empty for small towns that the
//! service only knows by coordinates; in that case the search is repeated
//! once by lat/lon and later pages follow whichever search produced results.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use hubcal_core::{BoxFuture, HubScope, SourceFlavor};
use tracing::{debug, info, warn};

use super::xml::{XmlElement, parse_xml};
use crate::adapter::{FirstPage, ListingTime, PageQuery, RawListing, SourceAdapter, page_count};
use crate::error::CollectorResult;
use crate::fetch::HttpFetcher;
use crate::retry::{RetryPolicy, fetch_with_retry};

const REST_URL: &str = "http://upcoming.yahooapis.com/services/rest/";

/// Adapter for the upcoming REST search.
pub struct UpcomingAdapter {
    fetcher: Arc<dyn HttpFetcher>,
    api_key: String,
    retry: RetryPolicy,
    by_lat_lon: AtomicBool,
}

impl UpcomingAdapter {
    /// Production page size.
    pub const PAGE_SIZE: u32 = 100;

    /// Creates an adapter with the default retry policy.
    pub fn new(fetcher: Arc<dyn HttpFetcher>, api_key: impl Into<String>) -> Self {
        Self {
            fetcher,
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
            by_lat_lon: AtomicBool::new(false),
        }
    }

    /// Builder method to override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builds the search URL for a page.
    ///
    /// Place hubs search by place name unless `by_lat_lon` is set or no name
    /// is configured.
    pub fn search_url(&self, query: &PageQuery, page: u32, by_lat_lon: bool) -> String {
        let scope = match &query.scope {
            HubScope::Place(place) => {
                let location = match (&place.where_, &place.lat_lon) {
                    (Some(name), _) if !by_lat_lon => name.clone(),
                    (_, Some((lat, lon))) => format!("{lat},{lon}"),
                    (name, None) => name.clone().unwrap_or_default(),
                };
                format!(
                    "location={}&radius={}",
                    urlencoding::encode(&location),
                    place.radius
                )
            }
            HubScope::Topic { keyword } => format!("search_text={}", urlencoding::encode(keyword)),
        };
        format!(
            "{REST_URL}?rollup=none&api_key={}&method=event.search&{scope}&min_date={}&max_date={}&per_page={}&page={page}",
            urlencoding::encode(&self.api_key),
            query.from.format("%Y-%m-%d"),
            query.to.format("%Y-%m-%d"),
            query.page_size
        )
    }

    async fn fetch_page(&self, query: &PageQuery, page: u32, by_lat_lon: bool) -> CollectorResult<XmlElement> {
        let url = self.search_url(query, page, by_lat_lon);
        let fetched = fetch_with_retry(self.fetcher.as_ref(), &url, &self.retry).await?;
        parse_xml(&fetched.body)
    }
}

fn result_count(root: &XmlElement) -> u64 {
    root.attr("resultcount")
        .and_then(|c| c.trim().parse().ok())
        .unwrap_or(0)
}

fn parse_start(event: &XmlElement) -> Option<(ListingTime, bool)> {
    let date = NaiveDate::parse_from_str(event.attr("start_date")?, "%Y-%m-%d").ok()?;
    let start_time = event.attr("start_time").unwrap_or_default().trim();
    if start_time.is_empty() {
        return Some((ListingTime::Local(date.and_time(NaiveTime::MIN)), true));
    }

    let utc = event
        .attr("utc_start")
        .map(|s| s.trim().trim_end_matches("UTC").trim())
        .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok());
    if let Some(utc) = utc {
        return Some((ListingTime::Utc(Utc.from_utc_datetime(&utc)), false));
    }

    let time = NaiveTime::parse_from_str(start_time, "%H:%M:%S").ok()?;
    Some((ListingTime::Local(date.and_time(time)), false))
}

fn listing_from(event: &XmlElement) -> Option<RawListing> {
    let id = event.attr("id").unwrap_or_default();
    let Some((start, allday)) = parse_start(event) else {
        warn!(id, "upcoming event with unreadable start skipped");
        return None;
    };
    let attr = |name: &str| event.attr(name).unwrap_or_default().trim().to_string();

    let venue = attr("venue_name");
    let mut listing = RawListing::new(id, attr("name"), start);
    listing.allday = allday;
    listing.url = format!("http://upcoming.yahoo.com/event/{id}");
    listing.source = if venue.is_empty() {
        "upcoming".to_string()
    } else {
        format!("upcoming: {venue}")
    };
    listing.location = venue.clone();
    listing.venue = if venue.is_empty() { attr("venue_id") } else { venue };
    listing.description = attr("description");
    listing.lat = Some(attr("latitude"));
    listing.lon = Some(attr("longitude"));
    Some(listing)
}

fn listings_from(root: &XmlElement) -> Vec<RawListing> {
    root.descendants("event")
        .into_iter()
        .filter_map(listing_from)
        .collect()
}

impl SourceAdapter for UpcomingAdapter {
    fn flavor(&self) -> SourceFlavor {
        SourceFlavor::Upcoming
    }

    fn page_size(&self) -> u32 {
        Self::PAGE_SIZE
    }

    fn first_page<'a>(&'a self, query: &'a PageQuery) -> BoxFuture<'a, CollectorResult<FirstPage>> {
        Box::pin(async move {
            self.by_lat_lon.store(false, Ordering::SeqCst);
            let mut root = self.fetch_page(query, 1, false).await?;
            let mut count = result_count(&root);

            let can_retry = matches!(
                &query.scope,
                HubScope::Place(place) if place.where_.is_some() && place.lat_lon.is_some()
            );
            if count == 0 && can_retry {
                info!(hub = %query.hub, "no upcoming results by place name, searching by lat/lon");
                root = self.fetch_page(query, 1, true).await?;
                count = result_count(&root);
                self.by_lat_lon.store(true, Ordering::SeqCst);
            }

            let listings = listings_from(&root);
            debug!(hub = %query.hub, count, listed = listings.len(), "upcoming first page");
            Ok(FirstPage {
                page_count: page_count(count, query.page_size),
                listings,
            })
        })
    }

    fn page<'a>(
        &'a self,
        query: &'a PageQuery,
        page: u32,
    ) -> BoxFuture<'a, CollectorResult<Vec<RawListing>>> {
        Box::pin(async move {
            let by_lat_lon = self.by_lat_lon.load(Ordering::SeqCst);
            Ok(listings_from(&self.fetch_page(query, page, by_lat_lon).await?))
        })
    }
}
