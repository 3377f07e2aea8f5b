//! The eventful.com event search.

use std::sync::Arc;

use chrono::NaiveDateTime;
use hubcal_core::{BoxFuture, HubScope, SourceFlavor};
use tracing::{debug, warn};

use super::xml::{XmlElement, parse_xml};
use crate::adapter::{FirstPage, ListingTime, PageQuery, RawListing, SourceAdapter};
use crate::error::CollectorResult;
use crate::fetch::HttpFetcher;
use crate::retry::{RetryPolicy, fetch_with_retry};

const SEARCH_URL: &str = "http://api.eventful.com/rest/events/search";
const START_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Adapter for the eventful REST search.
pub struct EventfulAdapter {
    fetcher: Arc<dyn HttpFetcher>,
    app_key: String,
    retry: RetryPolicy,
}

impl EventfulAdapter {
    /// Production page size.
    pub const PAGE_SIZE: u32 = 100;

    /// Creates an adapter with the eventful retry policy.
    pub fn new(fetcher: Arc<dyn HttpFetcher>, app_key: impl Into<String>) -> Self {
        Self {
            fetcher,
            app_key: app_key.into(),
            retry: RetryPolicy::eventful(),
        }
    }

    /// Builder method to override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builds the search URL for a page.
    pub fn search_url(&self, query: &PageQuery, page: u32) -> String {
        let date = format!(
            "{}00-{}00",
            query.from.format("%Y%m%d"),
            query.to.format("%Y%m%d")
        );
        let scope = match &query.scope {
            HubScope::Place(place) => {
                let location = match &place.lat_lon {
                    Some((lat, lon)) => format!("{lat},{lon}"),
                    None => place.where_.clone().unwrap_or_default(),
                };
                format!(
                    "location={}&within={}&units=mi",
                    urlencoding::encode(&location),
                    place.radius
                )
            }
            HubScope::Topic { keyword } => format!("keywords={}", urlencoding::encode(keyword)),
        };
        format!(
            "{SEARCH_URL}?app_key={}&date={date}&{scope}&page_size={}&page_number={page}",
            urlencoding::encode(&self.app_key),
            query.page_size
        )
    }

    async fn fetch_page(&self, query: &PageQuery, page: u32) -> CollectorResult<XmlElement> {
        let url = self.search_url(query, page);
        let fetched = fetch_with_retry(self.fetcher.as_ref(), &url, &self.retry).await?;
        parse_xml(&fetched.body)
    }
}

fn listing_from(event: &XmlElement) -> Option<RawListing> {
    let id = event.attr("id").unwrap_or_default();
    let raw_start = event.child_text("start_time");
    let Ok(start) = NaiveDateTime::parse_from_str(raw_start, START_FORMAT) else {
        warn!(id, start = raw_start, "eventful event with unreadable start skipped");
        return None;
    };

    let venue = event.child_text("venue_name").to_string();
    let address = event.child_text("venue_address");
    let mut listing = RawListing::new(id, event.child_text("title"), ListingTime::Local(start));
    listing.allday = matches!(event.child_text("all_day"), "1" | "2");
    listing.url = format!("http://eventful.com/events/{id}");
    listing.source = if venue.is_empty() {
        "eventful".to_string()
    } else {
        format!("eventful: {venue}")
    };
    listing.location = match (venue.is_empty(), address.is_empty()) {
        (false, false) => format!("{venue}, {address}"),
        (false, true) => venue.clone(),
        _ => address.to_string(),
    };
    listing.venue = venue;
    listing.description = event.child_text("description").to_string();
    listing.lat = Some(event.child_text("latitude").to_string());
    listing.lon = Some(event.child_text("longitude").to_string());
    Some(listing)
}

fn listings_from(root: &XmlElement) -> Vec<RawListing> {
    root.descendants("event")
        .into_iter()
        .filter_map(listing_from)
        .collect()
}

impl SourceAdapter for EventfulAdapter {
    fn flavor(&self) -> SourceFlavor {
        SourceFlavor::Eventful
    }

    fn page_size(&self) -> u32 {
        Self::PAGE_SIZE
    }

    fn first_page<'a>(&'a self, query: &'a PageQuery) -> BoxFuture<'a, CollectorResult<FirstPage>> {
        Box::pin(async move {
            let root = self.fetch_page(query, 1).await?;
            let page_count = root.child_text("page_count").parse::<u32>().unwrap_or(1).max(1);
            let listings = listings_from(&root);
            debug!(hub = %query.hub, page_count, count = listings.len(), "eventful first page");
            Ok(FirstPage {
                page_count,
                listings,
            })
        })
    }

    fn page<'a>(
        &'a self,
        query: &'a PageQuery,
        page: u32,
    ) -> BoxFuture<'a, CollectorResult<Vec<RawListing>>> {
        Box::pin(async move { Ok(listings_from(&self.fetch_page(query, page).await?)) })
    }
}
