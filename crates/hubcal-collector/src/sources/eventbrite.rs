//! The eventbrite.com event search.

use std::sync::{Arc, LazyLock};

use chrono::{NaiveDateTime, NaiveTime};
use hubcal_core::{BoxFuture, HubScope, SourceFlavor};
use regex::Regex;
use tracing::{debug, warn};

use super::xml::{XmlElement, parse_xml};
use crate::adapter::{FirstPage, ListingTime, PageQuery, RawListing, SourceAdapter, page_count};
use crate::error::CollectorResult;
use crate::fetch::HttpFetcher;
use crate::retry::{RetryPolicy, fetch_with_retry};

const SEARCH_URL: &str = "https://www.eventbrite.com/xml/event_search";

// descriptions carry unescaped HTML that breaks the XML parser
static DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<description>.*?</description>").expect("description regex is valid")
});

/// Adapter for the eventbrite XML search.
pub struct EventbriteAdapter {
    fetcher: Arc<dyn HttpFetcher>,
    app_key: String,
    retry: RetryPolicy,
}

impl EventbriteAdapter {
    /// Production page size.
    pub const PAGE_SIZE: u32 = 10;

    /// Creates an adapter with the default retry policy.
    pub fn new(fetcher: Arc<dyn HttpFetcher>, app_key: impl Into<String>) -> Self {
        Self {
            fetcher,
            app_key: app_key.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Builder method to override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builds the search URL for a page.
    pub fn search_url(&self, query: &PageQuery, page: u32) -> String {
        let scope = match &query.scope {
            HubScope::Place(place) => {
                let city = place
                    .city
                    .as_deref()
                    .or(place.where_.as_deref())
                    .unwrap_or_default();
                let mut scope = format!("city={}", urlencoding::encode(city));
                if let Some(region) = &place.region {
                    scope.push_str(&format!("&region={}", urlencoding::encode(region)));
                }
                scope.push_str(&format!("&within={}", place.radius));
                scope
            }
            HubScope::Topic { keyword } => format!("keywords={}", urlencoding::encode(keyword)),
        };
        format!(
            "{SEARCH_URL}?app_key={}&{scope}&date={}+{}&max={}&page={page}",
            urlencoding::encode(&self.app_key),
            query.from.format("%Y-%m-%d"),
            query.to.format("%Y-%m-%d"),
            query.page_size
        )
    }

    async fn fetch_page(&self, query: &PageQuery, page: u32) -> CollectorResult<XmlElement> {
        let url = self.search_url(query, page);
        let fetched = fetch_with_retry(self.fetcher.as_ref(), &url, &self.retry).await?;
        parse_xml(&strip_descriptions(&fetched.body))
    }
}

/// Removes `<description>` elements.
pub fn strip_descriptions(xml: &str) -> String {
    DESCRIPTION_RE.replace_all(xml, "").into_owned()
}

fn listing_from(event: &XmlElement) -> Option<RawListing> {
    let id = event.child_text("id");
    let raw_start = event.child_text("start_date");
    let Ok(start) = NaiveDateTime::parse_from_str(raw_start, "%Y-%m-%d %H:%M:%S") else {
        warn!(id, start = raw_start, "eventbrite event with unreadable start skipped");
        return None;
    };

    let venue = event.child("venue");
    let venue_text = |name: &str| venue.map(|v| v.child_text(name).to_string()).unwrap_or_default();

    let mut listing = RawListing::new(id, event.child_text("title"), ListingTime::Local(start));
    listing.allday = start.time() == NaiveTime::MIN;
    listing.url = event.child_text("url").to_string();
    listing.source = "eventbrite".to_string();
    listing.venue = venue_text("name");
    listing.location = listing.venue.clone();
    listing.lat = Some(venue_text("latitude"));
    listing.lon = Some(venue_text("longitude"));
    Some(listing)
}

fn listings_from(root: &XmlElement) -> Vec<RawListing> {
    root.descendants("event")
        .into_iter()
        .filter_map(listing_from)
        .collect()
}

impl SourceAdapter for EventbriteAdapter {
    fn flavor(&self) -> SourceFlavor {
        SourceFlavor::Eventbrite
    }

    fn page_size(&self) -> u32 {
        Self::PAGE_SIZE
    }

    fn first_page<'a>(&'a self, query: &'a PageQuery) -> BoxFuture<'a, CollectorResult<FirstPage>> {
        Box::pin(async move {
            let root = self.fetch_page(query, 1).await?;
            let total = root
                .descendants("summary")
                .first()
                .and_then(|s| s.child_text("total_items").parse::<u64>().ok())
                .unwrap_or(0);
            let listings = listings_from(&root);
            debug!(hub = %query.hub, total, count = listings.len(), "eventbrite first page");
            Ok(FirstPage {
                page_count: page_count(total, query.page_size),
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
