//! The facebook graph event search: one JSON request, no paging.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use hubcal_core::{BoxFuture, HubScope, SourceFlavor};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapter::{FirstPage, ListingTime, PageQuery, RawListing, SourceAdapter};
use crate::error::{CollectorError, CollectorResult};
use crate::fetch::HttpFetcher;
use crate::retry::{RetryPolicy, fetch_with_retry};

const SEARCH_URL: &str = "https://graph.facebook.com/search";
const LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
struct GraphResponse {
    #[serde(default)]
    data: Vec<GraphEvent>,
}

#[derive(Debug, Deserialize)]
struct GraphEvent {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    start_time: String,
}

/// Adapter for the graph API event search.
pub struct FacebookAdapter {
    fetcher: Arc<dyn HttpFetcher>,
    access_token: String,
    retry: RetryPolicy,
}

impl FacebookAdapter {
    /// Creates an adapter with the default retry policy.
    pub fn new(fetcher: Arc<dyn HttpFetcher>, access_token: impl Into<String>) -> Self {
        Self {
            fetcher,
            access_token: access_token.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Builder method to override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builds the search URL.
    pub fn search_url(&self, query: &PageQuery) -> String {
        let q = match &query.scope {
            HubScope::Place(place) => place
                .where_
                .as_deref()
                .or(place.city.as_deref())
                .unwrap_or_default(),
            HubScope::Topic { keyword } => keyword.as_str(),
        };
        format!(
            "{SEARCH_URL}?access_token={}&type=event&q={}&since=yesterday&limit={LIMIT}",
            urlencoding::encode(&self.access_token),
            urlencoding::encode(q)
        )
    }
}

/// Reads a graph start time: with offset, local, or date only.
fn parse_start(raw: &str) -> Option<(ListingTime, bool)> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some((ListingTime::Utc(instant.with_timezone(&Utc)), false));
    }
    if let Ok(local) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some((ListingTime::Local(local), false));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| (ListingTime::Local(date.and_time(NaiveTime::MIN)), true))
}

fn listing_from(event: GraphEvent) -> Option<RawListing> {
    let Some((start, allday)) = parse_start(&event.start_time) else {
        warn!(id = %event.id, start = %event.start_time, "facebook event with unreadable start skipped");
        return None;
    };
    let mut listing = RawListing::new(&event.id, event.name, start);
    listing.allday = allday;
    listing.url = format!("http://www.facebook.com/event.php?eid={}", event.id);
    listing.source = "facebook".to_string();
    listing.venue = event.location.clone();
    listing.location = event.location;
    Some(listing)
}

/// Parses a graph search response.
pub fn parse_response(body: &str) -> CollectorResult<Vec<RawListing>> {
    let response: GraphResponse = serde_json::from_str(body).map_err(|e| {
        CollectorError::parse(format!("bad graph response: {e}")).with_source(e)
    })?;
    Ok(response.data.into_iter().filter_map(listing_from).collect())
}

impl SourceAdapter for FacebookAdapter {
    fn flavor(&self) -> SourceFlavor {
        SourceFlavor::Facebook
    }

    fn page_size(&self) -> u32 {
        LIMIT
    }

    fn first_page<'a>(&'a self, query: &'a PageQuery) -> BoxFuture<'a, CollectorResult<FirstPage>> {
        Box::pin(async move {
            let url = self.search_url(query);
            let fetched = fetch_with_retry(self.fetcher.as_ref(), &url, &self.retry).await?;
            let listings = parse_response(&fetched.body)?;
            debug!(hub = %query.hub, count = listings.len(), "facebook search");
            Ok(FirstPage {
                page_count: 1,
                listings,
            })
        })
    }

    fn page<'a>(
        &'a self,
        _query: &'a PageQuery,
        _page: u32,
    ) -> BoxFuture<'a, CollectorResult<Vec<RawListing>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}
