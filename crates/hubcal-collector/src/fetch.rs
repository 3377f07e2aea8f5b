//! HTTP fetching.
//!
//! Adapters never talk to reqwest directly; they go through [`HttpFetcher`]
//! so runs can be driven from canned responses ([`StaticFetcher`]) in tests
//! and offline replays.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use hubcal_core::BoxFuture;
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::error::{CollectorError, CollectorResult};

/// A successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    /// Response text.
    pub body: String,
    /// `Content-Type` header, empty if absent.
    pub content_type: String,
}

/// Performs GET requests.
pub trait HttpFetcher: Send + Sync {
    /// Fetches a URL, mapping non-success statuses to errors.
    fn get(&self, url: &str) -> BoxFuture<'_, CollectorResult<FetchedBody>>;
}

/// Maps a non-success status to an error with the right retry class.
pub fn status_error(status: u16, body: &str) -> CollectorError {
    match status {
        404 => CollectorError::not_found("resource not found"),
        429 => CollectorError::rate_limited("too many requests"),
        s if (500..600).contains(&s) => CollectorError::server(format!("server error ({s}): {body}")),
        s => CollectorError::bad_request(format!("unexpected status {s}: {body}")),
    }
}

/// Production fetcher backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    /// Per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a fetcher with the default timeout.
    pub fn new() -> CollectorResult<Self> {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    /// Creates a fetcher with a per-request timeout.
    pub fn with_timeout(timeout: Duration) -> CollectorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hubcal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                CollectorError::internal(format!("failed to create HTTP client: {e}")).with_source(e)
            })?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn get(&self, url: &str) -> BoxFuture<'_, CollectorResult<FetchedBody>> {
        let url = url.to_string();
        Box::pin(async move {
            trace!(url = %url, "sending request");
            let response = self.client.get(&url).send().await.map_err(|e| {
                if e.is_timeout() {
                    CollectorError::timeout(format!("request timed out: {e}")).with_source(e)
                } else {
                    CollectorError::network(format!("request failed: {e}")).with_source(e)
                }
            })?;

            let status = response.status();
            trace!(status = %status, "received response");
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();

            if status == StatusCode::OK {
                let body = response.text().await.map_err(|e| {
                    CollectorError::network(format!("failed to read response: {e}")).with_source(e)
                })?;
                return Ok(FetchedBody { body, content_type });
            }

            let body = response.text().await.unwrap_or_default();
            if !status.is_server_error() {
                warn!(status = %status, url = %url, "unexpected response status");
            }
            Err(status_error(status.as_u16(), &body))
        })
    }
}

/// A canned response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticResponse {
    /// HTTP status.
    pub status: u16,
    /// Body text.
    pub body: String,
    /// Content type.
    pub content_type: String,
}

impl StaticResponse {
    /// A 200 response.
    pub fn ok(body: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    /// A response with the given status and empty body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            content_type: String::new(),
        }
    }
}

/// Fetcher answering from canned responses keyed by URL prefix.
///
/// The longest registered prefix of a requested URL wins. A route with
/// several responses serves them in order and then keeps repeating the last
/// one. Unrouted URLs get a 404.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    routes: Mutex<Vec<(String, VecDeque<StaticResponse>)>>,
    requests: Mutex<HashMap<String, usize>>,
}

impl StaticFetcher {
    /// Creates a fetcher with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to route a prefix to one response.
    pub fn with_response(self, prefix: impl Into<String>, response: StaticResponse) -> Self {
        self.with_sequence(prefix, vec![response])
    }

    /// Builder method to route a prefix to a sequence of responses.
    pub fn with_sequence(mut self, prefix: impl Into<String>, responses: Vec<StaticResponse>) -> Self {
        self.routes
            .get_mut()
            .push((prefix.into(), responses.into_iter().collect()));
        self
    }

    /// Replaces the responses of a prefix.
    pub async fn set_response(&self, prefix: &str, response: StaticResponse) {
        let mut routes = self.routes.lock().await;
        routes.retain(|(p, _)| p != prefix);
        routes.push((prefix.to_string(), VecDeque::from([response])));
    }

    /// Returns how many requests were made for exactly `url`.
    pub async fn request_count(&self, url: &str) -> usize {
        self.requests.lock().await.get(url).copied().unwrap_or(0)
    }

    /// Returns the URLs requested so far, sorted.
    pub async fn requested_urls(&self) -> Vec<String> {
        let mut urls: Vec<_> = self.requests.lock().await.keys().cloned().collect();
        urls.sort();
        urls
    }
}

impl HttpFetcher for StaticFetcher {
    fn get(&self, url: &str) -> BoxFuture<'_, CollectorResult<FetchedBody>> {
        let url = url.to_string();
        Box::pin(async move {
            *self.requests.lock().await.entry(url.clone()).or_default() += 1;

            let response = {
                let mut routes = self.routes.lock().await;
                let best = routes
                    .iter_mut()
                    .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
                    .max_by_key(|(prefix, _)| prefix.len());
                match best {
                    Some((_, queue)) if queue.len() > 1 => queue.pop_front(),
                    Some((_, queue)) => queue.front().cloned(),
                    None => None,
                }
            };

            match response {
                Some(r) if r.status == 200 => Ok(FetchedBody {
                    body: r.body,
                    content_type: r.content_type,
                }),
                Some(r) => Err(status_error(r.status, &r.body)),
                None => Err(status_error(404, "")),
            }
        })
    }
}
