//! Error types for collection.
//!
//! Errors carry a [`CollectorErrorCode`] so the retry primitive and the
//! per-feed bookkeeping can tell transient failures from permanent ones.

use std::fmt;
use thiserror::Error;

/// The category of a collection error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorErrorCode {
    /// Connection failed, DNS resolution, reset.
    NetworkError,
    /// The request or the overall retry budget timed out.
    Timeout,
    /// Upstream asked us to slow down (429).
    RateLimited,
    /// Upstream returned a 5xx status.
    ServerError,
    /// Upstream returned 404.
    NotFound,
    /// Upstream rejected the request (4xx other than 404 and 429).
    BadRequest,
    /// The body could not be parsed.
    ParseError,
    /// Missing credential or unusable hub settings.
    ConfigurationError,
    /// Persisting results failed.
    StorageError,
    /// Unexpected state.
    InternalError,
    /// The run was asked to stop.
    Cancelled,
}

impl CollectorErrorCode {
    /// Returns true if this error is transient and the request may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::RateLimited | Self::ServerError
        )
    }

    /// Returns the snake_case name of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::ParseError => "parse_error",
            Self::ConfigurationError => "configuration_error",
            Self::StorageError => "storage_error",
            Self::InternalError => "internal_error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CollectorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error raised while fetching or interpreting a source.
#[derive(Debug, Error)]
pub struct CollectorError {
    code: CollectorErrorCode,
    message: String,
    /// Feed URL or flavor name the error belongs to.
    feed: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CollectorError {
    /// Creates an error with the given code and message.
    pub fn new(code: CollectorErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            feed: None,
            source: None,
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(CollectorErrorCode::NetworkError, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CollectorErrorCode::Timeout, message)
    }

    /// Creates a rate limit error.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(CollectorErrorCode::RateLimited, message)
    }

    /// Creates a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(CollectorErrorCode::ServerError, message)
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CollectorErrorCode::NotFound, message)
    }

    /// Creates a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(CollectorErrorCode::BadRequest, message)
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(CollectorErrorCode::ParseError, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(CollectorErrorCode::ConfigurationError, message)
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(CollectorErrorCode::StorageError, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CollectorErrorCode::InternalError, message)
    }

    /// Creates a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(CollectorErrorCode::Cancelled, message)
    }

    /// Sets the feed URL or flavor this error belongs to.
    pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
        self.feed = Some(feed.into());
        self
    }

    /// Sets the underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> CollectorErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the feed, if set.
    pub fn feed(&self) -> Option<&str> {
        self.feed.as_deref()
    }

    /// Returns true if this error is transient and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref feed) = self.feed {
            write!(f, "[{}] ", feed)?;
        }
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<hubcal_store::StoreError> for CollectorError {
    fn from(err: hubcal_store::StoreError) -> Self {
        Self::storage(err.to_string()).with_source(err)
    }
}

/// A specialized Result type for collection.
pub type CollectorResult<T> = Result<T, CollectorError>;
