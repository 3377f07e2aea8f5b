//! Server error types.

use std::io;

use hubcal_collector::CollectorError;
use hubcal_core::CoreError;
use hubcal_store::StoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur scheduling or running aggregations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Persisted state could not be read or written.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A collection step failed.
    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),

    /// A hub could not be resolved.
    #[error("hub configuration error: {0}")]
    Core(#[from] CoreError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Shutdown requested.
    #[error("Server shutdown requested")]
    Shutdown,
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true for a shutdown-induced stop.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}
