//! CLI error types.

use hubcal_core::{CoreError, TracingError};
use hubcal_server::ServerError;
use hubcal_store::StoreError;
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The requested hub is not configured.
    #[error("unknown hub: {0}")]
    UnknownHub(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Hub configuration error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Worker or aggregation error.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Logging could not be set up.
    #[error(transparent)]
    Tracing(#[from] TracingError),
}

impl From<hubcal_collector::CollectorError> for CliError {
    fn from(err: hubcal_collector::CollectorError) -> Self {
        Self::Server(ServerError::from(err))
    }
}
