//! Core error types.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while resolving time and hub configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A timezone name could not be resolved.
    #[error("unknown timezone: {name}")]
    UnknownTimezone { name: String },

    /// A datekey string is malformed.
    #[error("invalid datekey: {value}")]
    InvalidDateKey { value: String },

    /// A hub is configured inconsistently and cannot be aggregated.
    #[error("hub {hub}: {message}")]
    HubConfig { hub: String, message: String },

    /// A source flavor name is not recognized.
    #[error("unknown source flavor: {name}")]
    UnknownFlavor { name: String },

    /// The hub directory could not be read.
    #[error("hub directory unavailable: {message}")]
    DirectoryUnavailable { message: String },
}

impl CoreError {
    /// Creates an unknown timezone error.
    pub fn unknown_timezone(name: impl Into<String>) -> Self {
        Self::UnknownTimezone { name: name.into() }
    }

    /// Creates an invalid datekey error.
    pub fn invalid_datekey(value: impl Into<String>) -> Self {
        Self::InvalidDateKey {
            value: value.into(),
        }
    }

    /// Creates a hub configuration error.
    pub fn hub_config(hub: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HubConfig {
            hub: hub.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown flavor error.
    pub fn unknown_flavor(name: impl Into<String>) -> Self {
        Self::UnknownFlavor { name: name.into() }
    }

    /// Creates a directory unavailable error.
    pub fn directory_unavailable(message: impl Into<String>) -> Self {
        Self::DirectoryUnavailable {
            message: message.into(),
        }
    }
}
