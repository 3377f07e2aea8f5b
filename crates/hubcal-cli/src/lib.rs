//! Command-line interface for hubcal.
//!
//! This crate provides the `hubcal` binary: one-shot aggregation, the
//! polling worker, scheduling reports and configuration commands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use config::{AppConfig, TomlHubSource};
pub use error::{CliError, CliResult};
