//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// hubcal - calendar hub aggregator
#[derive(Debug, Parser)]
#[command(name = "hubcal")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "HUBCAL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Returns true when logs should be emitted as JSON lines.
    pub fn json_logs(&self) -> bool {
        matches!(self.command, Command::Worker { json_logs: true })
    }

    /// Returns true for the long-running worker.
    pub fn is_worker(&self) -> bool {
        matches!(self.command, Command::Worker { .. })
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Aggregate one hub now
    Aggregate {
        /// Hub id
        hub: String,

        /// Only run if the hub's interval has elapsed
        #[arg(long)]
        if_due: bool,
    },

    /// Run the polling worker in the foreground
    Worker {
        /// Emit logs as JSON lines
        #[arg(long)]
        json_logs: bool,
    },

    /// Show task and lock state of every hub
    Status,

    /// List hubs whose last run looks abandoned
    Abandoned,

    /// Clear a hub's lock and reset its task to idle
    Unlock {
        /// Hub id
        hub: String,
    },

    /// Show the merged events of a hub by day
    Days {
        /// Hub id
        hub: String,

        /// List event titles under each day
        #[arg(long, short)]
        events: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration, with credentials masked
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
