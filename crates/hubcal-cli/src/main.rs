//! hubcal CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;

use hubcal_cli::cli::{Cli, Command, ConfigAction};
use hubcal_cli::commands;
use hubcal_cli::config::AppConfig;
use hubcal_cli::error::CliResult;
use hubcal_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(tracing_config(&cli)) {
        eprintln!("warning: {e}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn tracing_config(cli: &Cli) -> TracingConfig {
    match (cli.json_logs(), cli.is_worker(), cli.debug) {
        (true, _, true) => TracingConfig::worker().with_level(Level::DEBUG),
        (true, _, false) => TracingConfig::worker(),
        (false, _, true) => TracingConfig::cli_debug(),
        (false, true, false) => TracingConfig::cli().with_level(Level::INFO),
        (false, false, false) => TracingConfig::cli(),
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);

    match cli.command {
        Command::Aggregate { hub, if_due } => commands::aggregate::run(&config, &hub, if_due).await,
        Command::Worker { .. } => commands::worker::run(cli.config, &config).await,
        Command::Status => commands::status::status(&config).await,
        Command::Abandoned => commands::status::abandoned(&config).await,
        Command::Unlock { hub } => commands::status::unlock(&config, &hub).await,
        Command::Days { hub, events } => commands::days::run(&config, &hub, events).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config_path, &config),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config_path, &config),
        },
    }
}
