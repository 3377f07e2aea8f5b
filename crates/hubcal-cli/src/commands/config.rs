//! Configuration commands.

use std::path::Path;

use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

/// Dump the current configuration to stdout, with credentials masked.
pub fn dump(config_path: &Path, config: &AppConfig) -> CliResult<()> {
    let toml_str = toml::to_string_pretty(&config.masked())
        .map_err(|e| CliError::Config(format!("failed to serialize config: {e}")))?;
    println!("# {}", config_path.display());
    println!("{toml_str}");

    Ok(())
}

/// Validate the configuration by resolving every hub.
pub fn validate(config: &AppConfig) -> CliResult<()> {
    let errors = config.validate();
    for err in &errors {
        eprintln!("  {err}");
    }
    if !errors.is_empty() {
        return Err(CliError::Config(format!(
            "{} of {} hubs are invalid",
            errors.len(),
            config.hubs.len()
        )));
    }

    println!("Configuration is valid ({} hubs).", config.hubs.len());
    Ok(())
}

/// Show the configuration file and storage paths.
pub fn path(config_path: &Path, config: &AppConfig) -> CliResult<()> {
    println!("config: {}", config_path.display());
    println!("storage: {}", config.storage_root().display());
    Ok(())
}
