//! Application configuration.
//!
//! All settings live in a single `hubcal.toml` file at
//! `~/.config/hubcal/hubcal.toml` by default. Every section is optional.
//!
//! ```toml
//! [storage]
//! root = "/var/lib/hubcal"
//!
//! [worker]
//! tick_secs = 60
//! where_interval_hours = 8
//!
//! [credentials]
//! eventful_app_key = "..."
//!
//! [[hubs]]
//! id = "elmcity"
//! kind = "where"
//! timezone = "eastern"
//! where = "keene,nh"
//! [[hubs.feeds]]
//! url = "http://example.org/cal.ics"
//! source = "Example"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use hubcal_collector::{CollectOptions, Credentials};
use hubcal_core::{CoreError, CoreResult, HubConfigSource, HubDefinition, HubDirectory};
use hubcal_server::WorkerConfig;
use hubcal_store::DedupMode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CliError, CliResult};

const MASK: &str = "********";

// ---------------------------------------------------------------------------
// AppConfig (hubcal.toml)
// ---------------------------------------------------------------------------

/// Configuration for hubcal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Storage settings.
    pub storage: StorageSettings,

    /// Worker settings.
    pub worker: WorkerSettings,

    /// Directory service credentials.
    pub credentials: Credentials,

    /// Configured hubs.
    pub hubs: Vec<HubDefinition>,
}

/// Where tables and blobs are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Storage root. Defaults to the user data directory.
    pub root: Option<PathBuf>,
}

/// Worker and collection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Seconds between polls of every hub.
    pub tick_secs: u64,

    /// Minimum hours between runs of a place hub.
    pub where_interval_hours: u64,

    /// Minimum hours between runs of a topic hub.
    pub what_interval_hours: u64,

    /// Days ahead to collect.
    pub horizon_days: u32,

    /// Caps pages and feeds for quick trial runs.
    pub test_mode: bool,

    /// Ical feeds fetched at once.
    pub max_concurrent_feeds: usize,

    /// Match events across sources on normalized titles instead of exact ones.
    pub normalize_titles: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            where_interval_hours: 8,
            what_interval_hours: 24,
            horizon_days: 90,
            test_mode: false,
            max_concurrent_feeds: 8,
            normalize_titles: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration.
    ///
    /// An explicit path must exist. The default path falls back to an empty
    /// configuration when missing.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    debug!(path = %path.display(), "no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parses TOML configuration text.
    pub fn parse(content: &str) -> CliResult<Self> {
        toml::from_str(content).map_err(|e| CliError::Config(format!("failed to parse config: {e}")))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hubcal")
            .join("hubcal.toml")
    }

    /// Returns the default storage root.
    pub fn default_storage_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hubcal")
    }

    /// Returns the configured storage root.
    pub fn storage_root(&self) -> PathBuf {
        self.storage
            .root
            .clone()
            .unwrap_or_else(Self::default_storage_root)
    }

    /// Returns the hub directory.
    pub fn directory(&self) -> HubDirectory {
        HubDirectory::new(self.hubs.clone())
    }

    /// Builds the worker configuration.
    pub fn to_worker_config(&self) -> WorkerConfig {
        let w = &self.worker;
        let dedup = if w.normalize_titles {
            DedupMode::NormalizedTitle
        } else {
            DedupMode::Exact
        };
        let collect = CollectOptions {
            test_mode: w.test_mode,
            horizon_days: w.horizon_days.max(1),
            max_concurrent_feeds: w.max_concurrent_feeds.max(1),
            ..CollectOptions::default()
        };
        WorkerConfig::default()
            .with_tick(Duration::from_secs(w.tick_secs))
            .with_interval_hours(w.where_interval_hours, w.what_interval_hours)
            .with_dedup_mode(dedup)
            .with_collect(collect)
    }

    /// Resolves every hub and returns the failures.
    pub fn validate(&self) -> Vec<CoreError> {
        self.hubs.iter().filter_map(|h| h.resolve().err()).collect()
    }

    /// Returns a copy with credential values masked.
    pub fn masked(&self) -> Self {
        let mask = |key: &Option<String>| key.as_ref().map(|_| MASK.to_string());
        let c = &self.credentials;
        Self {
            credentials: Credentials {
                eventful_app_key: mask(&c.eventful_app_key),
                upcoming_api_key: mask(&c.upcoming_api_key),
                eventbrite_app_key: mask(&c.eventbrite_app_key),
                facebook_access_token: mask(&c.facebook_access_token),
            },
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// TomlHubSource
// ---------------------------------------------------------------------------

/// Reads the hub directory from a config file on every load, so a reload
/// picks up edits.
#[derive(Debug, Clone)]
pub struct TomlHubSource {
    path: Option<PathBuf>,
}

impl TomlHubSource {
    /// Creates a source. `None` reads the default path.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl HubConfigSource for TomlHubSource {
    fn load(&self) -> CoreResult<HubDirectory> {
        let config = AppConfig::load(self.path.as_deref())
            .map_err(|e| CoreError::directory_unavailable(e.to_string()))?;
        Ok(config.directory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubcal_core::{HubKind, QuirkKind};

    const SAMPLE: &str = r#"
[storage]
root = "/var/lib/hubcal"

[worker]
tick_secs = 30
where_interval_hours = 4
test_mode = true

[credentials]
eventful_app_key = "ev-key"

[[hubs]]
id = "elmcity"
kind = "where"
timezone = "eastern"
where = "keene,nh"
lat = "42.9336"
lon = "-72.2781"
radius = 15
flavors = ["eventful"]
quirk = "unescape_semicolons"
[[hubs.feeds]]
url = "http://example.org/cal.ics"
source = "Example"
categories = "music,arts"

[[hubs]]
id = "jazz"
kind = "what"
timezone = "America/Chicago"
keyword = "jazz"
flavors = ["eventbrite"]
"#;

    mod parsing {
        use super::*;

        #[test]
        fn empty_file_is_default() {
            let config = AppConfig::parse("").unwrap();
            assert_eq!(config, AppConfig::default());
            assert_eq!(config.worker.tick_secs, 60);
            assert!(config.hubs.is_empty());
        }

        #[test]
        fn full_sample() {
            let config = AppConfig::parse(SAMPLE).unwrap();
            assert_eq!(config.storage_root(), PathBuf::from("/var/lib/hubcal"));
            assert_eq!(config.worker.tick_secs, 30);
            assert_eq!(config.worker.what_interval_hours, 24);
            assert_eq!(config.credentials.eventful_app_key.as_deref(), Some("ev-key"));
            assert_eq!(config.hubs.len(), 2);

            let elm = &config.hubs[0];
            assert_eq!(elm.kind, HubKind::Where);
            assert_eq!(elm.where_.as_deref(), Some("keene,nh"));
            assert_eq!(elm.radius, 15);
            assert_eq!(elm.quirk, Some(QuirkKind::UnescapeSemicolons));
            assert_eq!(elm.feeds[0].categories.as_deref(), Some("music,arts"));

            let jazz = &config.hubs[1];
            assert_eq!(jazz.kind, HubKind::What);
            assert_eq!(jazz.keyword.as_deref(), Some("jazz"));
            assert!(config.validate().is_empty());
        }

        #[test]
        fn malformed_toml_is_config_error() {
            let err = AppConfig::parse("[worker\ntick_secs = 1").unwrap_err();
            assert!(matches!(err, CliError::Config(_)));
        }

        #[test]
        fn bad_timezone_fails_validation() {
            let config = AppConfig::parse(
                r#"
[[hubs]]
id = "nowhere"
timezone = "Mars/Olympus"
where = "olympus"
"#,
            )
            .unwrap();
            let errors = config.validate();
            assert_eq!(errors.len(), 1);
            assert!(matches!(errors[0], CoreError::HubConfig { .. }));
        }
    }

    mod worker_config {
        use super::*;

        #[test]
        fn maps_settings() {
            let config = AppConfig::parse(SAMPLE).unwrap();
            let worker = config.to_worker_config();
            assert_eq!(worker.tick, Duration::from_secs(30));
            assert_eq!(worker.interval_for(HubKind::Where), Duration::from_secs(4 * 3600));
            assert_eq!(worker.interval_for(HubKind::What), Duration::from_secs(24 * 3600));
            assert!(worker.collect.test_mode);
            assert_eq!(worker.dedup_mode, DedupMode::Exact);
        }

        #[test]
        fn normalized_titles_opt_in() {
            let config = AppConfig::parse("[worker]\nnormalize_titles = true\n").unwrap();
            assert_eq!(config.to_worker_config().dedup_mode, DedupMode::NormalizedTitle);
        }

        #[test]
        fn zero_feed_concurrency_is_clamped() {
            let config = AppConfig::parse("[worker]\nmax_concurrent_feeds = 0\n").unwrap();
            assert_eq!(config.to_worker_config().collect.max_concurrent_feeds, 1);
        }
    }

    mod files {
        use super::*;

        #[test]
        fn explicit_missing_path_errors() {
            let dir = tempfile::tempdir().unwrap();
            let result = AppConfig::load(Some(&dir.path().join("missing.toml")));
            assert!(matches!(result, Err(CliError::Config(_))));
        }

        #[test]
        fn source_rereads_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("hubcal.toml");
            std::fs::write(&path, SAMPLE).unwrap();

            let source = TomlHubSource::new(Some(path.clone()));
            assert_eq!(source.load().unwrap().len(), 2);

            std::fs::write(
                &path,
                "[[hubs]]\nid = \"solo\"\ntimezone = \"UTC\"\nwhere = \"here\"\n",
            )
            .unwrap();
            let directory = source.load().unwrap();
            assert_eq!(directory.len(), 1);
            assert!(directory.get("solo").is_some());
        }

        #[test]
        fn unreadable_source_is_directory_error() {
            let dir = tempfile::tempdir().unwrap();
            let source = TomlHubSource::new(Some(dir.path().join("missing.toml")));
            let err = source.load().unwrap_err();
            assert!(matches!(err, CoreError::DirectoryUnavailable { .. }));
        }
    }

    mod masking {
        use super::*;

        #[test]
        fn credentials_are_masked() {
            let config = AppConfig::parse(SAMPLE).unwrap();
            let masked = config.masked();
            assert_eq!(masked.credentials.eventful_app_key.as_deref(), Some(MASK));
            assert_eq!(masked.credentials.upcoming_api_key, None);
            assert_eq!(masked.hubs, config.hubs);
        }

        #[test]
        fn masked_config_serializes() {
            let config = AppConfig::parse(SAMPLE).unwrap();
            let text = toml::to_string_pretty(&config.masked()).unwrap();
            assert!(text.contains(MASK));
            assert!(!text.contains("ev-key"));
            let back = AppConfig::parse(&text).unwrap();
            assert_eq!(back.hubs.len(), 2);
        }
    }
}
