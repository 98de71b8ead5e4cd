pub mod duration;

use std::path::{Path, PathBuf};
use std::time::Duration;

use pathrelay_core::database::CatalogSchema;
use serde::Deserialize;

use duration::deserialize_opt_duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_STATE_DB_PATH: &str = "./data/pathrelay.db";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_SETTLE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    pub catalog: CatalogSchema,
    pub timings: TimingsConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Create parent directories for every file the daemon writes.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for file in [Some(&self.database.path), self.logging.file.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Some(parent) = file.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
    /// Staging root that is watched.
    pub source_dir: PathBuf,
    /// Library root files are moved into.
    pub target_dir: PathBuf,
    /// The media server's SQLite library database.
    pub catalog_db: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingsConfig {
    pub settle_window: Duration,
    /// Zero keeps originals forever.
    pub retention: Duration,
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
    /// Environment variables that overrode file values.
    pub env_overrides: Vec<&'static str>,
}

impl ConfigMetadata {
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

/// On-disk shape of the config file. Every field is optional so the
/// environment can fill the gaps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub paths: PathsSection,
    pub catalog: CatalogSection,
    pub timings: TimingsSection,
    pub database: DatabaseSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub source_dir: Option<PathBuf>,
    pub target_dir: Option<PathBuf>,
    #[serde(alias = "emby_db")]
    pub catalog_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    pub table: Option<String>,
    pub path_column: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimingsSection {
    #[serde(alias = "update_after", deserialize_with = "deserialize_opt_duration")]
    pub settle_window: Option<Duration>,
    #[serde(alias = "delete_after", deserialize_with = "deserialize_opt_duration")]
    pub retention: Option<Duration>,
    #[serde(deserialize_with = "deserialize_opt_duration")]
    pub cleanup_interval: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}
