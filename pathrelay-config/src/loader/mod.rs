//! Resolves a [`Config`] from an optional config file, a `.env` file and
//! `PATHRELAY_*` environment variables, in that order of precedence
//! (environment wins).

pub mod error;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pathrelay_core::database::CatalogSchema;
use pathrelay_core::database::infrastructure::sqlite::{
    DEFAULT_CATALOG_PATH_COLUMN, DEFAULT_CATALOG_TABLE,
};
use tracing::debug;

use crate::models::duration::parse_duration;
use crate::models::{
    Config, ConfigMetadata, DEFAULT_CLEANUP_INTERVAL, DEFAULT_CONFIG_PATH, DEFAULT_LOG_LEVEL,
    DEFAULT_SETTLE_WINDOW, DEFAULT_STATE_DB_PATH, DatabaseConfig, FileConfig, LoggingConfig,
    PathsConfig, TimingsConfig,
};
use crate::validation::{ConfigGuardRailError, ConfigWarnings, validate};
use error::ConfigLoadError;

pub const ENV_CONFIG_PATH: &str = "PATHRELAY_CONFIG";
pub const ENV_SOURCE_DIR: &str = "PATHRELAY_SOURCE_DIR";
pub const ENV_TARGET_DIR: &str = "PATHRELAY_TARGET_DIR";
pub const ENV_CATALOG_DB: &str = "PATHRELAY_CATALOG_DB";
pub const ENV_STATE_DB: &str = "PATHRELAY_STATE_DB";
pub const ENV_SETTLE_WINDOW: &str = "PATHRELAY_SETTLE_WINDOW";
pub const ENV_RETENTION: &str = "PATHRELAY_RETENTION";
pub const ENV_CLEANUP_INTERVAL: &str = "PATHRELAY_CLEANUP_INTERVAL";
pub const ENV_LOG_LEVEL: &str = "PATHRELAY_LOG_LEVEL";
pub const ENV_LOG_FILE: &str = "PATHRELAY_LOG_FILE";

#[derive(Debug, Clone)]
enum EnvSource {
    Process,
    Fixed(HashMap<String, String>),
}

/// Builder for loading configuration.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env: EnvSource,
    load_env_file: bool,
}

/// A loaded configuration together with its non-fatal findings.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env: EnvSource::Process,
            load_env_file: true,
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Read overrides from `vars` instead of the process environment. No
    /// `.env` file is loaded in this mode.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = EnvSource::Fixed(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self.load_env_file = false;
        self
    }

    pub fn without_env_file(mut self) -> Self {
        self.load_env_file = false;
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;

        let config_path = self.resolve_config_path();
        let file = match &config_path {
            Some(path) => load_file(path)?,
            None => {
                debug!("no config file found, using environment only");
                FileConfig::default()
            }
        };

        let mut overrides = Vec::new();
        let mut config = self.resolve(file, &mut overrides)?;
        config.metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
            env_overrides: overrides,
        };

        let warnings = validate(&config)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        if !self.load_env_file {
            return Ok(false);
        }
        match dotenvy::dotenv() {
            Ok(path) => {
                debug!(path = %path.display(), "loaded .env file");
                Ok(true)
            }
            Err(err) if err.not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn var(&self, key: &str) -> Option<String> {
        let value = match &self.env {
            EnvSource::Process => std::env::var(key).ok(),
            EnvSource::Fixed(vars) => vars.get(key).cloned(),
        }?;
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn resolve_config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            return Some(path.clone());
        }
        if let Some(path) = self.var(ENV_CONFIG_PATH) {
            return Some(PathBuf::from(path));
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        default.exists().then(|| default.to_path_buf())
    }

    fn override_string(
        &self,
        key: &'static str,
        overrides: &mut Vec<&'static str>,
    ) -> Option<String> {
        let value = self.var(key)?;
        overrides.push(key);
        Some(value)
    }

    fn override_path(
        &self,
        key: &'static str,
        overrides: &mut Vec<&'static str>,
    ) -> Option<PathBuf> {
        self.override_string(key, overrides).map(PathBuf::from)
    }

    fn override_duration(
        &self,
        key: &'static str,
        overrides: &mut Vec<&'static str>,
    ) -> Result<Option<Duration>, ConfigLoadError> {
        let Some(raw) = self.override_string(key, overrides) else {
            return Ok(None);
        };
        parse_duration(&raw)
            .map(Some)
            .map_err(|message| ConfigLoadError::InvalidDuration {
                key,
                value: raw,
                message,
            })
    }

    fn resolve(
        &self,
        file: FileConfig,
        overrides: &mut Vec<&'static str>,
    ) -> Result<Config, ConfigLoadError> {
        let required = |value: Option<PathBuf>, key: &'static str, env: &'static str| {
            value.ok_or(ConfigGuardRailError::MissingSetting { key, env })
        };

        let paths = PathsConfig {
            source_dir: required(
                self.override_path(ENV_SOURCE_DIR, overrides)
                    .or(file.paths.source_dir),
                "paths.source_dir",
                ENV_SOURCE_DIR,
            )?,
            target_dir: required(
                self.override_path(ENV_TARGET_DIR, overrides)
                    .or(file.paths.target_dir),
                "paths.target_dir",
                ENV_TARGET_DIR,
            )?,
            catalog_db: required(
                self.override_path(ENV_CATALOG_DB, overrides)
                    .or(file.paths.catalog_db),
                "paths.catalog_db",
                ENV_CATALOG_DB,
            )?,
        };

        let table = file
            .catalog
            .table
            .unwrap_or_else(|| DEFAULT_CATALOG_TABLE.to_string());
        let path_column = file
            .catalog
            .path_column
            .unwrap_or_else(|| DEFAULT_CATALOG_PATH_COLUMN.to_string());
        let catalog = CatalogSchema::new(table, path_column).map_err(|err| {
            ConfigGuardRailError::InvalidIdentifier {
                key: err.field,
                value: err.value,
            }
        })?;

        let timings = TimingsConfig {
            settle_window: self
                .override_duration(ENV_SETTLE_WINDOW, overrides)?
                .or(file.timings.settle_window)
                .unwrap_or(DEFAULT_SETTLE_WINDOW),
            retention: self
                .override_duration(ENV_RETENTION, overrides)?
                .or(file.timings.retention)
                .unwrap_or(Duration::ZERO),
            cleanup_interval: self
                .override_duration(ENV_CLEANUP_INTERVAL, overrides)?
                .or(file.timings.cleanup_interval)
                .unwrap_or(DEFAULT_CLEANUP_INTERVAL),
        };

        let database = DatabaseConfig {
            path: self
                .override_path(ENV_STATE_DB, overrides)
                .or(file.database.path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DB_PATH)),
        };

        let logging = LoggingConfig {
            level: self
                .override_string(ENV_LOG_LEVEL, overrides)
                .or(file.logging.level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            file: self
                .override_path(ENV_LOG_FILE, overrides)
                .or(file.logging.file),
        };

        Ok(Config {
            paths,
            catalog,
            timings,
            database,
            logging,
            metadata: ConfigMetadata::default(),
        })
    }
}

/// Read a config file, choosing the format by extension and falling back
/// to TOML-then-JSON for anything else.
pub fn load_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let origin = path.display().to_string();

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => {
            serde_json::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                origin,
                message: err.to_string(),
            })
        }
        Some("toml") => toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
            origin,
            message: err.to_string(),
        }),
        _ => parse_from_str(&contents, &origin),
    }
}

pub fn parse_from_str(contents: &str, origin: &str) -> Result<FileConfig, ConfigLoadError> {
    // Try TOML first, then JSON for convenience.
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| ConfigLoadError::Parse {
            origin: origin.to_string(),
            message: format!("toml error: {toml_err}; json error: {json_err}"),
        })
    })
}
