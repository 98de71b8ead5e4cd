use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::models::Config;

/// Settings the daemon refuses to start with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("missing required setting {key} (or {env})")]
    MissingSetting {
        key: &'static str,
        env: &'static str,
    },
    #[error("source_dir and target_dir must differ (both are {path})")]
    SameRoots { path: PathBuf },
    #[error("{inner} is inside {outer}; the watcher would observe its own moves")]
    NestedRoots { outer: PathBuf, inner: PathBuf },
    #[error("catalog {key} '{value}' is not a plain SQL identifier")]
    InvalidIdentifier { key: &'static str, value: String },
    #[error("cleanup_interval must be greater than zero")]
    ZeroCleanupInterval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Retention of zero: originals are never purged.
    PurgeDisabled,
    RelativePath { key: &'static str, path: PathBuf },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::PurgeDisabled => {
                f.write_str("retention is 0; staging originals will never be purged")
            }
            ConfigWarning::RelativePath { key, path } => write!(
                f,
                "{key} '{}' is relative and resolves against the working directory",
                path.display()
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigWarnings {
    items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push(&mut self, warning: ConfigWarning) {
        self.items.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }

    pub fn contains(&self, warning: &ConfigWarning) -> bool {
        self.items.contains(warning)
    }

    pub fn log(&self) {
        for warning in &self.items {
            warn!(message = %warning, "configuration warning");
        }
    }
}

/// Fatal checks first, then the non-fatal warnings.
pub fn validate(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let source = comparable(&config.paths.source_dir);
    let target = comparable(&config.paths.target_dir);

    if source == target {
        return Err(ConfigGuardRailError::SameRoots {
            path: config.paths.source_dir.clone(),
        });
    }
    if target.starts_with(&source) {
        return Err(ConfigGuardRailError::NestedRoots {
            outer: config.paths.source_dir.clone(),
            inner: config.paths.target_dir.clone(),
        });
    }
    if source.starts_with(&target) {
        return Err(ConfigGuardRailError::NestedRoots {
            outer: config.paths.target_dir.clone(),
            inner: config.paths.source_dir.clone(),
        });
    }
    if config.timings.cleanup_interval.is_zero() {
        return Err(ConfigGuardRailError::ZeroCleanupInterval);
    }

    let mut warnings = ConfigWarnings::default();
    if config.timings.retention.is_zero() {
        warnings.push(ConfigWarning::PurgeDisabled);
    }
    for (key, path) in [
        ("paths.source_dir", &config.paths.source_dir),
        ("paths.target_dir", &config.paths.target_dir),
        ("paths.catalog_db", &config.paths.catalog_db),
        ("database.path", &config.database.path),
    ] {
        if path.is_relative() {
            warnings.push(ConfigWarning::RelativePath {
                key,
                path: path.clone(),
            });
        }
    }
    Ok(warnings)
}

fn comparable(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
