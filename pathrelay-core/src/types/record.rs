use std::fmt;
use std::fs::Metadata;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use super::ids::{CatalogItemId, RecordId};
use crate::error::RelayError;

/// Lifecycle of a migration record.
///
/// `Staging` rows exist only between the moment a migration claims a source
/// path and the moment the rename completes. `Migrated -> Purged` is the only
/// transition a finished record ever makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationState {
    Staging,
    Migrated,
    Purged,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Staging => "staging",
            MigrationState::Migrated => "migrated",
            MigrationState::Purged => "purged",
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MigrationState {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(MigrationState::Staging),
            "migrated" => Ok(MigrationState::Migrated),
            "purged" => Ok(MigrationState::Purged),
            other => Err(RelayError::Store(format!(
                "unknown migration state '{other}'"
            ))),
        }
    }
}

/// Durable record of one file's move from staging into the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub id: RecordId,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    /// Modification time observed when the write settled.
    pub source_modified_at: Option<DateTime<Utc>>,
    pub migrated_at: Option<DateTime<Utc>>,
    /// Absent when retention was disabled at migration time.
    pub delete_at: Option<DateTime<Utc>>,
    pub state: MigrationState,
    /// Catalog rows this migration points at the library. `None` until they
    /// are captured, which always happens before the catalog is rewritten.
    pub catalog_items: Option<Vec<CatalogItemId>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Claim on a source path written before either store is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMigration {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub source_modified_at: Option<DateTime<Utc>>,
    pub staged_at: DateTime<Utc>,
}

/// A settled file handed from the watcher to a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedFile {
    pub path: PathBuf,
    pub modified_at: Option<DateTime<Utc>>,
}

impl DetectedFile {
    pub fn new(path: impl Into<PathBuf>, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            path: path.into(),
            modified_at,
        }
    }

    pub fn from_metadata(path: impl Into<PathBuf>, metadata: &Metadata) -> Self {
        let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
        Self::new(path, modified_at)
    }
}

/// Current time at the precision the state store keeps (milliseconds).
pub fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}
