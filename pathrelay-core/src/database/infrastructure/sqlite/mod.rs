pub mod catalog;
pub mod migration_records;

pub use catalog::{
    CatalogSchema, DEFAULT_CATALOG_PATH_COLUMN, DEFAULT_CATALOG_TABLE, InvalidIdentifier,
    SqliteCatalogRepository, is_plain_identifier,
};
pub use migration_records::SqliteMigrationRecordRepository;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

use crate::error::{RelayError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if missing) the local state store and apply its schema.
pub async fn open_state_store(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    // A single connection keeps SQLite writers from contending on the lock.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| {
            RelayError::Store(format!(
                "failed to open state store {}: {}",
                path.display(),
                e
            ))
        })?;

    crate::MIGRATOR.run(&pool).await?;
    info!(path = %path.display(), "state store ready");
    Ok(pool)
}

/// Open the media server's existing catalog database for read/write.
///
/// The catalog is never created here; a missing file is a startup error.
pub async fn open_catalog(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| {
            RelayError::Catalog(format!(
                "failed to open catalog {}: {}",
                path.display(),
                e
            ))
        })
}

pub(crate) fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| RelayError::NonUtf8Path(path.to_path_buf()))
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(value: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(value)
        .ok_or_else(|| RelayError::Store(format!("invalid timestamp {value}")))
}
