use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use super::{from_millis, path_str, to_millis};
use crate::database::ports::MigrationRecordRepository;
use crate::error::{RelayError, Result};
use crate::types::{CatalogItemId, MigrationRecord, MigrationState, RecordId, StagedMigration};

const RECORD_COLUMNS: &str = "id, source_path, target_path, source_modified_at, \
     migrated_at, delete_at, state, catalog_items, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct SqliteMigrationRecordRepository {
    pool: SqlitePool,
}

impl SqliteMigrationRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct MigrationRecordRow {
    id: i64,
    source_path: String,
    target_path: String,
    source_modified_at: Option<i64>,
    migrated_at: Option<i64>,
    delete_at: Option<i64>,
    state: String,
    catalog_items: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<MigrationRecordRow> for MigrationRecord {
    type Error = RelayError;

    fn try_from(row: MigrationRecordRow) -> Result<Self> {
        Ok(MigrationRecord {
            id: RecordId(row.id),
            source_path: PathBuf::from(row.source_path),
            target_path: PathBuf::from(row.target_path),
            source_modified_at: row.source_modified_at.map(from_millis).transpose()?,
            migrated_at: row.migrated_at.map(from_millis).transpose()?,
            delete_at: row.delete_at.map(from_millis).transpose()?,
            state: row.state.parse()?,
            catalog_items: row.catalog_items.as_deref().map(decode_items).transpose()?,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

fn encode_items(items: &[CatalogItemId]) -> Result<String> {
    let raw: Vec<i64> = items.iter().map(CatalogItemId::as_i64).collect();
    serde_json::to_string(&raw)
        .map_err(|e| RelayError::Store(format!("Failed to encode catalog items: {}", e)))
}

fn decode_items(raw: &str) -> Result<Vec<CatalogItemId>> {
    let ids: Vec<i64> = serde_json::from_str(raw)
        .map_err(|e| RelayError::Store(format!("invalid catalog items '{raw}': {e}")))?;
    Ok(ids.into_iter().map(CatalogItemId).collect())
}

fn into_records(rows: Vec<MigrationRecordRow>) -> Result<Vec<MigrationRecord>> {
    rows.into_iter().map(MigrationRecord::try_from).collect()
}

#[async_trait]
impl MigrationRecordRepository for SqliteMigrationRecordRepository {
    async fn find_active(&self, source_path: &Path) -> Result<Option<MigrationRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM migration_records \
             WHERE source_path = ? AND state <> 'purged' LIMIT 1"
        );
        let row = sqlx::query_as::<_, MigrationRecordRow>(&sql)
            .bind(path_str(source_path)?)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| {
                RelayError::Store(format!("Failed to look up migration record: {}", e))
            })?;

        row.map(MigrationRecord::try_from).transpose()
    }

    async fn get(&self, id: RecordId) -> Result<Option<MigrationRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM migration_records WHERE id = ?");
        let row = sqlx::query_as::<_, MigrationRecordRow>(&sql)
            .bind(id.as_i64())
            .fetch_optional(self.pool())
            .await?;

        row.map(MigrationRecord::try_from).transpose()
    }

    async fn insert_staged(&self, staged: &StagedMigration) -> Result<Option<RecordId>> {
        let staged_at = to_millis(staged.staged_at);
        let result = sqlx::query(
            r#"
            INSERT INTO migration_records (
                source_path, target_path, source_modified_at, migrated_at,
                delete_at, state, created_at, updated_at
            )
            VALUES (?, ?, ?, NULL, NULL, 'staging', ?, ?)
            "#,
        )
        .bind(path_str(&staged.source_path)?)
        .bind(path_str(&staged.target_path)?)
        .bind(staged.source_modified_at.map(to_millis))
        .bind(staged_at)
        .bind(staged_at)
        .execute(self.pool())
        .await;

        match result {
            Ok(done) => Ok(Some(RecordId(done.last_insert_rowid()))),
            Err(e) => {
                if let Some(db_err) = e.as_database_error()
                    && db_err.is_unique_violation()
                {
                    return Ok(None);
                }
                Err(RelayError::Store(format!(
                    "Failed to stage migration record: {}",
                    e
                )))
            }
        }
    }

    async fn mark_migrated(
        &self,
        id: RecordId,
        migrated_at: DateTime<Utc>,
        delete_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE migration_records
            SET state = 'migrated', migrated_at = ?, delete_at = ?, updated_at = ?
            WHERE id = ? AND state = 'staging'
            "#,
        )
        .bind(to_millis(migrated_at))
        .bind(delete_at.map(to_millis))
        .bind(to_millis(migrated_at))
        .bind(id.as_i64())
        .execute(self.pool())
        .await
        .map_err(|e| {
            RelayError::Store(format!("Failed to finalize migration record: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(RelayError::Store(format!(
                "migration record {id} is not staged"
            )));
        }
        Ok(())
    }

    async fn set_catalog_items(&self, id: RecordId, items: &[CatalogItemId]) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE migration_records
            SET catalog_items = ?
            WHERE id = ? AND state = 'staging'
            "#,
        )
        .bind(encode_items(items)?)
        .bind(id.as_i64())
        .execute(self.pool())
        .await
        .map_err(|e| RelayError::Store(format!("Failed to store catalog items: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(RelayError::Store(format!(
                "migration record {id} is not staged"
            )));
        }
        Ok(())
    }

    async fn discard_staged(&self, id: RecordId) -> Result<()> {
        sqlx::query("DELETE FROM migration_records WHERE id = ? AND state = 'staging'")
            .bind(id.as_i64())
            .execute(self.pool())
            .await
            .map_err(|e| {
                RelayError::Store(format!("Failed to discard staged record: {}", e))
            })?;
        Ok(())
    }

    async fn list_staged(&self) -> Result<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM migration_records \
             WHERE state = 'staging' ORDER BY id ASC"
        );
        let rows = sqlx::query_as::<_, MigrationRecordRow>(&sql)
            .fetch_all(self.pool())
            .await?;
        into_records(rows)
    }

    async fn due_for_purge(&self, now: DateTime<Utc>) -> Result<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM migration_records \
             WHERE state = 'migrated' AND delete_at IS NOT NULL AND delete_at <= ? \
             ORDER BY delete_at ASC"
        );
        let rows = sqlx::query_as::<_, MigrationRecordRow>(&sql)
            .bind(to_millis(now))
            .fetch_all(self.pool())
            .await
            .map_err(|e| {
                RelayError::Store(format!("Failed to query records due for purge: {}", e))
            })?;
        into_records(rows)
    }

    async fn mark_purged(&self, id: RecordId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE migration_records
            SET state = 'purged', updated_at = ?
            WHERE id = ? AND state = 'migrated'
            "#,
        )
        .bind(to_millis(at))
        .bind(id.as_i64())
        .execute(self.pool())
        .await
        .map_err(|e| RelayError::Store(format!("Failed to mark record purged: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(
        &self,
        state: Option<MigrationState>,
        limit: u32,
    ) -> Result<Vec<MigrationRecord>> {
        let rows = match state {
            Some(state) => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM migration_records \
                     WHERE state = ? ORDER BY id DESC LIMIT ?"
                );
                sqlx::query_as::<_, MigrationRecordRow>(&sql)
                    .bind(state.as_str())
                    .bind(i64::from(limit))
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM migration_records \
                     ORDER BY id DESC LIMIT ?"
                );
                sqlx::query_as::<_, MigrationRecordRow>(&sql)
                    .bind(i64::from(limit))
                    .fetch_all(self.pool())
                    .await?
            }
        };
        into_records(rows)
    }
}
