use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{CatalogItemId, MigrationRecord, MigrationState, RecordId, StagedMigration};

/// Durable store of migration records. The only source of truth for whether
/// a source path was already migrated and when its original may be purged.
#[async_trait]
pub trait MigrationRecordRepository: Send + Sync {
    /// Record for `source_path` that has not been purged, if any.
    async fn find_active(&self, source_path: &Path) -> Result<Option<MigrationRecord>>;

    async fn get(&self, id: RecordId) -> Result<Option<MigrationRecord>>;

    /// Claim `source_path` with a `staging` row. Returns `None` when another
    /// live record already holds the path.
    async fn insert_staged(&self, staged: &StagedMigration) -> Result<Option<RecordId>>;

    /// `staging -> migrated`. Fails if the row is not staged.
    async fn mark_migrated(
        &self,
        id: RecordId,
        migrated_at: DateTime<Utc>,
        delete_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Remember which catalog rows a staged migration is about to rewrite.
    /// Fails if the row is not staged.
    async fn set_catalog_items(&self, id: RecordId, items: &[CatalogItemId]) -> Result<()>;

    /// Drop a staged claim after its migration was compensated.
    async fn discard_staged(&self, id: RecordId) -> Result<()>;

    async fn list_staged(&self) -> Result<Vec<MigrationRecord>>;

    /// Migrated records whose `delete_at` is at or before `now`.
    async fn due_for_purge(&self, now: DateTime<Utc>) -> Result<Vec<MigrationRecord>>;

    /// `migrated -> purged`. Returns false if the record was not migrated.
    async fn mark_purged(&self, id: RecordId, at: DateTime<Utc>) -> Result<bool>;

    /// Newest first, optionally filtered by state.
    async fn list(
        &self,
        state: Option<MigrationState>,
        limit: u32,
    ) -> Result<Vec<MigrationRecord>>;
}
