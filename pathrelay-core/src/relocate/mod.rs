//! Moves settled staging files into the library tree.
//!
//! A migration claims the source path in the state store with a `staging`
//! row, records which catalog items carry the source path, rewrites exactly
//! those items, renames the file and finally promotes the row to `migrated`.
//! Failures after the catalog rewrite are compensated by pointing the same
//! items back at the source and releasing the claim; anything left half-done
//! by a crash is picked up by [`MigrationProcessor::recover_staged`].

pub mod paths;
pub mod recovery;

pub use paths::PathMapping;
pub use recovery::RecoveryReport;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::database::ports::{CatalogRepository, MigrationRecordRepository};
use crate::error::{RelayError, Result};
use crate::types::{
    CatalogItemId, DetectedFile, MigrationRecord, MigrationState, RecordId, StagedMigration,
    now_millis, truncate_millis,
};

/// Capability the watcher hands settled files to.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn process_file(&self, file: &DetectedFile) -> Result<MigrationOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated(MigrationRecord),
    /// A live record (finished or in flight) already holds the source path.
    AlreadyTracked,
    /// The source disappeared before it could be renamed.
    SourceVanished,
}

#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    pub staging_root: PathBuf,
    pub library_root: PathBuf,
    /// Zero disables purging of originals.
    pub retention: Duration,
}

pub struct MigrationProcessor {
    mapping: PathMapping,
    retention: Option<chrono::Duration>,
    records: Arc<dyn MigrationRecordRepository>,
    catalog: Arc<dyn CatalogRepository>,
}

impl fmt::Debug for MigrationProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationProcessor")
            .field("mapping", &self.mapping)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

/// A staged row this processor owns until it is finalized or released.
#[derive(Debug, Clone)]
struct Claim {
    id: RecordId,
    source_path: PathBuf,
    target_path: PathBuf,
    source_modified_at: Option<DateTime<Utc>>,
    catalog_items: Option<Vec<CatalogItemId>>,
    staged_at: DateTime<Utc>,
}

impl Claim {
    fn from_staged(id: RecordId, staged: StagedMigration) -> Self {
        Self {
            id,
            source_path: staged.source_path,
            target_path: staged.target_path,
            source_modified_at: staged.source_modified_at,
            catalog_items: None,
            staged_at: staged.staged_at,
        }
    }

    fn from_record(record: &MigrationRecord) -> Self {
        Self {
            id: record.id,
            source_path: record.source_path.clone(),
            target_path: record.target_path.clone(),
            source_modified_at: record.source_modified_at,
            catalog_items: record.catalog_items.clone(),
            staged_at: record.created_at,
        }
    }
}

impl MigrationProcessor {
    pub fn new(
        config: ProcessorConfig,
        records: Arc<dyn MigrationRecordRepository>,
        catalog: Arc<dyn CatalogRepository>,
    ) -> Result<Self> {
        let retention = if config.retention.is_zero() {
            None
        } else {
            Some(chrono::Duration::from_std(config.retention).map_err(|e| {
                RelayError::Internal(format!("retention out of range: {e}"))
            })?)
        };

        Ok(Self {
            mapping: PathMapping::new(&config.staging_root, &config.library_root),
            retention,
            records,
            catalog,
        })
    }

    pub fn mapping(&self) -> &PathMapping {
        &self.mapping
    }

    /// Move one staging file into the library and keep both stores in step.
    ///
    /// Safe to call repeatedly for the same path: once a live record exists
    /// every further call returns [`MigrationOutcome::AlreadyTracked`].
    pub async fn migrate(
        &self,
        source: &Path,
        observed_modified_at: Option<DateTime<Utc>>,
    ) -> Result<MigrationOutcome> {
        if self.records.find_active(source).await?.is_some() {
            debug!(path = %source.display(), "already tracked, skipping");
            return Ok(MigrationOutcome::AlreadyTracked);
        }

        let target = self.mapping.target_for(source)?;
        let staged = StagedMigration {
            source_path: source.to_path_buf(),
            target_path: target,
            source_modified_at: observed_modified_at.map(truncate_millis),
            staged_at: now_millis(),
        };
        let Some(id) = self.records.insert_staged(&staged).await? else {
            debug!(path = %source.display(), "claimed by a concurrent migration");
            return Ok(MigrationOutcome::AlreadyTracked);
        };
        let claim = Claim::from_staged(id, staged);

        match tokio::fs::try_exists(&claim.target_path).await {
            Ok(false) => {}
            Ok(true) => {
                self.release(&claim).await;
                return Err(RelayError::TargetExists(claim.target_path));
            }
            Err(err) => {
                self.release(&claim).await;
                return Err(err.into());
            }
        }

        let items = match self.catalog_items(&claim).await {
            Ok(items) => items,
            Err(err) => {
                self.release(&claim).await;
                return Err(err);
            }
        };
        if let Err(err) = self
            .catalog
            .rewrite_items(&items, &claim.source_path, &claim.target_path)
            .await
        {
            self.release(&claim).await;
            return Err(err);
        }

        match self.move_file(&claim).await {
            Ok(()) => {}
            Err(err) if err.is_source_missing() => {
                warn!(path = %claim.source_path.display(), "source vanished before move");
                self.compensate(&claim, &items).await;
                return Ok(MigrationOutcome::SourceVanished);
            }
            Err(err) => {
                self.compensate(&claim, &items).await;
                return Err(err);
            }
        }

        let record = self.finalize(&claim, &items).await?;
        info!(
            record_id = %record.id,
            path = %record.source_path.display(),
            target = %record.target_path.display(),
            delete_at = ?record.delete_at,
            "file migrated"
        );
        Ok(MigrationOutcome::Migrated(record))
    }

    /// Catalog items the claim rewrites. Captured and persisted on first use,
    /// before the catalog is touched.
    async fn catalog_items(&self, claim: &Claim) -> Result<Vec<CatalogItemId>> {
        if let Some(items) = &claim.catalog_items {
            return Ok(items.clone());
        }
        let items = self.catalog.item_ids(&claim.source_path).await?;
        self.records.set_catalog_items(claim.id, &items).await?;
        Ok(items)
    }

    async fn move_file(&self, claim: &Claim) -> Result<()> {
        if let Some(parent) = claim.target_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| RelayError::Move {
                    from: claim.source_path.clone(),
                    to: claim.target_path.clone(),
                    source: io::Error::new(
                        source.kind(),
                        format!("create {}: {}", parent.display(), source),
                    ),
                })?;
        }

        // Plain rename only: a cross-volume target fails rather than copying.
        tokio::fs::rename(&claim.source_path, &claim.target_path)
            .await
            .map_err(|source| RelayError::Move {
                from: claim.source_path.clone(),
                to: claim.target_path.clone(),
                source,
            })
    }

    async fn finalize(&self, claim: &Claim, items: &[CatalogItemId]) -> Result<MigrationRecord> {
        let migrated_at = now_millis();
        let delete_at = self.retention.map(|retention| migrated_at + retention);
        self.records
            .mark_migrated(claim.id, migrated_at, delete_at)
            .await?;

        Ok(MigrationRecord {
            id: claim.id,
            source_path: claim.source_path.clone(),
            target_path: claim.target_path.clone(),
            source_modified_at: claim.source_modified_at,
            migrated_at: Some(migrated_at),
            delete_at,
            state: MigrationState::Migrated,
            catalog_items: Some(items.to_vec()),
            created_at: claim.staged_at,
            updated_at: migrated_at,
        })
    }

    /// Point the claim's items back at the source, then release the claim.
    /// If the catalog cannot be reverted the claim stays staged for the
    /// recovery pass.
    async fn compensate(&self, claim: &Claim, items: &[CatalogItemId]) {
        match self
            .catalog
            .rewrite_items(items, &claim.target_path, &claim.source_path)
            .await
        {
            Ok(_) => self.release(claim).await,
            Err(err) => error!(
                error = %err,
                record_id = %claim.id,
                path = %claim.source_path.display(),
                "failed to revert catalog path; leaving record staged"
            ),
        }
    }

    async fn release(&self, claim: &Claim) {
        if let Err(err) = self.records.discard_staged(claim.id).await {
            error!(
                error = %err,
                record_id = %claim.id,
                path = %claim.source_path.display(),
                "failed to release staged record"
            );
        }
    }
}

#[async_trait]
impl FileProcessor for MigrationProcessor {
    async fn process_file(&self, file: &DetectedFile) -> Result<MigrationOutcome> {
        self.migrate(&file.path, file.modified_at).await
    }
}
