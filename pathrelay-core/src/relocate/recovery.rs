use tracing::{error, info, warn};

use super::{Claim, MigrationProcessor};
use crate::error::Result;
use crate::types::MigrationRecord;

/// Tally of one pass over `staging` rows left behind by an interrupted run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Source was still in staging; the move was completed.
    pub resumed: usize,
    /// The rename had already happened; only the record was finalized.
    pub finalized: usize,
    /// Neither completion was possible; catalog reverted and claim released.
    pub abandoned: usize,
    pub failed: usize,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.resumed + self.finalized + self.abandoned + self.failed == 0
    }
}

enum RecoveryAction {
    Resumed,
    Finalized,
    Abandoned,
}

impl MigrationProcessor {
    /// Complete or compensate every migration that never left `staging`.
    ///
    /// Meant to run once at startup, before the watcher delivers anything.
    pub async fn recover_staged(&self) -> Result<RecoveryReport> {
        let staged = self.records.list_staged().await?;
        let mut report = RecoveryReport::default();

        for record in staged {
            match self.recover_one(&record).await {
                Ok(RecoveryAction::Resumed) => report.resumed += 1,
                Ok(RecoveryAction::Finalized) => report.finalized += 1,
                Ok(RecoveryAction::Abandoned) => report.abandoned += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(
                        error = %err,
                        record_id = %record.id,
                        path = %record.source_path.display(),
                        "failed to recover staged migration"
                    );
                }
            }
        }

        if !report.is_empty() {
            info!(
                resumed = report.resumed,
                finalized = report.finalized,
                abandoned = report.abandoned,
                failed = report.failed,
                "staged migration recovery finished"
            );
        }
        Ok(report)
    }

    async fn recover_one(&self, record: &MigrationRecord) -> Result<RecoveryAction> {
        let claim = Claim::from_record(record);
        let source_present = tokio::fs::try_exists(&claim.source_path).await?;
        let target_present = tokio::fs::try_exists(&claim.target_path).await?;

        match (source_present, target_present) {
            (true, false) => {
                let items = self.catalog_items(&claim).await?;
                // Items already pointing at the target are skipped.
                self.catalog
                    .rewrite_items(&items, &claim.source_path, &claim.target_path)
                    .await?;
                if let Err(err) = self.move_file(&claim).await {
                    self.compensate(&claim, &items).await;
                    return Err(err);
                }
                self.finalize(&claim, &items).await?;
                info!(record_id = %claim.id, path = %claim.source_path.display(), "resumed staged migration");
                Ok(RecoveryAction::Resumed)
            }
            (false, true) => {
                let items = self.catalog_items(&claim).await?;
                self.catalog
                    .rewrite_items(&items, &claim.source_path, &claim.target_path)
                    .await?;
                self.finalize(&claim, &items).await?;
                info!(record_id = %claim.id, target = %claim.target_path.display(), "finalized staged migration");
                Ok(RecoveryAction::Finalized)
            }
            (true, true) => {
                warn!(
                    record_id = %claim.id,
                    path = %claim.source_path.display(),
                    target = %claim.target_path.display(),
                    "library already holds a file at the target; abandoning staged migration"
                );
                self.abandon(&claim).await;
                Ok(RecoveryAction::Abandoned)
            }
            (false, false) => {
                warn!(
                    record_id = %claim.id,
                    path = %claim.source_path.display(),
                    "staged file is gone from both trees; abandoning"
                );
                self.abandon(&claim).await;
                Ok(RecoveryAction::Abandoned)
            }
        }
    }

    /// Revert whatever this claim rewrote. Without captured items the
    /// catalog was never touched.
    async fn abandon(&self, claim: &Claim) {
        match &claim.catalog_items {
            Some(items) => self.compensate(claim, items).await,
            None => self.release(claim).await,
        }
    }
}
