//! Periodic purge of staging originals whose retention has elapsed.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::ports::MigrationRecordRepository;
use crate::error::{RelayError, Result};
use crate::types::{MigrationRecord, now_millis};

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Tally of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Originals deleted by this sweep.
    pub purged: usize,
    /// Records purged whose original was already gone.
    pub already_absent: usize,
    /// Records left `migrated` for the next sweep.
    pub failed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.purged + self.already_absent + self.failed
    }
}

enum PurgeOutcome {
    Deleted,
    AlreadyAbsent,
}

pub struct CleanupScheduler {
    records: Arc<dyn MigrationRecordRepository>,
    interval: Duration,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("interval", &self.interval)
            .field("stopped", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl CleanupScheduler {
    pub fn new(records: Arc<dyn MigrationRecordRepository>, interval: Duration) -> Self {
        Self {
            records,
            interval,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Delete every original due at or before `now` and mark its record purged.
    ///
    /// A missing original counts as deleted. Any other failure leaves the
    /// record `migrated` so the next sweep retries it.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let due = self.records.due_for_purge(now).await?;
        let mut report = SweepReport::default();

        for record in due {
            match self.purge(&record).await {
                Ok(PurgeOutcome::Deleted) => report.purged += 1,
                Ok(PurgeOutcome::AlreadyAbsent) => report.already_absent += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(
                        error = %err,
                        record_id = %record.id,
                        path = %record.source_path.display(),
                        "failed to purge original"
                    );
                }
            }
        }

        if report.total() > 0 {
            info!(
                purged = report.purged,
                already_absent = report.already_absent,
                failed = report.failed,
                "cleanup sweep finished"
            );
        }
        Ok(report)
    }

    async fn purge(&self, record: &MigrationRecord) -> Result<PurgeOutcome> {
        let outcome = match tokio::fs::remove_file(&record.source_path).await {
            Ok(()) => PurgeOutcome::Deleted,
            Err(err) if err.kind() == io::ErrorKind::NotFound => PurgeOutcome::AlreadyAbsent,
            Err(source) => {
                return Err(RelayError::Delete {
                    path: record.source_path.clone(),
                    source,
                });
            }
        };

        if !self.records.mark_purged(record.id, now_millis()).await? {
            warn!(record_id = %record.id, "record changed state before it could be purged");
        }
        debug!(record_id = %record.id, path = %record.source_path.display(), "original purged");
        Ok(outcome)
    }

    /// Spawn the periodic sweep. The first sweep runs one interval from now.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.interval.is_zero() {
            return Err(RelayError::Internal(
                "cleanup interval must be greater than zero".to_string(),
            ));
        }

        let mut task = self.task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        let scheduler = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            info!(
                "cleanup scheduler started with interval of {}s",
                scheduler.interval.as_secs()
            );

            let mut ticker = interval_at(Instant::now() + scheduler.interval, scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = scheduler.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(err) = scheduler.sweep(Utc::now()).await {
                    error!(error = %err, "cleanup sweep failed");
                }
            }
            info!("cleanup scheduler stopped");
        }));
        Ok(())
    }

    /// Stop ticking and wait for a sweep in progress. Safe to call twice.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            error!(error = %err, "cleanup task terminated abnormally");
        }
    }
}
