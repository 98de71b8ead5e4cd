use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use pathrelay_config::Config;
use pathrelay_core::database::{
    MigrationRecordRepository, SqliteCatalogRepository, SqliteMigrationRecordRepository,
    open_catalog, open_state_store,
};
use pathrelay_core::{
    CleanupScheduler, FsWatchConfig, MigrationProcessor, MigrationRecord, MigrationState,
    ProcessorConfig, RecoveryReport, StagingWatcher, SweepReport,
};
use sqlx::SqlitePool;
use tracing::{error, info};

/// Both stores plus the processor wired on top of them.
pub struct Engine {
    config: Config,
    state_pool: SqlitePool,
    catalog_pool: SqlitePool,
    records: Arc<SqliteMigrationRecordRepository>,
    processor: Arc<MigrationProcessor>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let state_pool = open_state_store(&config.database.path)
            .await
            .context("failed to open state store")?;
        let catalog_pool = open_catalog(&config.paths.catalog_db)
            .await
            .context("failed to open media catalog")?;

        let records = Arc::new(SqliteMigrationRecordRepository::new(state_pool.clone()));
        let catalog = Arc::new(SqliteCatalogRepository::new(
            catalog_pool.clone(),
            config.catalog.clone(),
        ));
        let processor = MigrationProcessor::new(
            ProcessorConfig {
                staging_root: config.paths.source_dir.clone(),
                library_root: config.paths.target_dir.clone(),
                retention: config.timings.retention,
            },
            records.clone(),
            catalog,
        )
        .context("failed to build migration processor")?;

        Ok(Self {
            config,
            state_pool,
            catalog_pool,
            records,
            processor: Arc::new(processor),
        })
    }

    pub async fn recover(&self) -> anyhow::Result<RecoveryReport> {
        self.processor
            .recover_staged()
            .await
            .context("staged migration recovery failed")
    }

    pub async fn sweep(&self) -> anyhow::Result<SweepReport> {
        let scheduler = CleanupScheduler::new(
            self.records.clone(),
            self.config.timings.cleanup_interval,
        );
        scheduler
            .sweep(Utc::now())
            .await
            .context("cleanup sweep failed")
    }

    pub async fn records(
        &self,
        state: Option<MigrationState>,
        limit: u32,
    ) -> anyhow::Result<Vec<MigrationRecord>> {
        self.records
            .list(state, limit)
            .await
            .context("failed to list migration records")
    }

    /// Recover, watch and sweep until a shutdown signal arrives.
    pub async fn run(&self) -> anyhow::Result<()> {
        let report = self.recover().await?;
        if report.failed > 0 {
            error!(
                failed = report.failed,
                "some staged migrations could not be recovered; they will be retried next start"
            );
        }

        let watcher = StagingWatcher::new(
            &self.config.paths.source_dir,
            FsWatchConfig {
                settle_window: self.config.timings.settle_window,
                ..Default::default()
            },
            self.processor.clone(),
        );
        watcher
            .start()
            .await
            .context("failed to watch staging directory")?;

        let scheduler = Arc::new(CleanupScheduler::new(
            self.records.clone(),
            self.config.timings.cleanup_interval,
        ));
        if let Err(err) = scheduler.start().await {
            watcher.close().await;
            return Err(err).context("failed to start cleanup scheduler");
        }

        info!(
            source = %self.config.paths.source_dir.display(),
            target = %self.config.paths.target_dir.display(),
            settle_window = ?self.config.timings.settle_window,
            retention = ?self.config.timings.retention,
            "pathrelay running"
        );

        shutdown_signal().await;
        info!("shutdown requested, draining in-flight work");

        watcher.close().await;
        scheduler.stop().await;
        Ok(())
    }

    pub async fn close(self) {
        self.state_pool.close().await;
        self.catalog_pool.close().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use pathrelay_config::{
        ConfigMetadata, DatabaseConfig, LoggingConfig, PathsConfig, TimingsConfig,
    };
    use pathrelay_core::database::CatalogSchema;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    use super::*;

    async fn create_catalog(path: &Path, item_path: &Path) -> anyhow::Result<()> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().filename(path).create_if_missing(true))
            .await?;
        sqlx::query(r#"CREATE TABLE "MediaItems" ("Id" INTEGER PRIMARY KEY, "Path" TEXT)"#)
            .execute(&pool)
            .await?;
        sqlx::query(r#"INSERT INTO "MediaItems" ("Path") VALUES (?)"#)
            .bind(item_path.to_string_lossy().to_string())
            .execute(&pool)
            .await?;
        pool.close().await;
        Ok(())
    }

    fn config(root: &Path, retention: Duration) -> Config {
        Config {
            paths: PathsConfig {
                source_dir: root.join("stage"),
                target_dir: root.join("lib"),
                catalog_db: root.join("library.db"),
            },
            catalog: CatalogSchema::default(),
            timings: TimingsConfig {
                settle_window: Duration::ZERO,
                retention,
                cleanup_interval: Duration::from_secs(3600),
            },
            database: DatabaseConfig {
                path: root.join("data").join("pathrelay.db"),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
            },
            metadata: ConfigMetadata::default(),
        }
    }

    #[tokio::test]
    async fn missing_catalog_fails_to_open() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let err = Engine::open(config(tmp.path(), Duration::ZERO))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("media catalog"), "got {err:#}");
        Ok(())
    }

    #[tokio::test]
    async fn one_shot_commands_share_the_stores() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let cfg = config(tmp.path(), Duration::from_millis(1));
        let source = cfg.paths.source_dir.join("movie.mkv");
        std::fs::create_dir_all(&cfg.paths.source_dir)?;
        std::fs::write(&source, b"media")?;
        create_catalog(&cfg.paths.catalog_db, &source).await?;

        let engine = Engine::open(cfg).await?;
        assert!(engine.recover().await?.is_empty());

        engine.processor.migrate(&source, None).await?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = engine.sweep().await?;
        assert_eq!(report.already_absent, 1);

        let purged = engine.records(Some(MigrationState::Purged), 10).await?;
        assert_eq!(purged.len(), 1);
        assert!(engine.records(Some(MigrationState::Migrated), 10).await?.is_empty());

        engine.close().await;
        Ok(())
    }
}
