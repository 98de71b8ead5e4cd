#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pathrelay_core::database::{
    CatalogSchema, SqliteCatalogRepository, SqliteMigrationRecordRepository, open_catalog,
    open_state_store,
};
use pathrelay_core::relocate::{MigrationProcessor, ProcessorConfig};
use pathrelay_core::{CatalogItemId, RelayError, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

/// Staging tree, library tree, state store and a minimal media catalog,
/// all inside one temp directory.
pub struct Harness {
    pub tmp: TempDir,
    pub stage: PathBuf,
    pub lib: PathBuf,
    pub state_pool: SqlitePool,
    pub catalog_pool: SqlitePool,
    pub records: Arc<SqliteMigrationRecordRepository>,
    pub catalog: Arc<SqliteCatalogRepository>,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let stage = tmp.path().join("stage");
        let lib = tmp.path().join("lib");
        std::fs::create_dir_all(&stage)?;
        std::fs::create_dir_all(&lib)?;

        let catalog_path = tmp.path().join("library.db");
        create_catalog(&catalog_path).await?;

        let state_pool = open_state_store(&tmp.path().join("state").join("pathrelay.db")).await?;
        let catalog_pool = open_catalog(&catalog_path).await?;

        Ok(Self {
            records: Arc::new(SqliteMigrationRecordRepository::new(state_pool.clone())),
            catalog: Arc::new(SqliteCatalogRepository::new(
                catalog_pool.clone(),
                CatalogSchema::default(),
            )),
            tmp,
            stage,
            lib,
            state_pool,
            catalog_pool,
        })
    }

    pub fn processor(&self, retention: Duration) -> Result<MigrationProcessor> {
        MigrationProcessor::new(
            ProcessorConfig {
                staging_root: self.stage.clone(),
                library_root: self.lib.clone(),
                retention,
            },
            self.records.clone(),
            self.catalog.clone(),
        )
    }

    /// Write a file under the staging root and register it in the catalog.
    pub async fn stage_file(&self, relative: &str) -> Result<PathBuf> {
        let path = self.stage.join(relative);
        write_file(&path, b"media")?;
        self.seed_item(&path).await?;
        Ok(path)
    }

    pub async fn seed_item(&self, path: &Path) -> Result<CatalogItemId> {
        let done = sqlx::query(r#"INSERT INTO "MediaItems" ("Name", "Path") VALUES (?, ?)"#)
            .bind(path.file_name().map(|n| n.to_string_lossy().to_string()))
            .bind(path.to_string_lossy().to_string())
            .execute(&self.catalog_pool)
            .await?;
        Ok(CatalogItemId(done.last_insert_rowid()))
    }

    /// Point one catalog item somewhere else, as a committed rewrite would.
    pub async fn set_item_path(&self, item: CatalogItemId, path: &Path) -> Result<()> {
        sqlx::query(r#"UPDATE "MediaItems" SET "Path" = ? WHERE "Id" = ?"#)
            .bind(path.to_string_lossy().to_string())
            .bind(item.as_i64())
            .execute(&self.catalog_pool)
            .await?;
        Ok(())
    }

    /// Turn `lib/<relative>` into a dangling symlink so creating the target
    /// directory fails with something other than NotFound.
    #[cfg(unix)]
    pub fn block_library_dir(&self, relative: &str) -> Result<PathBuf> {
        let link = self.lib.join(relative);
        std::os::unix::fs::symlink(self.tmp.path().join("nowhere"), &link)?;
        Ok(link)
    }

    pub async fn catalog_paths(&self) -> Result<Vec<String>> {
        let paths = sqlx::query_scalar::<_, String>(
            r#"SELECT "Path" FROM "MediaItems" ORDER BY "Id""#,
        )
        .fetch_all(&self.catalog_pool)
        .await?;
        Ok(paths)
    }

    pub async fn drop_catalog_table(&self) -> Result<()> {
        sqlx::query(r#"DROP TABLE "MediaItems""#)
            .execute(&self.catalog_pool)
            .await?;
        Ok(())
    }

    pub async fn record_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM migration_records")
            .fetch_one(&self.state_pool)
            .await?;
        Ok(count)
    }
}

pub fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

async fn create_catalog(path: &Path) -> Result<()> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| RelayError::Internal(format!("Failed to create test catalog: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE "MediaItems" (
            "Id" INTEGER PRIMARY KEY AUTOINCREMENT,
            "Name" TEXT,
            "Path" TEXT
        )
        "#,
    )
    .execute(&pool)
    .await?;
    pool.close().await;
    Ok(())
}
