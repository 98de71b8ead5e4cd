use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use super::path_str;
use crate::database::ports::CatalogRepository;
use crate::error::{RelayError, Result};
use crate::types::CatalogItemId;

pub const DEFAULT_CATALOG_TABLE: &str = "MediaItems";
pub const DEFAULT_CATALOG_PATH_COLUMN: &str = "Path";

/// Where the media server keeps per-item file paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogSchema {
    table: String,
    path_column: String,
}

impl Default for CatalogSchema {
    fn default() -> Self {
        Self {
            table: DEFAULT_CATALOG_TABLE.to_string(),
            path_column: DEFAULT_CATALOG_PATH_COLUMN.to_string(),
        }
    }
}

/// A catalog table or column name that cannot be spliced into SQL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("catalog {field} '{value}' is not a plain SQL identifier")]
pub struct InvalidIdentifier {
    pub field: &'static str,
    pub value: String,
}

impl CatalogSchema {
    /// Identifiers are spliced into SQL, so only plain names are accepted.
    pub fn new(
        table: impl Into<String>,
        path_column: impl Into<String>,
    ) -> std::result::Result<Self, InvalidIdentifier> {
        let table = table.into();
        let path_column = path_column.into();
        for (field, value) in [("table", &table), ("path_column", &path_column)] {
            if !is_plain_identifier(value) {
                return Err(InvalidIdentifier {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(Self { table, path_column })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn path_column(&self) -> &str {
        &self.path_column
    }
}

pub fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone, Debug)]
pub struct SqliteCatalogRepository {
    pool: SqlitePool,
    schema: CatalogSchema,
}

impl SqliteCatalogRepository {
    pub fn new(pool: SqlitePool, schema: CatalogSchema) -> Self {
        Self { pool, schema }
    }

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn item_ids(&self, path: &Path) -> Result<Vec<CatalogItemId>> {
        let sql = format!(
            r#"SELECT rowid FROM "{table}" WHERE "{column}" = ? ORDER BY rowid"#,
            table = self.schema.table(),
            column = self.schema.path_column(),
        );
        let ids: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(path_str(path)?)
            .fetch_all(self.pool())
            .await
            .map_err(|e| RelayError::Catalog(format!("Failed to look up catalog items: {}", e)))?;
        Ok(ids.into_iter().map(CatalogItemId).collect())
    }

    async fn rewrite_items(
        &self,
        items: &[CatalogItemId],
        from: &Path,
        to: &Path,
    ) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }
        let from_str = path_str(from)?;
        let to_str = path_str(to)?;
        let placeholders = vec!["?"; items.len()].join(", ");
        let sql = format!(
            r#"UPDATE "{table}" SET "{column}" = ? WHERE "{column}" = ? AND rowid IN ({placeholders})"#,
            table = self.schema.table(),
            column = self.schema.path_column(),
        );

        let mut tx = self.pool().begin().await.map_err(|e| {
            RelayError::Catalog(format!("Failed to start transaction: {}", e))
        })?;

        let mut query = sqlx::query(&sql).bind(to_str).bind(from_str);
        for item in items {
            query = query.bind(item.as_i64());
        }

        let updated = match query.execute(&mut *tx).await {
            Ok(done) => done.rows_affected(),
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    debug!(error = %rollback_err, "catalog rollback failed");
                }
                return Err(RelayError::Catalog(format!(
                    "Failed to rewrite catalog path: {}",
                    e
                )));
            }
        };

        tx.commit().await.map_err(|e| {
            RelayError::Catalog(format!("Failed to commit transaction: {}", e))
        })?;

        debug!(from = %from.display(), to = %to.display(), rows = updated, "catalog paths rewritten");
        Ok(updated)
    }

    async fn count_path(&self, path: &Path) -> Result<u64> {
        let sql = format!(
            r#"SELECT COUNT(*) FROM "{table}" WHERE "{column}" = ?"#,
            table = self.schema.table(),
            column = self.schema.path_column(),
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(path_str(path)?)
            .fetch_one(self.pool())
            .await
            .map_err(|e| RelayError::Catalog(format!("Failed to count catalog rows: {}", e)))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    use super::*;

    async fn catalog_with(paths: &[&str]) -> Result<(tempfile::TempDir, SqliteCatalogRepository)> {
        let tmp = tempfile::tempdir()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(tmp.path().join("library.db"))
                    .create_if_missing(true),
            )
            .await?;
        sqlx::query(r#"CREATE TABLE "MediaItems" ("Id" INTEGER PRIMARY KEY, "Path" TEXT)"#)
            .execute(&pool)
            .await?;
        for path in paths {
            sqlx::query(r#"INSERT INTO "MediaItems" ("Path") VALUES (?)"#)
                .bind(*path)
                .execute(&pool)
                .await?;
        }
        Ok((tmp, SqliteCatalogRepository::new(pool, CatalogSchema::default())))
    }

    #[tokio::test]
    async fn rewrite_only_moves_the_listed_items() -> Result<()> {
        let (_tmp, repo) = catalog_with(&["/stage/a.mkv", "/stage/a.mkv", "/lib/a.mkv"]).await?;
        let stage = Path::new("/stage/a.mkv");
        let lib = Path::new("/lib/a.mkv");

        let items = repo.item_ids(stage).await?;
        assert_eq!(items, vec![CatalogItemId(1), CatalogItemId(2)]);

        assert_eq!(repo.rewrite_items(&items[..1], stage, lib).await?, 1);
        assert_eq!(repo.count_path(lib).await?, 2);

        // reverting the first item leaves the library's own row alone
        assert_eq!(repo.rewrite_items(&items[..1], lib, stage).await?, 1);
        assert_eq!(repo.count_path(stage).await?, 2);
        assert_eq!(repo.item_ids(lib).await?, vec![CatalogItemId(3)]);

        // items that moved on are not pulled back
        assert_eq!(repo.rewrite_items(&[CatalogItemId(3)], stage, lib).await?, 0);
        assert_eq!(repo.rewrite_items(&[], stage, lib).await?, 0);
        Ok(())
    }

    #[test]
    fn identifiers_must_be_plain_names() {
        assert!(CatalogSchema::new("MediaItems", "Path").is_ok());
        assert!(CatalogSchema::new("_items2", "file_path").is_ok());
        assert!(CatalogSchema::new("Media Items", "Path").is_err());
        assert!(CatalogSchema::new("MediaItems", "Path\"; DROP").is_err());
        assert!(CatalogSchema::new("1items", "Path").is_err());
        assert!(CatalogSchema::new("", "Path").is_err());

        let err = CatalogSchema::new("MediaItems", "Path\"; DROP").unwrap_err();
        assert_eq!(err.field, "path_column");
        assert_eq!(err.value, "Path\"; DROP");
    }

    #[test]
    fn default_schema_targets_media_items() {
        let schema = CatalogSchema::default();
        assert_eq!(schema.table(), "MediaItems");
        assert_eq!(schema.path_column(), "Path");
    }
}
