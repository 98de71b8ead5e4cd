use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::CatalogItemId;

/// The media server's own item store. Only the per-item path is touched.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Items whose path is exactly `path`, in rowid order.
    async fn item_ids(&self, path: &Path) -> Result<Vec<CatalogItemId>>;

    /// Point each of `items` that still carries `from` at `to`, inside a
    /// single transaction. Rows outside `items` are never touched, even
    /// when they carry `from`. Returns the number of rows rewritten.
    async fn rewrite_items(&self, items: &[CatalogItemId], from: &Path, to: &Path)
    -> Result<u64>;

    /// Number of items currently carrying exactly `path`.
    async fn count_path(&self, path: &Path) -> Result<u64>;
}
