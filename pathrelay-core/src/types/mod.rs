pub mod ids;
pub mod record;

pub use ids::{CatalogItemId, RecordId};
pub use record::{
    DetectedFile, MigrationRecord, MigrationState, StagedMigration, now_millis, truncate_millis,
};
