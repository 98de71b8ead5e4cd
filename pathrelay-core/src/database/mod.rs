//! Store ports and their SQLite adapters.
//!
//! `ports` holds the narrow traits the engine consumes; `infrastructure`
//! holds the sqlx-backed implementations for the local state store and the
//! media server catalog.

pub mod infrastructure;
pub mod ports;

pub use infrastructure::sqlite::{
    CatalogSchema, InvalidIdentifier, SqliteCatalogRepository, SqliteMigrationRecordRepository,
    is_plain_identifier, open_catalog, open_state_store,
};
pub use ports::{CatalogRepository, MigrationRecordRepository};
