pub mod catalog;
pub mod migration_records;

pub use catalog::CatalogRepository;
pub use migration_records::MigrationRecordRepository;
