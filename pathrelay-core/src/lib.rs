//! # Pathrelay Core
//!
//! Migration engine that moves finished files out of a staging tree into a
//! media library while keeping the media server's catalog pointing at them.
//!
//! ## Overview
//!
//! - **Watcher** ([`fs_watch`]): observes the staging tree and hands each
//!   settled write to a [`relocate::FileProcessor`]
//! - **Processor** ([`relocate`]): rewrites the catalog path, renames the
//!   file and records the migration in the state store
//! - **Cleanup** ([`cleanup`]): purges staging originals once their
//!   retention window has elapsed
//! - **Stores** ([`database`]): repository ports with SQLite adapters for
//!   the local state store and the media server catalog
//!
//! Migrations pass through a persisted `staging` state before either store
//! is touched, so [`relocate::MigrationProcessor::recover_staged`] can finish
//! or undo work interrupted by a crash.

/// Periodic purge of migrated originals
pub mod cleanup;

/// State store and catalog store ports and their SQLite adapters
pub mod database;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Error types and error handling utilities
pub mod error;

/// Debounced staging tree watcher
pub mod fs_watch;

/// Migration processor, path mapping and startup recovery
pub mod relocate;

pub mod types;

pub use cleanup::{CleanupScheduler, SweepReport};
pub use error::{RelayError, Result};
pub use fs_watch::{FsWatchConfig, StagingWatcher};
pub use relocate::{
    FileProcessor, MigrationOutcome, MigrationProcessor, PathMapping, ProcessorConfig,
    RecoveryReport,
};
pub use types::{CatalogItemId, DetectedFile, MigrationRecord, MigrationState, RecordId};
