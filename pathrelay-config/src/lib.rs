//! Configuration library for pathrelay.
//!
//! Loads the daemon's settings from a TOML (or JSON) file, a `.env` file and
//! `PATHRELAY_*` environment variables, then applies the guard rails the
//! engine relies on: distinct, non-nested staging and library roots, plain
//! catalog identifiers and a non-zero sweep interval.

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, error::ConfigLoadError};
pub use models::duration::parse_duration;
pub use models::{
    Config, ConfigMetadata, DatabaseConfig, LoggingConfig, PathsConfig, TimingsConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
