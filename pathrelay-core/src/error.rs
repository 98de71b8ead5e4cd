use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    /// The staging tree could not be registered for change notification.
    #[error("watch setup failed for {path}: {message}")]
    Setup { path: PathBuf, message: String },

    /// The source path does not live under the staging root.
    #[error("path {path} is not under staging root {root}")]
    Path { path: PathBuf, root: PathBuf },

    #[error("path {0} is not valid UTF-8")]
    NonUtf8Path(PathBuf),

    #[error("catalog update failed: {0}")]
    Catalog(String),

    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("refusing to overwrite existing library file {0}")]
    TargetExists(PathBuf),

    #[error("failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// True when the failure only says the file is already gone.
    pub fn is_source_missing(&self) -> bool {
        match self {
            RelayError::Move { source, .. } | RelayError::Delete { source, .. } => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        RelayError::Store(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for RelayError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        RelayError::Store(format!("migration failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_source_is_recognised_for_moves_and_deletes() {
        let moved = RelayError::Move {
            from: PathBuf::from("/stage/a.mkv"),
            to: PathBuf::from("/lib/a.mkv"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let deleted = RelayError::Delete {
            path: PathBuf::from("/stage/a.mkv"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let denied = RelayError::Delete {
            path: PathBuf::from("/stage/a.mkv"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };

        assert!(moved.is_source_missing());
        assert!(deleted.is_source_missing());
        assert!(!denied.is_source_missing());
        assert!(!RelayError::Catalog("locked".into()).is_source_missing());
    }
}
