//! Error types for blescan-store.

use std::path::PathBuf;

/// Result type for blescan-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in blescan-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to create a storage directory.
    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to open or write a shard or daily file.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// CSV encoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error comes from missing write permission on the medium.
    pub fn is_permission_denied(&self) -> bool {
        let io = match self {
            Error::CreateDirectory { source, .. } | Error::Write { source, .. } => Some(source),
            Error::Io(e) => Some(e),
            Error::Csv(_) => None,
        };
        io.is_some_and(|e| e.kind() == std::io::ErrorKind::PermissionDenied)
    }
}
