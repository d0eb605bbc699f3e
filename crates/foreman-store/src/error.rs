//! Error types for metadata storage.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the metadata store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The id is already reserved (metadata file exists).
    #[error("session id '{0}' already reserved")]
    AlreadyReserved(String),

    /// The id fails `[A-Za-z0-9_-]+` validation.
    #[error("invalid session id '{0}'")]
    InvalidId(String),

    /// No metadata file exists for the id.
    #[error("no metadata for session '{0}'")]
    NotFound(String),

    /// Filesystem failure.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
