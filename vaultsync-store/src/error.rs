//! Error types for the document store layer.

use thiserror::Error;
use vaultsync_types::DocId;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Document (or requested revision) does not exist.
    #[error("not found: {0}")]
    NotFound(DocId),

    /// The remote store speaks an incompatible schema version. Fatal for
    /// the replication session; continuing risks data corruption.
    #[error("schema version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: u32, remote: u32 },

    /// A path that cannot be normalized to a valid vault path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The remote rejected a document for size.
    #[error("payload too large for {0}")]
    PayloadTooLarge(DocId),

    /// Backend failure (SQLite, filesystem).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Remote transport failure. Transient; retried next cycle.
    #[error("remote transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Unexpected remote response.
    #[error("remote protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shared type error.
    #[error(transparent)]
    Types(#[from] vaultsync_types::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}
