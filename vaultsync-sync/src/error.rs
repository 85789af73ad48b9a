//! Replication error taxonomy.
//!
//! The variants encode how the orchestrator reacts, not just what broke:
//! `Transient` retries next cycle, `TooLarge` and `Busy` skip without
//! losing the document, `MissingChunks` keeps the entry queued, and
//! `VersionMismatch` halts the session.

use thiserror::Error;
use vaultsync_chunks::ChunkError;
use vaultsync_crypto::CryptoError;
use vaultsync_store::StoreError;
use vaultsync_types::ChunkId;

/// Result type for replication operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A recoverable failure; the operation is retried on the next cycle.
    #[error("transient sync failure: {0}")]
    Transient(String),

    /// A file could not be encoded for replication. The file is skipped
    /// and reported, never silently dropped.
    #[error("cannot encode {path}: {reason}")]
    Encoding { path: String, reason: String },

    /// Decryption failed. Distinct from not-found: the caller should
    /// prompt for the passphrase, not skip the document.
    #[error(transparent)]
    Decrypt(#[from] CryptoError),

    /// The replicas speak different schema versions. Fatal for the
    /// session.
    #[error("schema version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: u32, remote: u32 },

    /// An entry exceeds the configured size cap. Skipped this cycle and
    /// re-evaluated on the next one.
    #[error("{path} is {size} bytes, over the {limit} byte cap")]
    TooLarge { path: String, size: u64, limit: u64 },

    /// An entry's chunk children have not arrived yet.
    #[error("waiting for {} chunk(s)", .0.len())]
    MissingChunks(Vec<ChunkId>),

    /// A non-blocking lock was already held. The operation is skipped,
    /// not failed.
    #[error("resource busy, skipped")]
    Busy,

    /// Document store failure.
    #[error(transparent)]
    Store(StoreError),

    /// Chunk layer failure.
    #[error(transparent)]
    Chunks(ChunkError),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed identifier or payload.
    #[error(transparent)]
    Types(#[from] vaultsync_types::Error),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VersionMismatch { local, remote } => {
                SyncError::VersionMismatch { local, remote }
            }
            other => SyncError::Store(other),
        }
    }
}

impl From<ChunkError> for SyncError {
    fn from(e: ChunkError) -> Self {
        match e {
            ChunkError::MissingChunks(ids) => SyncError::MissingChunks(ids),
            other => SyncError::Chunks(other),
        }
    }
}

impl SyncError {
    /// Whether the error ends the replication session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::VersionMismatch { .. })
    }
}
