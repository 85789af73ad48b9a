//! Content-addressed chunking and reassembly.
//!
//! File payloads are split into immutable chunks at deterministic,
//! content-defined boundaries: identical input always produces identical
//! boundaries, so unchanged regions across revisions map to identical
//! chunk IDs. That determinism is what makes cross-file deduplication and
//! incremental replication effective.
//!
//! Chunks are addressed by the SHA-256 of their *stored* bytes. When the
//! engine encrypts, the (convergently encrypted) ciphertext is what gets
//! hashed, deduplicated, and replicated; plaintext never leaves the
//! encryption layer.

mod chunker;
mod repo;
mod store;

pub use chunker::{Chunker, DEFAULT_MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use repo::{ChunkRepository, MemoryChunkRepository};
pub use store::{chunk_id, identity, ChunkStore};

use thiserror::Error;
use vaultsync_types::ChunkId;

/// Result type for chunk operations.
pub type ChunkResult<T> = Result<T, ChunkError>;

/// Errors that can occur in chunk operations.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Reassembly found chunks absent from the repository. The list is
    /// exact: it drives the replication orchestrator's wait set.
    #[error("missing {} chunk(s)", .0.len())]
    MissingChunks(Vec<ChunkId>),

    /// Underlying repository failure.
    #[error("chunk repository error: {0}")]
    Repository(String),

    /// The stored-form transform (encryption or decryption) failed.
    #[error("chunk transform failed: {0}")]
    Transform(String),

    /// A fetched chunk's bytes no longer match its ID.
    #[error("chunk {0} failed integrity check")]
    Corrupt(ChunkId),
}
