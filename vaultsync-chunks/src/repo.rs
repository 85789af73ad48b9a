//! Chunk repository abstraction.
//!
//! The chunk layer does not care where chunk bytes live; the replication
//! crate backs this trait with the document store, and tests use the
//! in-memory implementation.

use crate::{ChunkError, ChunkResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use vaultsync_types::ChunkId;

/// Storage backend for immutable, content-addressed chunks.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Stores a chunk under its ID. Writing the same ID twice is a no-op
    /// (chunks are immutable and content-addressed).
    async fn put_chunk(&self, id: &ChunkId, bytes: &[u8]) -> ChunkResult<()>;

    /// Fetches a chunk's bytes, or `None` if absent.
    async fn get_chunk(&self, id: &ChunkId) -> ChunkResult<Option<Vec<u8>>>;

    /// Whether a chunk is present without fetching its bytes.
    async fn has_chunk(&self, id: &ChunkId) -> ChunkResult<bool>;

    /// Lists every chunk ID physically present.
    async fn list_chunk_ids(&self) -> ChunkResult<Vec<ChunkId>>;
}

/// In-memory chunk repository for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryChunkRepository {
    chunks: Mutex<BTreeMap<ChunkId, Vec<u8>>>,
}

impl MemoryChunkRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.chunks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no chunks are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes a chunk (test hook for simulating out-of-order arrival).
    pub fn remove(&self, id: &ChunkId) {
        self.chunks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}

#[async_trait]
impl ChunkRepository for MemoryChunkRepository {
    async fn put_chunk(&self, id: &ChunkId, bytes: &[u8]) -> ChunkResult<()> {
        self.chunks
            .lock()
            .map_err(|e| ChunkError::Repository(e.to_string()))?
            .entry(id.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    async fn get_chunk(&self, id: &ChunkId) -> ChunkResult<Option<Vec<u8>>> {
        Ok(self
            .chunks
            .lock()
            .map_err(|e| ChunkError::Repository(e.to_string()))?
            .get(id)
            .cloned())
    }

    async fn has_chunk(&self, id: &ChunkId) -> ChunkResult<bool> {
        Ok(self
            .chunks
            .lock()
            .map_err(|e| ChunkError::Repository(e.to_string()))?
            .contains_key(id))
    }

    async fn list_chunk_ids(&self) -> ChunkResult<Vec<ChunkId>> {
        Ok(self
            .chunks
            .lock()
            .map_err(|e| ChunkError::Repository(e.to_string()))?
            .keys()
            .cloned()
            .collect())
    }
}
