//! Chunk repository backed by the document store.
//!
//! Chunks replicate as ordinary documents under the `h:` prefix, one
//! immutable single-revision document per chunk. Backing the repository
//! with the store means chunk bytes flow through the same change feed,
//! CAS semantics, and remote transport as everything else.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use vaultsync_chunks::{ChunkError, ChunkRepository, ChunkResult};
use vaultsync_store::{prefix_range, DocumentStore, StoreError};
use vaultsync_types::{ChunkId, Entry, EntryPayload, PlainBody, CHUNK_PREFIX};

/// A `ChunkRepository` storing chunk bytes as `h:`-prefixed documents.
pub struct DocChunkRepository {
    store: Arc<dyn DocumentStore>,
}

impl DocChunkRepository {
    /// Wraps a document store as a chunk repository.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

fn repo_err(e: StoreError) -> ChunkError {
    ChunkError::Repository(e.to_string())
}

#[async_trait]
impl ChunkRepository for DocChunkRepository {
    async fn put_chunk(&self, id: &ChunkId, bytes: &[u8]) -> ChunkResult<()> {
        let doc_id = id.doc_id();
        match self.store.get_meta(&doc_id).await {
            Ok(_) => return Ok(()), // content-addressed, already present
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(repo_err(e)),
        }

        let mut entry = Entry::plain(doc_id, id.as_str(), STANDARD.encode(bytes));
        entry.size = bytes.len() as u64;
        self.store.put(&entry, None).await.map_err(repo_err)?;
        Ok(())
    }

    async fn get_chunk(&self, id: &ChunkId) -> ChunkResult<Option<Vec<u8>>> {
        match self.store.get(&id.doc_id(), None).await {
            Ok(entry) => match &entry.payload {
                EntryPayload::Plain {
                    body: PlainBody::Inline { data },
                } => STANDARD
                    .decode(data)
                    .map(Some)
                    .map_err(|e| ChunkError::Repository(format!("chunk {id} not base64: {e}"))),
                _ => Err(ChunkError::Repository(format!(
                    "chunk {id} has wrong payload shape"
                ))),
            },
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(repo_err(e)),
        }
    }

    async fn has_chunk(&self, id: &ChunkId) -> ChunkResult<bool> {
        match self.store.get_meta(&id.doc_id()).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(repo_err(e)),
        }
    }

    async fn list_chunk_ids(&self) -> ChunkResult<Vec<ChunkId>> {
        let (start, end) = prefix_range(CHUNK_PREFIX);
        let entries = self
            .store
            .all_in_range(&start, &end)
            .await
            .map_err(repo_err)?;
        Ok(entries
            .iter()
            .filter_map(|e| ChunkId::from_doc_id(&e.id))
            .collect())
    }
}
