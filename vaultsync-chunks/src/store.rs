//! Write-through chunk store: split, address, persist, reassemble.

use crate::chunker::Chunker;
use crate::repo::ChunkRepository;
use crate::{ChunkError, ChunkResult};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use vaultsync_types::ChunkId;

/// Computes the content address of a chunk's stored bytes.
pub fn chunk_id(bytes: &[u8]) -> ChunkId {
    let digest = Sha256::digest(bytes);
    ChunkId::new(hex::encode(digest))
}

/// Splits payloads into content-addressed chunks backed by a repository.
pub struct ChunkStore {
    chunker: Chunker,
    repo: Arc<dyn ChunkRepository>,
}

impl ChunkStore {
    /// Creates a chunk store over the given repository.
    pub fn new(chunker: Chunker, repo: Arc<dyn ChunkRepository>) -> Self {
        Self { chunker, repo }
    }

    /// Splits `content`, stores every chunk not already present, and
    /// returns the ordered child list for the owning entry.
    ///
    /// `transform` maps each plaintext chunk to its stored form (identity,
    /// or encryption, in which case the ID addresses the ciphertext).
    pub async fn store_chunks<F>(&self, content: &[u8], transform: F) -> ChunkResult<Vec<ChunkId>>
    where
        F: Fn(&[u8]) -> ChunkResult<Vec<u8>>,
    {
        let pieces = self.chunker.split(content);
        let mut children = Vec::with_capacity(pieces.len());
        let mut stored = 0usize;

        for piece in &pieces {
            let bytes = transform(piece)?;
            let id = chunk_id(&bytes);
            if !self.repo.has_chunk(&id).await? {
                self.repo.put_chunk(&id, &bytes).await?;
                stored += 1;
            }
            children.push(id);
        }

        debug!(
            chunks = children.len(),
            new = stored,
            "stored chunked payload"
        );
        Ok(children)
    }

    /// Reassembles a payload from its ordered child list.
    ///
    /// Fails with the exact set of absent chunk IDs, which becomes the
    /// replication orchestrator's wait set. `transform` maps stored bytes
    /// back to plaintext.
    pub async fn reassemble<F>(&self, children: &[ChunkId], transform: F) -> ChunkResult<Vec<u8>>
    where
        F: Fn(&[u8]) -> ChunkResult<Vec<u8>>,
    {
        let mut missing = Vec::new();
        let mut parts = Vec::with_capacity(children.len());

        for id in children {
            match self.repo.get_chunk(id).await? {
                Some(bytes) => parts.push((id.clone(), bytes)),
                None => missing.push(id.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(ChunkError::MissingChunks(missing));
        }

        let mut out = Vec::new();
        for (id, bytes) in parts {
            if chunk_id(&bytes) != id {
                return Err(ChunkError::Corrupt(id));
            }
            out.extend_from_slice(&transform(&bytes)?);
        }
        Ok(out)
    }

    /// The underlying repository.
    pub fn repository(&self) -> &Arc<dyn ChunkRepository> {
        &self.repo
    }

    /// The chunker in use.
    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }
}

/// Identity transform for unencrypted vaults.
pub fn identity(bytes: &[u8]) -> ChunkResult<Vec<u8>> {
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryChunkRepository;

    fn store() -> ChunkStore {
        ChunkStore::new(Chunker::new(4 * 1024), Arc::new(MemoryChunkRepository::new()))
    }

    #[tokio::test]
    async fn roundtrip() {
        let store = store();
        let content: Vec<u8> = (0..30_000u32).map(|i| (i % 256) as u8).collect();
        let children = store.store_chunks(&content, identity).await.unwrap();
        let back = store.reassemble(&children, identity).await.unwrap();
        assert_eq!(back, content);
    }

    #[tokio::test]
    async fn identical_content_deduplicates() {
        let store = store();
        let content = vec![42u8; 20_000];
        let a = store.store_chunks(&content, identity).await.unwrap();
        let before = store.repo.list_chunk_ids().await.unwrap().len();
        let b = store.store_chunks(&content, identity).await.unwrap();
        let after = store.repo.list_chunk_ids().await.unwrap().len();

        assert_eq!(a, b);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn missing_chunks_are_reported_exactly() {
        let repo = Arc::new(MemoryChunkRepository::new());
        let store = ChunkStore::new(Chunker::new(4 * 1024), repo.clone());
        let content: Vec<u8> = (0..30_000u32).map(|i| (i * 13 % 256) as u8).collect();
        let children = store.store_chunks(&content, identity).await.unwrap();
        assert!(children.len() >= 2, "test needs multiple chunks");

        repo.remove(&children[1]);
        match store.reassemble(&children, identity).await {
            Err(ChunkError::MissingChunks(missing)) => {
                assert_eq!(missing, vec![children[1].clone()]);
            }
            other => panic!("expected MissingChunks, got {other:?}"),
        }
    }
}
