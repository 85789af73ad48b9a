//! Property-based tests for the chunk layer.

use proptest::prelude::*;
use std::sync::Arc;
use vaultsync_chunks::{chunk_id, identity, ChunkStore, Chunker, MemoryChunkRepository};

fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..60_000)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// reassemble(chunk(P)) == P for all byte payloads P.
    #[test]
    fn chunk_roundtrip(payload in payload_strategy()) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = ChunkStore::new(Chunker::new(4 * 1024), Arc::new(MemoryChunkRepository::new()));
            let children = store.store_chunks(&payload, identity).await.unwrap();
            let back = store.reassemble(&children, identity).await.unwrap();
            prop_assert_eq!(back, payload);
            Ok(())
        })?;
    }

    /// chunk(P) run twice yields identical chunk ID lists.
    #[test]
    fn chunking_is_deterministic(payload in payload_strategy()) {
        let chunker = Chunker::new(4 * 1024);
        let a: Vec<_> = chunker.split(&payload).iter().map(|c| chunk_id(c)).collect();
        let b: Vec<_> = chunker.split(&payload).iter().map(|c| chunk_id(c)).collect();
        prop_assert_eq!(a, b);
    }

    /// Chunk IDs address content: equal chunks hash equal, and the ID is
    /// stable hex of fixed width.
    #[test]
    fn ids_are_content_addresses(payload in payload_strategy()) {
        let id = chunk_id(&payload);
        prop_assert_eq!(id.as_str().len(), 64);
        prop_assert_eq!(chunk_id(&payload), id);
    }
}

/// Scenario: two files with identical content share every chunk.
#[tokio::test]
async fn dedup_across_files() {
    let repo = Arc::new(MemoryChunkRepository::new());
    let store = ChunkStore::new(Chunker::new(4 * 1024), repo.clone());

    let content = b"X".repeat(20_000);
    let file_a = store.store_chunks(&content, identity).await.unwrap();
    let count_after_a = repo.len();
    let file_b = store.store_chunks(&content, identity).await.unwrap();

    assert_eq!(file_a, file_b);
    assert_eq!(repo.len(), count_after_a, "second file must add no chunks");
}
