//! Chunk garbage collection.
//!
//! A chunk is live while any leaf of any non-deleted entry references
//! it: all leaves, not just winners, because a conflict loser may still
//! become the kept version. Collection purges the present-but-unreferenced
//! chunks and reports the referenced-but-absent ones per owning entry;
//! an absent chunk is a finding to surface, never something to drop
//! silently. Local and remote replicas are collected independently.

use crate::error::SyncResult;
use crate::locks::KeyedLocks;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vaultsync_store::{prefix_range, DocumentStore, RevisionState, StoreError};
use vaultsync_types::{ChunkId, DocId, CHUNK_PREFIX};

/// Outcome of one collection pass.
#[derive(Debug, Default)]
pub struct GcReport {
    /// Chunks purged (or, in a dry run, that would be purged).
    pub removed: Vec<ChunkId>,
    /// Referenced chunks absent from the store, per owning entry.
    pub missing: BTreeMap<DocId, Vec<ChunkId>>,
}

/// Collects unreferenced chunks from one document store.
pub struct GarbageCollector {
    store: Arc<dyn DocumentStore>,
    locks: Arc<KeyedLocks>,
}

impl GarbageCollector {
    /// Creates a collector for the given store.
    pub fn new(store: Arc<dyn DocumentStore>, locks: Arc<KeyedLocks>) -> Self {
        Self { store, locks }
    }

    /// Runs one collection pass under the store-exclusive lock: every
    /// writing path holds the store shared, so the pass observes no
    /// in-flight writes.
    ///
    /// `dry_run` computes the full report without touching the store;
    /// a subsequent real run removes exactly what the dry run reported
    /// (absent interleaved writes).
    pub async fn collect(&self, dry_run: bool) -> SyncResult<GcReport> {
        let _guard = self.locks.store_exclusive().await;

        let present = self.present_chunks().await?;
        let (live, missing) = self.live_chunks(&present).await?;

        let mut removed: Vec<ChunkId> = present
            .iter()
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect();
        removed.sort();

        info!(
            present = present.len(),
            live = live.len(),
            garbage = removed.len(),
            missing = missing.len(),
            dry_run,
            "chunk collection pass"
        );

        if dry_run {
            return Ok(GcReport { removed, missing });
        }

        for chunk in &removed {
            let doc_id = chunk.doc_id();
            if let Some(rev) = self.store.winner_rev(&doc_id).await? {
                self.store.purge(&doc_id, &rev).await?;
                debug!(%chunk, "purged unreferenced chunk");
            }
        }
        self.store.compact().await?;

        Ok(GcReport { removed, missing })
    }

    /// Every chunk physically present, from the chunk prefix range.
    async fn present_chunks(&self) -> SyncResult<HashSet<ChunkId>> {
        let (start, end) = prefix_range(CHUNK_PREFIX);
        let entries = self.store.all_in_range(&start, &end).await?;
        Ok(entries
            .iter()
            .filter_map(|e| ChunkId::from_doc_id(&e.id))
            .collect())
    }

    /// Every chunk referenced by any live leaf, plus the per-entry list
    /// of referenced chunks that are not present.
    async fn live_chunks(
        &self,
        present: &HashSet<ChunkId>,
    ) -> SyncResult<(HashSet<ChunkId>, BTreeMap<DocId, Vec<ChunkId>>)> {
        let (start, end) = prefix_range("");
        let entries = self.store.all_in_range(&start, &end).await?;

        let mut live = HashSet::new();
        let mut missing: BTreeMap<DocId, Vec<ChunkId>> = BTreeMap::new();

        for entry in entries {
            if entry.id.is_chunk() {
                continue;
            }
            let leaves = match self.store.revision_state(&entry.id).await? {
                RevisionState::Single(rev) => vec![rev],
                RevisionState::Conflicted(leaves) => leaves,
                RevisionState::None => continue,
            };
            for rev in leaves {
                let leaf = match self.store.get(&entry.id, Some(&rev)).await {
                    Ok(leaf) => leaf,
                    // Payload already compacted away; nothing to reference.
                    Err(StoreError::NotFound(_)) => continue,
                    Err(e) => return Err(e.into()),
                };
                for child in leaf.children() {
                    live.insert(child.clone());
                    if !present.contains(child) {
                        warn!(id = %entry.id, chunk = %child, "referenced chunk is absent");
                        missing.entry(entry.id.clone()).or_default().push(child.clone());
                    }
                }
            }
        }

        for chunks in missing.values_mut() {
            chunks.sort();
            chunks.dedup();
        }
        Ok((live, missing))
    }
}
