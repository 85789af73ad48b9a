//! In-memory document store.
//!
//! Reference implementation of the MVCC contract; also the test double
//! for everything built on `DocumentStore`.

use crate::error::{StoreError, StoreResult};
use crate::revtree::{next_rev, RevNode, RevTree, RevisionState};
use crate::store::{Change, DocumentStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use vaultsync_types::{DocId, Entry, EntryMeta, RevTag};

#[derive(Debug, Default)]
struct DocRecord {
    tree: RevTree,
    payloads: HashMap<RevTag, Entry>,
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<DocId, DocRecord>,
    changes: Vec<Change>,
    seq: u64,
}

impl Inner {
    fn record_change(
        &mut self,
        id: &DocId,
        rev: &RevTag,
        parent: Option<&RevTag>,
        deleted: bool,
    ) {
        self.seq += 1;
        self.changes.push(Change {
            seq: self.seq,
            id: id.clone(),
            rev: rev.clone(),
            parent: parent.cloned(),
            deleted,
        });
    }

    fn winner_entry(&self, id: &DocId) -> Option<&Entry> {
        let record = self.docs.get(id)?;
        let winner = record.tree.winner()?;
        record.payloads.get(&winner)
    }
}

/// An in-memory MVCC document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The revision tree of a document (resolver support).
    pub fn tree_of(&self, id: &DocId) -> Option<RevTree> {
        self.lock().docs.get(id).map(|r| r.tree.clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &DocId, rev: Option<&RevTag>) -> StoreResult<Entry> {
        let inner = self.lock();
        match rev {
            Some(rev) => inner
                .docs
                .get(id)
                .and_then(|r| r.payloads.get(rev))
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.clone())),
            None => inner
                .winner_entry(id)
                .filter(|e| !e.is_deleted())
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.clone())),
        }
    }

    async fn get_meta(&self, id: &DocId) -> StoreResult<EntryMeta> {
        let inner = self.lock();
        inner
            .winner_entry(id)
            .map(EntryMeta::from)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn revision_state(&self, id: &DocId) -> StoreResult<RevisionState> {
        let inner = self.lock();
        Ok(inner
            .docs
            .get(id)
            .map(|r| r.tree.state())
            .unwrap_or(RevisionState::None))
    }

    async fn put(&self, entry: &Entry, parent: Option<&RevTag>) -> StoreResult<RevTag> {
        let rev = next_rev(entry, parent);
        let mut inner = self.lock();
        let record = inner.docs.entry(entry.id.clone()).or_default();
        record.tree.insert(RevNode {
            rev: rev.clone(),
            parent: parent.cloned(),
            deleted: entry.is_deleted(),
        });
        record.payloads.insert(rev.clone(), entry.clone());
        inner.record_change(&entry.id, &rev, parent, entry.is_deleted());
        Ok(rev)
    }

    async fn force_put(
        &self,
        entry: &Entry,
        rev: &RevTag,
        parent: Option<&RevTag>,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let record = inner.docs.entry(entry.id.clone()).or_default();
        if record.tree.get(rev).is_some() {
            // Revision already replicated; idempotent.
            return Ok(());
        }
        record.tree.insert(RevNode {
            rev: rev.clone(),
            parent: parent.cloned(),
            deleted: entry.is_deleted(),
        });
        record.payloads.insert(rev.clone(), entry.clone());
        inner.record_change(&entry.id, rev, parent, entry.is_deleted());
        Ok(())
    }

    async fn remove(&self, id: &DocId, rev: &RevTag) -> StoreResult<()> {
        let mut inner = self.lock();
        let record = inner
            .docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if !record.tree.mark_deleted(rev) {
            return Err(StoreError::NotFound(id.clone()));
        }
        let id = id.clone();
        let rev = rev.clone();
        inner.record_change(&id, &rev, None, true);
        Ok(())
    }

    async fn all_in_range(&self, start: &str, end: &str) -> StoreResult<Vec<Entry>> {
        let inner = self.lock();
        let mut out = Vec::new();
        for (id, _) in inner
            .docs
            .range(DocId::new(start)..DocId::new(end))
        {
            if let Some(entry) = inner.winner_entry(id) {
                if !entry.is_deleted() {
                    out.push(entry.clone());
                }
            }
        }
        Ok(out)
    }

    async fn changes_since(&self, seq: u64) -> StoreResult<Vec<Change>> {
        let inner = self.lock();
        Ok(inner
            .changes
            .iter()
            .filter(|c| c.seq > seq)
            .cloned()
            .collect())
    }

    async fn last_seq(&self) -> StoreResult<u64> {
        Ok(self.lock().seq)
    }

    async fn bulk_get(&self, ids: &[DocId]) -> StoreResult<Vec<Entry>> {
        let inner = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.winner_entry(id).cloned())
            .collect())
    }

    async fn bulk_put(&self, docs: &[(Entry, RevTag, Option<RevTag>)]) -> StoreResult<()> {
        for (entry, rev, parent) in docs {
            self.force_put(entry, rev, parent.as_ref()).await?;
        }
        Ok(())
    }

    async fn common_ancestor(
        &self,
        id: &DocId,
        a: &RevTag,
        b: &RevTag,
    ) -> StoreResult<Option<RevTag>> {
        Ok(self
            .lock()
            .docs
            .get(id)
            .and_then(|r| r.tree.common_ancestor(a, b)))
    }

    async fn purge(&self, id: &DocId, rev: &RevTag) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(record) = inner.docs.get_mut(id) {
            record.tree.purge(rev);
            record.payloads.remove(rev);
            if record.tree.is_empty() {
                inner.docs.remove(id);
            }
        }
        Ok(())
    }

    async fn compact(&self) -> StoreResult<()> {
        let mut inner = self.lock();
        for record in inner.docs.values_mut() {
            let keep: Vec<RevTag> = record
                .tree
                .leaves()
                .into_iter()
                .map(|n| n.rev.clone())
                .collect();
            record.payloads.retain(|rev, _| keep.contains(rev));
        }
        Ok(())
    }
}
