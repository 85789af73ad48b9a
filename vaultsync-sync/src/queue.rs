//! Pending-entry queue for out-of-order chunk arrival.
//!
//! Replication makes no ordering promise between an entry and its chunk
//! children. An entry that arrives before its chunks waits here; each
//! chunk arrival shrinks the waiting items' missing sets and restarts
//! their deadlines. A deadline expiring is a warning, never data loss:
//! the item stays queued and applies whenever its chunks finally land.

use crate::error::SyncResult;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use vaultsync_store::{DocumentStore, StoreError};
use vaultsync_types::{ChunkId, DocId, Entry, RevTag};

/// How long an item may wait without progress before a warning is logged.
pub const CHUNK_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Reserved document holding the persisted queue across restarts.
pub const QUEUE_DOC_ID: &str = "x:pending";

/// A replicated entry waiting for chunk children.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// The entry as received from the source store.
    pub entry: Entry,
    /// The source-assigned revision to land once ready.
    pub rev: RevTag,
    /// The revision's parent in the source tree.
    pub parent: Option<RevTag>,
    /// Chunks still absent locally.
    pub missing: HashSet<ChunkId>,
    /// When to warn if no progress was made.
    pub deadline: Instant,
}

/// The set of entries waiting on chunks.
pub struct ReplicationQueue {
    items: Mutex<Vec<QueueItem>>,
    timeout: Duration,
    // The last list written by `persist`, to avoid churning the change
    // feed with identical revisions every cycle.
    persisted: Mutex<Option<Vec<String>>>,
}

impl ReplicationQueue {
    /// Creates a queue with the default wait timeout.
    pub fn new() -> Self {
        Self::with_timeout(CHUNK_WAIT_TIMEOUT)
    }

    /// Creates a queue with a custom wait timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            timeout,
            persisted: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<QueueItem>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues an entry whose children are not all present yet. A newer
    /// item for the same revision replaces the old one.
    pub fn enqueue(
        &self,
        entry: Entry,
        rev: RevTag,
        parent: Option<RevTag>,
        missing: Vec<ChunkId>,
    ) {
        let mut items = self.lock();
        items.retain(|item| !(item.entry.id == entry.id && item.rev == rev));
        debug!(id = %entry.id, %rev, missing = missing.len(), "queueing entry for chunk wait");
        items.push(QueueItem {
            entry,
            rev,
            parent,
            missing: missing.into_iter().collect(),
            deadline: Instant::now() + self.timeout,
        });
    }

    /// Records a chunk arrival: every waiting item drops it from its
    /// missing set and gets a fresh deadline. Items that became complete
    /// are removed and returned in ascending mtime order.
    pub fn on_chunk_arrived(&self, id: &ChunkId) -> Vec<QueueItem> {
        let mut items = self.lock();
        let now = Instant::now();
        for item in items.iter_mut() {
            if item.missing.remove(id) {
                item.deadline = now + self.timeout;
            }
        }
        Self::extract_ready(&mut items)
    }

    /// Removes and returns all complete items, ascending by mtime.
    pub fn take_ready(&self) -> Vec<QueueItem> {
        Self::extract_ready(&mut self.lock())
    }

    fn extract_ready(items: &mut Vec<QueueItem>) -> Vec<QueueItem> {
        let mut ready = Vec::new();
        items.retain(|item| {
            if item.missing.is_empty() {
                ready.push(item.clone());
                false
            } else {
                true
            }
        });
        ready.sort_by(|a, b| {
            (a.entry.mtime, a.rev.as_str()).cmp(&(b.entry.mtime, b.rev.as_str()))
        });
        ready
    }

    /// Logs items whose deadline passed without progress. They stay
    /// queued; their deadlines restart so each stall warns once per
    /// timeout period.
    pub fn warn_expired(&self) -> usize {
        let mut items = self.lock();
        let now = Instant::now();
        let mut expired = 0;
        for item in items.iter_mut() {
            if item.deadline <= now {
                warn!(
                    id = %item.entry.id,
                    path = %item.entry.path,
                    missing = item.missing.len(),
                    "still waiting for chunks; keeping entry queued"
                );
                item.deadline = now + self.timeout;
                expired += 1;
            }
        }
        expired
    }

    /// Withdraws every queued item for a document (e.g. a rename cancels
    /// a stale queued delete). Returns how many items were dropped.
    pub fn cancel(&self, id: &DocId) -> usize {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|item| &item.entry.id != id);
        before - items.len()
    }

    /// Document IDs of everything still waiting.
    pub fn pending_ids(&self) -> Vec<DocId> {
        self.lock().iter().map(|item| item.entry.id.clone()).collect()
    }

    /// Union of all chunks the queue is waiting for.
    pub fn missing_chunks(&self) -> HashSet<ChunkId> {
        self.lock()
            .iter()
            .flat_map(|item| item.missing.iter().cloned())
            .collect()
    }

    /// Number of waiting items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Persists the waiting document IDs under the reserved queue
    /// document so a restart can resume the waits. A set unchanged
    /// since the last call writes nothing.
    pub async fn persist(&self, store: &dyn DocumentStore) -> SyncResult<()> {
        let ids: Vec<String> = self
            .pending_ids()
            .iter()
            .map(|id| id.as_str().to_string())
            .collect();
        if self
            .persisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_deref()
            == Some(ids.as_slice())
        {
            return Ok(());
        }

        let data = serde_json::to_string(&ids)?;
        let doc_id = DocId::new(QUEUE_DOC_ID);
        let parent = store.winner_rev(&doc_id).await?;
        let entry = Entry::plain(doc_id, QUEUE_DOC_ID, data);
        store.put(&entry, parent.as_ref()).await?;
        *self.persisted.lock().unwrap_or_else(|e| e.into_inner()) = Some(ids);
        Ok(())
    }

    /// Loads the document IDs persisted by an earlier session.
    pub async fn load_persisted(store: &dyn DocumentStore) -> SyncResult<Vec<DocId>> {
        let doc_id = DocId::new(QUEUE_DOC_ID);
        match store.get(&doc_id, None).await {
            Ok(entry) => match &entry.payload {
                vaultsync_types::EntryPayload::Plain {
                    body: vaultsync_types::PlainBody::Inline { data },
                } => {
                    let ids: Vec<String> = serde_json::from_str(data)?;
                    Ok(ids.into_iter().map(DocId::new).collect())
                }
                _ => Ok(Vec::new()),
            },
            Err(StoreError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for ReplicationQueue {
    fn default() -> Self {
        Self::new()
    }
}
