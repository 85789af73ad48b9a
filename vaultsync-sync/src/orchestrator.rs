//! Replication orchestrator.
//!
//! Drives change-feed replication between the local and remote stores.
//! Pull classifies every inbound change by its ID prefix and dispatches:
//! chunks land directly and unblock queued entries, documents wait in
//! the queue until their chunk children are present, the version marker
//! re-verifies the schema, internal documents are skipped. Push filters
//! the local feed through the size cap and ships batches; an oversized
//! batch degrades to per-document puts and finally to re-chunking at
//! finer granularity.

use crate::chunkrepo::DocChunkRepository;
use crate::codec::PayloadCodec;
use crate::error::{SyncError, SyncResult};
use crate::locks::{KeyedLocks, LockKey};
use crate::queue::{QueueItem, ReplicationQueue};
use crate::resolver::{ConflictResolver, ConflictUi};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vaultsync_chunks::{ChunkStore, Chunker, MIN_CHUNK_SIZE};
use vaultsync_store::{
    Change, DocumentStore, Milestone, PathCodec, RevisionState, StoreError, MILESTONE_DOC_ID,
    SCHEMA_VERSION,
};
use vaultsync_types::{
    ChunkId, DocId, Entry, EntryPayload, PlainBody, RevTag, SyncSettings,
};

/// What kind of document a replicated change addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
    /// Chunk body under `h:`.
    Chunk,
    /// Hidden-file bundle under `i:`.
    HiddenFile,
    /// Plugin/settings bundle under `ps:`.
    PluginBundle,
    /// The schema version marker.
    Milestone,
    /// Engine-internal document (persisted queue and friends).
    Internal,
    /// An ordinary vault file.
    File,
}

/// Classifies a document ID by its reserved prefix.
pub fn classify(id: &DocId) -> ChangeClass {
    if id.is_chunk() {
        ChangeClass::Chunk
    } else if id.is_hidden() {
        ChangeClass::HiddenFile
    } else if id.is_plugin() {
        ChangeClass::PluginBundle
    } else if id.as_str() == MILESTONE_DOC_ID {
        ChangeClass::Milestone
    } else if id.as_str().starts_with("x:") {
        ChangeClass::Internal
    } else {
        ChangeClass::File
    }
}

/// Counters from one replication cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Documents shipped to the remote.
    pub pushed: usize,
    /// Documents applied locally.
    pub pulled: usize,
    /// Entries still waiting on chunks.
    pub pending: usize,
}

#[derive(Debug, Default)]
struct CycleState {
    push_seq: u64,
    pull_seq: u64,
    version_checked: bool,
}

/// Bidirectional replicator between a local and a remote store.
pub struct Orchestrator {
    local: Arc<dyn DocumentStore>,
    remote: Arc<dyn DocumentStore>,
    settings: SyncSettings,
    paths: PathCodec,
    codec: PayloadCodec,
    chunks: ChunkStore,
    queue: Arc<ReplicationQueue>,
    locks: Arc<KeyedLocks>,
    resolver: ConflictResolver,
    ui: Arc<dyn ConflictUi>,
    state: Mutex<CycleState>,
    oversized: StdMutex<HashSet<DocId>>,
}

impl Orchestrator {
    /// Creates an orchestrator between the two stores.
    pub fn new(
        local: Arc<dyn DocumentStore>,
        remote: Arc<dyn DocumentStore>,
        settings: SyncSettings,
        ui: Arc<dyn ConflictUi>,
    ) -> Self {
        let paths = if settings.use_path_obfuscation {
            PathCodec::with_obfuscation(settings.passphrase.clone())
        } else {
            PathCodec::new()
        };
        let codec = PayloadCodec::from_settings(&settings);
        let chunker = Chunker::new(settings.custom_chunk_size);
        let chunks = ChunkStore::new(
            chunker,
            Arc::new(DocChunkRepository::new(local.clone())),
        );
        let resolver = ConflictResolver::with_codec(
            local.clone(),
            settings.clone(),
            ui.clone(),
            codec.clone(),
        );
        Self {
            local,
            remote,
            settings,
            paths,
            codec,
            chunks,
            queue: Arc::new(ReplicationQueue::new()),
            locks: Arc::new(KeyedLocks::new()),
            resolver,
            ui,
            state: Mutex::new(CycleState::default()),
            oversized: StdMutex::new(HashSet::new()),
        }
    }

    /// The pending-chunk queue.
    pub fn queue(&self) -> &Arc<ReplicationQueue> {
        &self.queue
    }

    /// The keyed lock set, shared with the garbage collector.
    pub fn locks(&self) -> &Arc<KeyedLocks> {
        &self.locks
    }

    /// The conflict resolver bound to the local store.
    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    // ── Session lifecycle ────────────────────────────────────────

    /// Verifies the schema versions match and resumes persisted waits.
    /// Must succeed before the first cycle; a mismatch is fatal.
    pub async fn startup(&self) -> SyncResult<()> {
        self.ensure_version().await?;
        self.state.lock().await.version_checked = true;
        let _store = self.locks.store_shared().await;

        for id in ReplicationQueue::load_persisted(&*self.local).await? {
            match self.remote.get(&id, None).await {
                Ok(entry) => {
                    let Some(rev) = self.remote.winner_rev(&id).await? else {
                        continue;
                    };
                    let change = Change {
                        seq: 0,
                        id: id.clone(),
                        rev,
                        parent: None,
                        deleted: entry.is_deleted(),
                    };
                    self.pull_document(&change).await?;
                }
                Err(StoreError::NotFound(_)) => {
                    debug!(%id, "persisted wait no longer exists remotely");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Checks the remote version marker, writing one onto a fresh remote.
    pub async fn ensure_version(&self) -> SyncResult<()> {
        let id = DocId::new(MILESTONE_DOC_ID);
        match self.remote.get(&id, None).await {
            Ok(entry) => {
                let marker = Milestone::from_entry(&entry)?;
                if marker.accepted_version != SCHEMA_VERSION {
                    return Err(SyncError::VersionMismatch {
                        local: SCHEMA_VERSION,
                        remote: marker.accepted_version,
                    });
                }
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                info!("remote has no version marker, writing ours");
                let entry = Milestone::current().to_entry()?;
                self.remote.put(&entry, None).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs one full replication cycle: push, pull, stall check.
    pub async fn sync_cycle(&self) -> SyncResult<SyncReport> {
        {
            let mut state = self.state.lock().await;
            if !state.version_checked {
                self.ensure_version().await?;
                state.version_checked = true;
            }
        }

        let pushed = self.push_cycle().await?;
        let pulled = self.pull_cycle().await?;
        self.queue.warn_expired();

        Ok(SyncReport {
            pushed,
            pulled,
            pending: self.queue.len(),
        })
    }

    // ── Local file surface ───────────────────────────────────────

    /// Stores a vault file into the local store, chunking large and
    /// binary payloads. Returns the file's document ID.
    pub async fn store_file(&self, path: &str, content: &[u8], mtime: i64) -> SyncResult<DocId> {
        let id = self.paths.path_to_id(path)?;
        let normalized = self.paths.normalize(path)?;
        let _store = self.locks.store_shared().await;
        let _guard = self.locks.acquire(&LockKey::document(&id)).await;

        let (parent, ctime) = match self.local.get(&id, None).await {
            Ok(prev) => (self.local.winner_rev(&id).await?, prev.ctime),
            Err(StoreError::NotFound(_)) => (self.local.winner_rev(&id).await?, mtime),
            Err(e) => return Err(e.into()),
        };

        // Encrypted vaults chunk everything: an inline body would enter
        // the tree, and later the remote, as plaintext.
        let is_text = std::str::from_utf8(content).is_ok();
        let inline = is_text
            && content.len() <= self.chunks.chunker().max_size()
            && !self.codec.is_encrypting();
        let entry = if inline {
            let data = String::from_utf8_lossy(content).into_owned();
            Entry::plain(id.clone(), normalized, data).with_times(mtime, ctime)
        } else {
            let children = self
                .chunks
                .store_chunks(content, |bytes| self.codec.encode(bytes))
                .await?;
            let payload = if is_text {
                EntryPayload::Plain {
                    body: PlainBody::Chunked {
                        children: children.clone(),
                    },
                }
            } else {
                EntryPayload::Note {
                    children: children.clone(),
                }
            };
            let entry = Entry {
                id: id.clone(),
                path: normalized,
                mtime,
                ctime,
                size: content.len() as u64,
                payload,
            };
            // A locally stored chunk may be exactly what a queued remote
            // entry is waiting for.
            for child in &children {
                let ready = self.queue.on_chunk_arrived(child);
                self.apply_ready(ready).await?;
            }
            entry
        };

        self.local.put(&entry, parent.as_ref()).await?;
        Ok(id)
    }

    /// Marks a vault file deleted.
    pub async fn delete_file(&self, path: &str) -> SyncResult<()> {
        let id = self.paths.path_to_id(path)?;
        let normalized = self.paths.normalize(path)?;
        let _store = self.locks.store_shared().await;
        let _guard = self.locks.acquire(&LockKey::document(&id)).await;

        let parent = self.local.winner_rev(&id).await?;
        let entry = Entry::tombstone(id, normalized);
        self.local.put(&entry, parent.as_ref()).await?;
        Ok(())
    }

    /// Reads a vault file's decoded content, resolving conflicts first
    /// when conflicts are only checked on open.
    pub async fn open_file(&self, path: &str) -> SyncResult<Vec<u8>> {
        let id = self.paths.path_to_id(path)?;
        if self.settings.check_conflict_only_on_open {
            let _store = self.locks.store_shared().await;
            self.resolver.resolve(&id).await?;
        }
        let entry = self.local.get(&id, None).await?;
        self.resolver.read_content(&entry).await
    }

    /// Withdraws every queued remote revision for a path (a rename or a
    /// fresh save cancels a stale queued delete).
    pub fn cancel_pending(&self, path: &str) -> SyncResult<usize> {
        let id = self.paths.path_to_id(path)?;
        Ok(self.queue.cancel(&id))
    }

    // ── Push ─────────────────────────────────────────────────────

    /// Ships local changes to the remote. Returns how many documents
    /// went over.
    pub async fn push_cycle(&self) -> SyncResult<usize> {
        let _store = self.locks.store_shared().await;
        let since = self.state.lock().await.push_seq;
        let changes = self.local.changes_since(since).await?;
        let limit = self.settings.max_size_bytes();

        let mut batch: Vec<(Entry, RevTag, Option<RevTag>)> = Vec::new();
        let mut pushed = 0usize;
        let mut max_seq = since;

        for change in changes {
            max_seq = max_seq.max(change.seq);
            if matches!(
                classify(&change.id),
                ChangeClass::Internal | ChangeClass::Milestone
            ) {
                continue;
            }

            let entry = match self.local.get(&change.id, Some(&change.rev)).await {
                Ok(entry) => entry,
                // Payload already compacted; nothing to ship.
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            if change.deleted && !entry.is_deleted() {
                // A leaf closed by conflict resolution; mirror the close.
                match self.remote.remove(&change.id, &change.rev).await {
                    Ok(()) | Err(StoreError::NotFound(_)) => pushed += 1,
                    Err(e) => return Err(e.into()),
                }
                continue;
            }

            if let Some(limit) = limit {
                if entry.size > limit && !self.confirm_oversized(&entry, limit).await {
                    continue;
                }
            }
            self.oversized
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&change.id);

            batch.push((entry, change.rev.clone(), change.parent.clone()));
        }

        pushed += self.flush_batch(batch).await?;
        self.state.lock().await.push_seq = max_seq;
        Ok(pushed)
    }

    /// Handles an entry over the size cap. The user is asked once per
    /// document whether to move it anyway; a decline (or a silent UI)
    /// skips it until it changes, with a single visible notice.
    async fn confirm_oversized(&self, entry: &Entry, limit: u64) -> bool {
        let newly = self
            .oversized
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.id.clone());
        warn!(
            id = %entry.id,
            size = entry.size,
            limit,
            "entry over size cap, skipped this cycle"
        );
        if !newly {
            return false;
        }

        let choice = self
            .ui
            .confirm(
                &format!("{} is larger than the configured sync limit", entry.path),
                &["Skip", "Sync anyway"],
            )
            .await;
        if choice == Some(1) {
            self.oversized
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&entry.id);
            return true;
        }

        self.ui
            .notify(&format!(
                "{}: skipped, larger than the configured sync limit",
                entry.path
            ))
            .await;
        false
    }

    async fn flush_batch(
        &self,
        batch: Vec<(Entry, RevTag, Option<RevTag>)>,
    ) -> SyncResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let _permit = self.locks.throttle().await?;

        match self.remote.bulk_put(&batch).await {
            Ok(()) => Ok(batch.len()),
            Err(StoreError::PayloadTooLarge(_)) => {
                debug!(docs = batch.len(), "batch too large, retrying per document");
                let mut shipped = 0;
                for doc in &batch {
                    match self.remote.bulk_put(std::slice::from_ref(doc)).await {
                        Ok(()) => shipped += 1,
                        Err(StoreError::PayloadTooLarge(_)) => {
                            self.shrink_and_requeue(&doc.0).await?;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(shipped)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rewrites an entry the remote rejected as too large using finer
    /// chunk granularity; the rewrite re-enters the change feed and is
    /// pushed next cycle. When the chunking floor is reached the entry
    /// is skipped visibly instead.
    async fn shrink_and_requeue(&self, entry: &Entry) -> SyncResult<()> {
        let half = self.chunks.chunker().max_size() / 2;
        if entry.is_deleted() || entry.children().is_empty() || half < MIN_CHUNK_SIZE * 2 {
            warn!(id = %entry.id, "remote rejects payload and it cannot shrink further");
            self.ui
                .notify(&format!(
                    "{}: the remote rejected this file as too large",
                    entry.path
                ))
                .await;
            return Ok(());
        }

        let content = self.resolver.read_content(entry).await?;
        let finer = ChunkStore::new(Chunker::new(half), self.chunks.repository().clone());
        let children = finer
            .store_chunks(&content, |bytes| self.codec.encode(bytes))
            .await?;

        let payload = match &entry.payload {
            EntryPayload::Note { .. } => EntryPayload::Note { children },
            _ => EntryPayload::Plain {
                body: PlainBody::Chunked { children },
            },
        };
        let mut smaller = entry.clone();
        smaller.payload = payload;

        let parent = self.local.winner_rev(&entry.id).await?;
        self.local.put(&smaller, parent.as_ref()).await?;
        info!(id = %entry.id, chunk_size = half, "re-chunked oversized entry");
        Ok(())
    }

    // ── Pull ─────────────────────────────────────────────────────

    /// Applies remote changes locally. Returns how many documents were
    /// applied (queued entries are counted when they later apply).
    pub async fn pull_cycle(&self) -> SyncResult<usize> {
        let _store = self.locks.store_shared().await;
        let since = self.state.lock().await.pull_seq;
        let changes = self.remote.changes_since(since).await?;

        let mut pulled = 0usize;
        let mut max_seq = since;

        for change in changes {
            max_seq = max_seq.max(change.seq);
            match classify(&change.id) {
                ChangeClass::Internal => {}
                ChangeClass::Milestone => self.ensure_version().await?,
                ChangeClass::Chunk => {
                    self.pull_chunk(&change).await?;
                    pulled += 1;
                }
                ChangeClass::HiddenFile | ChangeClass::PluginBundle | ChangeClass::File => {
                    pulled += self.pull_document(&change).await?;
                }
            }
        }

        self.state.lock().await.pull_seq = max_seq;
        self.queue.persist(&*self.local).await?;
        Ok(pulled)
    }

    async fn pull_chunk(&self, change: &Change) -> SyncResult<()> {
        let entry = match self.remote.get(&change.id, Some(&change.rev)).await {
            Ok(entry) => entry,
            // Collected remotely before we got to it.
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        self.local
            .force_put(&entry, &change.rev, change.parent.as_ref())
            .await?;

        if let Some(chunk) = ChunkId::from_doc_id(&change.id) {
            let ready = self.queue.on_chunk_arrived(&chunk);
            self.apply_ready(ready).await?;
        }
        Ok(())
    }

    async fn pull_document(&self, change: &Change) -> SyncResult<usize> {
        let entry = match self.remote.get(&change.id, Some(&change.rev)).await {
            Ok(entry) => entry,
            Err(StoreError::NotFound(_)) if change.deleted => {
                Entry::tombstone(change.id.clone(), change.id.as_str())
            }
            Err(StoreError::NotFound(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        // The size cap applies on the way in as well: a declined
        // oversized entry is not materialized locally.
        if !entry.is_deleted() {
            if let Some(limit) = self.settings.max_size_bytes() {
                if entry.size > limit && !self.confirm_oversized(&entry, limit).await {
                    return Ok(0);
                }
            }
        }

        let repo = self.chunks.repository();
        let mut missing = Vec::new();
        for child in entry.children() {
            if !repo.has_chunk(child).await? {
                missing.push(child.clone());
            }
        }

        if !missing.is_empty() {
            warn!(
                id = %change.id,
                missing = missing.len(),
                "entry arrived before its chunks, queueing"
            );
            self.queue
                .enqueue(entry, change.rev.clone(), change.parent.clone(), missing);
            return Ok(0);
        }

        self.apply_remote_entry(&entry, &change.rev, change.parent.as_ref())
            .await?;
        Ok(1)
    }

    async fn apply_remote_entry(
        &self,
        entry: &Entry,
        rev: &RevTag,
        parent: Option<&RevTag>,
    ) -> SyncResult<()> {
        let key = LockKey::document(&entry.id);
        let _guard = self.locks.acquire(&key).await;

        self.local.force_put(entry, rev, parent).await?;

        if !self.settings.check_conflict_only_on_open {
            if let RevisionState::Conflicted(_) = self.local.revision_state(&entry.id).await? {
                self.resolver.resolve(&entry.id).await?;
            }
        }
        Ok(())
    }

    /// Applies queue items that became complete, ascending by mtime.
    /// An older ready item superseded by a newer one for the same path
    /// still lands in the tree but triggers no further processing.
    async fn apply_ready(&self, items: Vec<QueueItem>) -> SyncResult<()> {
        for (i, item) in items.iter().enumerate() {
            let superseded = items[i + 1..]
                .iter()
                .any(|later| later.entry.path == item.entry.path);
            if superseded {
                debug!(
                    id = %item.entry.id,
                    rev = %item.rev,
                    "ready item superseded by newer queued revision"
                );
                self.local
                    .force_put(&item.entry, &item.rev, item.parent.as_ref())
                    .await?;
                continue;
            }
            info!(id = %item.entry.id, "queued entry complete, applying");
            self.apply_remote_entry(&item.entry, &item.rev, item.parent.as_ref())
                .await?;
        }
        Ok(())
    }
}
