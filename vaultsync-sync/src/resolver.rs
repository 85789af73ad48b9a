//! Conflict detection and resolution.
//!
//! A document with more than one live leaf is in conflict. Resolution
//! walks a ladder: identical decoded content merges silently; the
//! newer-file policy applies when configured; JSON payloads get a
//! three-way structural merge against the common ancestor when the two
//! patches are disjoint; everything else escalates to the conflict UI
//! with a line diff. Trees can hold more than two leaves, so resolution
//! loops until one leaf remains or the user postpones.

use crate::chunkrepo::DocChunkRepository;
use crate::codec::PayloadCodec;
use crate::diff::{apply, diff, disjoint, ConflictDiff};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vaultsync_chunks::{ChunkStore, Chunker};
use vaultsync_store::{DocumentStore, RevisionState, StoreError};
use vaultsync_types::{DocId, Entry, EntryPayload, PlainBody, RevTag, SyncSettings};

/// Where a document stands in the conflict lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPhase {
    /// No conflicting leaves.
    None,
    /// Conflicting leaves exist, resolution not yet attempted.
    Detected,
    /// Resolved without user involvement.
    AutoResolved,
    /// The user was (or must be) consulted.
    Escalated,
}

/// A user's answer to an escalated conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Keep the newer leaf, discard the other.
    KeepLeft,
    /// Keep the older leaf, discard the newer.
    KeepRight,
    /// Write one document containing both versions.
    ConcatenateBoth,
}

/// Callbacks into the host application's conflict surface.
///
/// The engine never renders UI; it hands over a diff and acts on the
/// answer. Returning `None` postpones: the conflict stays in the tree
/// and is offered again later.
#[async_trait]
pub trait ConflictUi: Send + Sync {
    /// Presents an escalated conflict and asks for a decision.
    async fn show_conflict_diff(&self, path: &str, diff: &ConflictDiff)
        -> Option<ConflictChoice>;

    /// Asks the user to pick one of `choices`, returning its index.
    /// `None` declines the question; callers treat that as the safe
    /// default for whatever they were asking.
    async fn confirm(&self, message: &str, choices: &[&str]) -> Option<usize>;

    /// Surfaces a non-interactive notice (auto-resolutions, skips).
    async fn notify(&self, message: &str);
}

/// A `ConflictUi` that never answers and swallows notices. Conflicts
/// stay in the tree for a later interactive session.
pub struct SilentUi;

#[async_trait]
impl ConflictUi for SilentUi {
    async fn show_conflict_diff(&self, _: &str, _: &ConflictDiff) -> Option<ConflictChoice> {
        None
    }

    async fn confirm(&self, _: &str, _: &[&str]) -> Option<usize> {
        None
    }

    async fn notify(&self, _: &str) {}
}

enum PairOutcome {
    Resolved,
    Escalated,
    Postponed,
}

/// Resolves conflicting leaves of store documents.
pub struct ConflictResolver {
    store: Arc<dyn DocumentStore>,
    chunks: ChunkStore,
    codec: PayloadCodec,
    settings: SyncSettings,
    ui: Arc<dyn ConflictUi>,
}

impl ConflictResolver {
    /// Creates a resolver over the given store.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        settings: SyncSettings,
        ui: Arc<dyn ConflictUi>,
    ) -> Self {
        let codec = PayloadCodec::from_settings(&settings);
        Self::with_codec(store, settings, ui, codec)
    }

    /// Creates a resolver sharing an existing payload codec.
    pub fn with_codec(
        store: Arc<dyn DocumentStore>,
        settings: SyncSettings,
        ui: Arc<dyn ConflictUi>,
        codec: PayloadCodec,
    ) -> Self {
        let chunker = Chunker::new(settings.custom_chunk_size);
        let chunks = ChunkStore::new(chunker, Arc::new(DocChunkRepository::new(store.clone())));
        Self {
            store,
            chunks,
            codec,
            settings,
            ui,
        }
    }

    /// Resolves a document until a single leaf remains or the user
    /// postpones. Returns the strongest phase the document went through.
    pub async fn resolve(&self, id: &DocId) -> SyncResult<ConflictPhase> {
        let mut auto = false;
        let mut escalated = false;

        loop {
            let leaves = match self.store.revision_state(id).await? {
                RevisionState::Conflicted(leaves) => leaves,
                _ => break,
            };
            debug!(%id, leaves = leaves.len(), "conflict detected");

            // Leaves come newest-first; resolve the top pair and rescan.
            match self.resolve_pair(id, &leaves[0], &leaves[1]).await? {
                PairOutcome::Resolved => auto = true,
                PairOutcome::Escalated => escalated = true,
                PairOutcome::Postponed => return Ok(ConflictPhase::Escalated),
            }
        }

        Ok(if escalated {
            ConflictPhase::Escalated
        } else if auto {
            ConflictPhase::AutoResolved
        } else {
            ConflictPhase::None
        })
    }

    async fn resolve_pair(
        &self,
        id: &DocId,
        left_rev: &RevTag,
        right_rev: &RevTag,
    ) -> SyncResult<PairOutcome> {
        let left = self.leaf_content(id, left_rev).await?;
        let right = self.leaf_content(id, right_rev).await?;

        // A leaf whose payload cannot be read (purged payload, missing or
        // corrupt chunks) carries no information worth keeping.
        let ((left_entry, left_bytes), (right_entry, right_bytes)) = match (left, right) {
            (Some(l), Some(r)) => (l, r),
            (Some(_), None) => {
                warn!(%id, rev = %right_rev, "dropping unreadable conflict leaf");
                self.store.remove(id, right_rev).await?;
                return Ok(PairOutcome::Resolved);
            }
            (None, Some(_)) => {
                warn!(%id, rev = %left_rev, "dropping unreadable conflict leaf");
                self.store.remove(id, left_rev).await?;
                return Ok(PairOutcome::Resolved);
            }
            (None, None) => {
                warn!(%id, "both conflict leaves unreadable, dropping both");
                self.store.remove(id, left_rev).await?;
                self.store.remove(id, right_rev).await?;
                return Ok(PairOutcome::Resolved);
            }
        };

        let left_is_newer = (left_entry.mtime, left_rev.as_str())
            >= (right_entry.mtime, right_rev.as_str());
        let (keep, drop) = if left_is_newer {
            (left_rev, right_rev)
        } else {
            (right_rev, left_rev)
        };

        if left_bytes == right_bytes {
            info!(%id, "identical conflict content, keeping newer revision");
            self.store.remove(id, drop).await?;
            return Ok(PairOutcome::Resolved);
        }

        if self.settings.resolve_conflicts_by_newer_file {
            info!(%id, "resolving by newer file per settings");
            self.ui
                .notify(&format!("{}: kept the newer version", left_entry.path))
                .await;
            self.store.remove(id, drop).await?;
            return Ok(PairOutcome::Resolved);
        }

        if let Some(outcome) = self
            .try_structural_merge(
                id,
                (&left_entry, left_rev, &left_bytes),
                (&right_entry, right_rev, &right_bytes),
            )
            .await?
        {
            return Ok(outcome);
        }

        self.escalate(
            id,
            (&left_entry, left_rev, &left_bytes),
            (&right_entry, right_rev, &right_bytes),
        )
        .await
    }

    /// Three-way JSON merge: both leaves diffed against the common
    /// ancestor; disjoint patches compose into one merged revision.
    async fn try_structural_merge(
        &self,
        id: &DocId,
        left: (&Entry, &RevTag, &Vec<u8>),
        right: (&Entry, &RevTag, &Vec<u8>),
    ) -> SyncResult<Option<PairOutcome>> {
        let (left_entry, left_rev, left_bytes) = left;
        let (right_entry, right_rev, right_bytes) = right;

        let (Ok(left_value), Ok(right_value)) = (
            serde_json::from_slice::<serde_json::Value>(left_bytes),
            serde_json::from_slice::<serde_json::Value>(right_bytes),
        ) else {
            return Ok(None);
        };

        let Some(ancestor_rev) = self.store.common_ancestor(id, left_rev, right_rev).await?
        else {
            return Ok(None);
        };
        let Some((_, ancestor_bytes)) = self.leaf_content(id, &ancestor_rev).await? else {
            return Ok(None); // ancestor payload compacted away
        };
        let Ok(ancestor_value) = serde_json::from_slice::<serde_json::Value>(&ancestor_bytes)
        else {
            return Ok(None);
        };

        let left_delta = diff(&ancestor_value, &left_value);
        let right_delta = diff(&ancestor_value, &right_value);
        match (left_delta, right_delta) {
            // One side never diverged from the ancestor; the other side's
            // leaf is the merge result.
            (None, _) => {
                self.store.remove(id, left_rev).await?;
                Ok(Some(PairOutcome::Resolved))
            }
            (_, None) => {
                self.store.remove(id, right_rev).await?;
                Ok(Some(PairOutcome::Resolved))
            }
            (Some(dl), Some(dr)) if disjoint(&dl, &dr) => {
                let merged = apply(&apply(&ancestor_value, &dl), &dr);
                let content = serde_json::to_string(&merged)?;
                info!(%id, "merged disjoint structural edits");
                self.write_resolved(
                    left_entry,
                    left_rev,
                    right_rev,
                    content,
                    left_entry.mtime.max(right_entry.mtime),
                )
                .await?;
                Ok(Some(PairOutcome::Resolved))
            }
            _ => Ok(None),
        }
    }

    async fn escalate(
        &self,
        id: &DocId,
        left: (&Entry, &RevTag, &Vec<u8>),
        right: (&Entry, &RevTag, &Vec<u8>),
    ) -> SyncResult<PairOutcome> {
        let (left_entry, left_rev, left_bytes) = left;
        let (right_entry, right_rev, right_bytes) = right;

        let conflict = ConflictDiff::between(left_bytes, right_bytes);
        let Some(choice) = self
            .ui
            .show_conflict_diff(&left_entry.path, &conflict)
            .await
        else {
            debug!(%id, "conflict resolution postponed by user");
            return Ok(PairOutcome::Postponed);
        };

        match choice {
            ConflictChoice::KeepLeft => {
                self.store.remove(id, right_rev).await?;
            }
            ConflictChoice::KeepRight => {
                self.store.remove(id, left_rev).await?;
            }
            ConflictChoice::ConcatenateBoth => {
                match (
                    std::str::from_utf8(left_bytes),
                    std::str::from_utf8(right_bytes),
                ) {
                    (Ok(l), Ok(r)) => {
                        let joined = format!("{l}\n{r}");
                        self.write_resolved(
                            left_entry,
                            left_rev,
                            right_rev,
                            joined,
                            left_entry.mtime.max(right_entry.mtime),
                        )
                        .await?;
                    }
                    _ => {
                        // Concatenation has no meaning for binary payloads.
                        self.ui
                            .notify(&format!(
                                "{}: cannot concatenate binary versions, kept the newer one",
                                left_entry.path
                            ))
                            .await;
                        let drop = if (left_entry.mtime, left_rev.as_str())
                            >= (right_entry.mtime, right_rev.as_str())
                        {
                            right_rev
                        } else {
                            left_rev
                        };
                        self.store.remove(id, drop).await?;
                    }
                }
            }
        }
        Ok(PairOutcome::Escalated)
    }

    /// Writes the resolution as a new revision on top of `keep` and
    /// closes the `drop` leaf. Encrypted vaults store the merged content
    /// chunked so only ciphertext enters the tree.
    async fn write_resolved(
        &self,
        template: &Entry,
        keep: &RevTag,
        drop: &RevTag,
        content: String,
        mtime: i64,
    ) -> SyncResult<()> {
        let mut entry = if self.codec.is_encrypting() {
            let children = self
                .chunks
                .store_chunks(content.as_bytes(), |bytes| self.codec.encode(bytes))
                .await?;
            Entry {
                id: template.id.clone(),
                path: template.path.clone(),
                mtime: 0,
                ctime: 0,
                size: content.len() as u64,
                payload: EntryPayload::Plain {
                    body: PlainBody::Chunked { children },
                },
            }
        } else {
            Entry::plain(template.id.clone(), template.path.clone(), content)
        };
        entry.mtime = mtime;
        entry.ctime = template.ctime;
        self.store.put(&entry, Some(keep)).await?;
        self.store.remove(&template.id, drop).await?;
        Ok(())
    }

    async fn leaf_content(
        &self,
        id: &DocId,
        rev: &RevTag,
    ) -> SyncResult<Option<(Entry, Vec<u8>)>> {
        let entry = match self.store.get(id, Some(rev)).await {
            Ok(entry) => entry,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match self.read_content(&entry).await {
            Ok(bytes) => Ok(Some((entry, bytes))),
            Err(SyncError::MissingChunks(_)) | Err(SyncError::Chunks(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Decodes an entry's full content, reassembling chunked payloads.
    pub async fn read_content(&self, entry: &Entry) -> SyncResult<Vec<u8>> {
        match &entry.payload {
            EntryPayload::Plain {
                body: PlainBody::Inline { data },
            } => Ok(data.clone().into_bytes()),
            EntryPayload::Plain {
                body: PlainBody::Chunked { children },
            }
            | EntryPayload::Note { children } => Ok(self
                .chunks
                .reassemble(children, |bytes| self.codec.decode(bytes))
                .await?),
            EntryPayload::Tombstone => Ok(Vec::new()),
        }
    }
}
