//! The MVCC document store abstraction.
//!
//! Local and remote replicated databases implement the same contract: a
//! revisioned get/put surface with compare-and-swap semantics, prefix
//! range enumeration, a change feed, and a purge operation used only by
//! the garbage collector.

use crate::error::StoreResult;
use crate::revtree::RevisionState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vaultsync_types::{DocId, Entry, EntryMeta, EntryPayload, PlainBody, RevTag};

/// Schema version this engine speaks. A remote advertising a different
/// version halts replication before any document moves.
pub const SCHEMA_VERSION: u32 = 2;

/// Reserved ID of the version-marker document.
pub const MILESTONE_DOC_ID: &str = "x:milestone";

/// The version marker stored alongside documents.
///
/// Both replicas carry one; replication refuses to start against a store
/// advertising a different schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    /// Schema version the writing engine speaks.
    pub accepted_version: u32,
}

impl Milestone {
    /// The marker for this engine's schema version.
    pub fn current() -> Self {
        Self {
            accepted_version: SCHEMA_VERSION,
        }
    }

    /// Renders the marker as a storable entry.
    pub fn to_entry(&self) -> StoreResult<Entry> {
        let data = serde_json::to_string(self)?;
        Ok(Entry::plain(DocId::new(MILESTONE_DOC_ID), MILESTONE_DOC_ID, data))
    }

    /// Parses a marker entry.
    pub fn from_entry(entry: &Entry) -> StoreResult<Self> {
        match &entry.payload {
            EntryPayload::Plain {
                body: PlainBody::Inline { data },
            } => Ok(serde_json::from_str(data)?),
            _ => Err(crate::error::StoreError::Protocol(
                "version marker has wrong payload shape".into(),
            )),
        }
    }
}

/// One row of a change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Monotonic store sequence.
    pub seq: u64,
    /// The document that changed.
    pub id: DocId,
    /// The revision the change produced.
    pub rev: RevTag,
    /// The revision's parent, when the store knows it. Replication uses
    /// this to graft pulled revisions onto the right branch.
    pub parent: Option<RevTag>,
    /// Whether this revision is a deletion (a tombstone put or a closed
    /// leaf).
    pub deleted: bool,
}

/// A replicated MVCC document store.
///
/// `put` is a compare-and-swap against the caller's known parent
/// revision: when the store has moved past that parent, the write lands
/// as a new conflicting leaf rather than silently overwriting. Conflicts
/// are data, not errors; `revision_state` reports them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches an entry: the winning revision, or a specific one.
    async fn get(&self, id: &DocId, rev: Option<&RevTag>) -> StoreResult<Entry>;

    /// Fetches entry metadata without the payload.
    async fn get_meta(&self, id: &DocId) -> StoreResult<EntryMeta>;

    /// Reports the document's head state (single, conflicted, gone).
    async fn revision_state(&self, id: &DocId) -> StoreResult<RevisionState>;

    /// The winning leaf revision, or `None` for absent documents.
    async fn winner_rev(&self, id: &DocId) -> StoreResult<Option<RevTag>> {
        Ok(match self.revision_state(id).await? {
            RevisionState::Single(rev) => Some(rev),
            RevisionState::Conflicted(mut leaves) => Some(leaves.remove(0)),
            RevisionState::None => None,
        })
    }

    /// Writes an entry on top of `parent`, returning the new revision.
    async fn put(&self, entry: &Entry, parent: Option<&RevTag>) -> StoreResult<RevTag>;

    /// Lands a replicated revision verbatim (pull path): the revision tag
    /// was assigned by the source store and must not be re-derived.
    async fn force_put(
        &self,
        entry: &Entry,
        rev: &RevTag,
        parent: Option<&RevTag>,
    ) -> StoreResult<()>;

    /// Marks one revision deleted, closing that leaf.
    async fn remove(&self, id: &DocId, rev: &RevTag) -> StoreResult<()>;

    /// Enumerates winning entries whose IDs fall in `[start, end)`.
    async fn all_in_range(&self, start: &str, end: &str) -> StoreResult<Vec<Entry>>;

    /// Changes after the given sequence, in order.
    async fn changes_since(&self, seq: u64) -> StoreResult<Vec<Change>>;

    /// The store's current sequence.
    async fn last_seq(&self) -> StoreResult<u64>;

    /// Fetches several winners at once; absent IDs are skipped.
    async fn bulk_get(&self, ids: &[DocId]) -> StoreResult<Vec<Entry>>;

    /// Lands several replicated revisions at once.
    async fn bulk_put(&self, docs: &[(Entry, RevTag, Option<RevTag>)]) -> StoreResult<()>;

    /// Nearest common ancestor of two leaves, when the backend tracks
    /// enough history to know it. Backends without full local trees
    /// return `None`, and structural merge falls through to escalation.
    async fn common_ancestor(
        &self,
        _id: &DocId,
        _a: &RevTag,
        _b: &RevTag,
    ) -> StoreResult<Option<RevTag>> {
        Ok(None)
    }

    /// Permanently removes a specific revision. Garbage collector only.
    async fn purge(&self, id: &DocId, rev: &RevTag) -> StoreResult<()>;

    /// Reclaims space from purged and superseded revisions.
    async fn compact(&self) -> StoreResult<()>;
}

/// Prefix range helper: all IDs starting with `prefix`.
///
/// The end key appends the highest code point so a plain string range
/// covers the prefix.
pub fn prefix_range(prefix: &str) -> (String, String) {
    (prefix.to_string(), format!("{prefix}\u{10FFFF}"))
}
