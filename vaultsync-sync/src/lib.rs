//! Synchronization engine: replication, conflict resolution, collection.
//!
//! This crate drives everything above the document store. The
//! [`Orchestrator`] replicates the change feeds of a local and a remote
//! store in both directions, classifying documents by prefix and holding
//! entries in the [`ReplicationQueue`] until their chunk children arrive.
//! The [`ConflictResolver`] walks a document's conflicting leaves through
//! an escalation ladder that only involves the host's [`ConflictUi`] when
//! no automatic rule applies. The [`GarbageCollector`] purges chunks no
//! leaf references. Host storage plugs in through the adapter traits in
//! [`adapters`].

pub mod adapters;
mod chunkrepo;
mod codec;
mod diff;
mod error;
mod gc;
mod locks;
mod orchestrator;
mod queue;
mod resolver;

pub use chunkrepo::DocChunkRepository;
pub use codec::PayloadCodec;
pub use diff::{
    apply, diff, disjoint, line_diff, touched_paths, ConflictDiff, Delta, DiffLine,
};
pub use error::{SyncError, SyncResult};
pub use gc::{GarbageCollector, GcReport};
pub use locks::{KeyedLocks, LockKey, DEFAULT_BATCH_PERMITS};
pub use orchestrator::{classify, ChangeClass, Orchestrator, SyncReport};
pub use queue::{QueueItem, ReplicationQueue, CHUNK_WAIT_TIMEOUT, QUEUE_DOC_ID};
pub use resolver::{
    ConflictChoice, ConflictPhase, ConflictResolver, ConflictUi, SilentUi,
};
