//! MVCC document store abstraction and backends.
//!
//! Everything the sync engine persists (file entries, chunks, bundles,
//! markers) goes through the `DocumentStore` trait: a revisioned
//! get/put surface with compare-and-swap writes, prefix enumeration, a
//! change feed, and purge. Three backends implement it:
//!
//! - `MemoryStore`: reference semantics and test double
//! - `SqliteStore`: the persistent local replica
//! - `RemoteStore`: HTTP+JSON client for the remote replica
//!
//! The path codec also lives here: it is what turns vault paths into the
//! document IDs the stores are keyed by.

mod error;
mod memory;
mod path;
mod remote;
mod revtree;
mod sqlite;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use path::{PathCodec, OBFUSCATED_PREFIX};
pub use remote::{RemoteConfig, RemoteStore};
pub use revtree::{next_rev, RevNode, RevTree, RevisionState};
pub use sqlite::SqliteStore;
pub use store::{
    prefix_range, Change, DocumentStore, Milestone, MILESTONE_DOC_ID, SCHEMA_VERSION,
};
