//! Core type definitions for vaultsync.
//!
//! This crate defines the fundamental types shared by every layer of the
//! engine:
//! - Document, chunk, and revision identifiers
//! - The versioned `Entry` payload sum type (note / plain text / tombstone)
//! - Multi-file bundle documents used by the synchronization adapters
//! - The user-facing sync settings
//!
//! Everything transport- or storage-specific (revision trees, replication
//! queues, adapters) belongs in the crates built on top of this one.

mod bundle;
mod entry;
mod ids;
mod settings;

pub use bundle::{BundleFile, SyncedBundle};
pub use entry::{now_millis, Entry, EntryKind, EntryMeta, EntryPayload, PlainBody};
pub use ids::{ChunkId, DocId, RevTag, CHUNK_PREFIX, HIDDEN_PREFIX, PLUGIN_PREFIX};
pub use settings::SyncSettings;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid revision tag: {0}")]
    InvalidRevTag(String),
}
