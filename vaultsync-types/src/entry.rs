//! The versioned unit of synchronization.
//!
//! An `Entry` is one logical document: a binary note, a plain-text note, or
//! a tombstone marking deletion. The payload is a closed sum type so that
//! every consumer matches exhaustively; there is no "unknown shape" case.

use crate::ids::{ChunkId, DocId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A versioned logical document representing one file or bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Document identifier (path-derived, possibly obfuscated).
    pub id: DocId,
    /// Display path. Carried inside the entry so the path survives
    /// obfuscated IDs.
    pub path: String,
    /// Last-modified time, epoch milliseconds.
    pub mtime: i64,
    /// Creation time, epoch milliseconds.
    pub ctime: i64,
    /// Decoded content size in bytes.
    pub size: u64,
    /// The payload variant.
    #[serde(flatten)]
    pub payload: EntryPayload,
}

/// The payload of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryPayload {
    /// Binary payload, stored as an ordered list of chunk references.
    Note {
        children: Vec<ChunkId>,
    },
    /// Textual payload, inline or chunked.
    Plain {
        body: PlainBody,
    },
    /// Deletion marker. Carries no content but retains identity and mtime
    /// so deletions replicate and order correctly.
    Tombstone,
}

/// Where a plain entry's text lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlainBody {
    /// Small texts are stored inline in the document.
    Inline { data: String },
    /// Larger texts are chunked exactly like notes.
    Chunked { children: Vec<ChunkId> },
}

/// Coarse classification of an entry, cheap to ship without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Note,
    Plain,
    Tombstone,
}

impl Entry {
    /// Creates a note entry from chunk references.
    pub fn note(id: DocId, path: impl Into<String>, children: Vec<ChunkId>, size: u64) -> Self {
        let now = now_millis();
        Self {
            id,
            path: path.into(),
            mtime: now,
            ctime: now,
            size,
            payload: EntryPayload::Note { children },
        }
    }

    /// Creates a plain entry with inline text.
    pub fn plain(id: DocId, path: impl Into<String>, data: impl Into<String>) -> Self {
        let data = data.into();
        let now = now_millis();
        Self {
            id,
            path: path.into(),
            mtime: now,
            ctime: now,
            size: data.len() as u64,
            payload: EntryPayload::Plain {
                body: PlainBody::Inline { data },
            },
        }
    }

    /// Creates a tombstone for a previously synced entry.
    pub fn tombstone(id: DocId, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
            mtime: now_millis(),
            ctime: 0,
            size: 0,
            payload: EntryPayload::Tombstone,
        }
    }

    /// Whether this entry marks a deletion.
    pub fn is_deleted(&self) -> bool {
        matches!(self.payload, EntryPayload::Tombstone)
    }

    /// The chunk references this entry depends on (empty for inline and
    /// tombstone payloads).
    pub fn children(&self) -> &[ChunkId] {
        match &self.payload {
            EntryPayload::Note { children } => children,
            EntryPayload::Plain {
                body: PlainBody::Chunked { children },
            } => children,
            _ => &[],
        }
    }

    /// The entry's kind discriminator.
    pub fn kind(&self) -> EntryKind {
        match &self.payload {
            EntryPayload::Note { .. } => EntryKind::Note,
            EntryPayload::Plain { .. } => EntryKind::Plain,
            EntryPayload::Tombstone => EntryKind::Tombstone,
        }
    }

    /// Sets mtime/ctime from file stat values.
    pub fn with_times(mut self, mtime: i64, ctime: i64) -> Self {
        self.mtime = mtime;
        self.ctime = ctime;
        self
    }
}

/// Lightweight entry metadata, retrievable without the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub id: DocId,
    pub path: String,
    pub kind: EntryKind,
    pub mtime: i64,
    pub size: u64,
    pub deleted: bool,
}

impl From<&Entry> for EntryMeta {
    fn from(entry: &Entry) -> Self {
        Self {
            id: entry.id.clone(),
            path: entry.path.clone(),
            kind: entry.kind(),
            mtime: entry.mtime,
            size: entry.size,
            deleted: entry.is_deleted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serde_tags() {
        let entry = Entry::plain(DocId::new("note.md"), "note.md", "hello");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""type":"plain""#));

        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn tombstone_has_no_children() {
        let entry = Entry::tombstone(DocId::new("gone.md"), "gone.md");
        assert!(entry.is_deleted());
        assert!(entry.children().is_empty());
        assert_eq!(entry.kind(), EntryKind::Tombstone);
    }

    #[test]
    fn chunked_plain_exposes_children() {
        let mut entry = Entry::plain(DocId::new("big.md"), "big.md", "");
        entry.payload = EntryPayload::Plain {
            body: PlainBody::Chunked {
                children: vec![ChunkId::new("aa"), ChunkId::new("bb")],
            },
        };
        assert_eq!(entry.children().len(), 2);
    }
}
