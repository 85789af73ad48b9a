//! Identifier types used throughout the vaultsync core.
//!
//! Document identifiers are opaque strings derived from vault paths by the
//! path codec; chunk identifiers are content hashes; revision tags follow
//! the `"<generation>-<hash>"` convention so generations order naturally.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key prefix for chunk documents.
pub const CHUNK_PREFIX: &str = "h:";

/// Key prefix for hidden-file bundle documents.
pub const HIDDEN_PREFIX: &str = "i:";

/// Key prefix for plugin/settings bundle documents.
pub const PLUGIN_PREFIX: &str = "ps:";

/// Opaque identifier for a document in the store.
///
/// Derived deterministically from a normalized path, optionally through a
/// keyed one-way transform so the identifier does not leak the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Creates a document ID from an already-encoded string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this ID addresses a chunk document.
    pub fn is_chunk(&self) -> bool {
        self.0.starts_with(CHUNK_PREFIX)
    }

    /// Whether this ID addresses a hidden-file document.
    pub fn is_hidden(&self) -> bool {
        self.0.starts_with(HIDDEN_PREFIX)
    }

    /// Whether this ID addresses a plugin/settings bundle document.
    pub fn is_plugin(&self) -> bool {
        self.0.starts_with(PLUGIN_PREFIX)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Content hash identifying an immutable chunk.
///
/// Chunks are addressed by the hash of their stored bytes (ciphertext when
/// encryption is enabled), so identical content always maps to the same ID
/// and a content change always produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Creates a chunk ID from a hex digest.
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The document ID under which this chunk is stored.
    pub fn doc_id(&self) -> DocId {
        DocId::new(format!("{CHUNK_PREFIX}{}", self.0))
    }

    /// Recovers a chunk ID from its chunk-document key, if it is one.
    pub fn from_doc_id(id: &DocId) -> Option<Self> {
        id.as_str().strip_prefix(CHUNK_PREFIX).map(Self::new)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A revision tag in the store's MVCC history, formatted `"<gen>-<hash>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevTag(String);

impl RevTag {
    /// Creates a revision tag from generation and content hash.
    pub fn new(generation: u64, hash: &str) -> Self {
        Self(format!("{generation}-{hash}"))
    }

    /// Parses a tag, validating the `"<gen>-<hash>"` shape.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s.split_once('-') {
            Some((gen, hash)) if !hash.is_empty() && gen.parse::<u64>().is_ok() => {
                Ok(Self(s.to_string()))
            }
            _ => Err(crate::Error::InvalidRevTag(s.to_string())),
        }
    }

    /// The generation number (how many revisions precede this one).
    pub fn generation(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(gen, _)| gen.parse().ok())
            .unwrap_or(0)
    }

    /// Returns the tag string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_doc_id_roundtrip() {
        let cid = ChunkId::new("abcd1234");
        let doc = cid.doc_id();
        assert!(doc.is_chunk());
        assert_eq!(ChunkId::from_doc_id(&doc), Some(cid));
    }

    #[test]
    fn rev_tag_parse() {
        assert!(RevTag::parse("3-deadbeef").is_ok());
        assert!(RevTag::parse("nope").is_err());
        assert!(RevTag::parse("x-deadbeef").is_err());
        assert_eq!(RevTag::new(7, "ff").generation(), 7);
    }
}
