//! Path ⇄ document ID codec.
//!
//! The same logical path must always yield the same ID regardless of the
//! platform it came from, so separators and (optionally) case are
//! normalized before hashing. With obfuscation enabled the ID is a keyed
//! one-way hash; the display path then comes from the `path` field the
//! entry itself carries.

use crate::error::{StoreError, StoreResult};
use sha2::{Digest, Sha256};
use vaultsync_types::{DocId, Entry};

/// Prefix of obfuscated file document IDs.
pub const OBFUSCATED_PREFIX: &str = "f:";

/// Characters no path segment may contain on any supported platform.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\u{0}'];

/// Bidirectional mapping between vault paths and document IDs.
#[derive(Debug, Clone, Default)]
pub struct PathCodec {
    obfuscation_key: Option<String>,
    case_insensitive: bool,
}

impl PathCodec {
    /// Plain codec: the ID embeds the normalized path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyed codec: IDs are deterministic one-way hashes of the path.
    pub fn with_obfuscation(key: impl Into<String>) -> Self {
        Self {
            obfuscation_key: Some(key.into()),
            case_insensitive: false,
        }
    }

    /// Treats paths differing only in case as the same document.
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Whether obfuscation is active.
    pub fn obfuscates(&self) -> bool {
        self.obfuscation_key.is_some()
    }

    /// Normalizes a vault path: separators unified, leading `./` stripped,
    /// platform-invalid names rejected before they reach the pipeline.
    pub fn normalize(&self, path: &str) -> StoreResult<String> {
        let unified = path.replace('\\', "/");
        let trimmed = unified.strip_prefix("./").unwrap_or(&unified);

        if trimmed.is_empty() || trimmed.starts_with('/') {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == ".." || segment == "." {
                return Err(StoreError::InvalidPath(path.to_string()));
            }
            if segment.ends_with(' ') || segment.ends_with('.') {
                return Err(StoreError::InvalidPath(path.to_string()));
            }
            if segment.chars().any(|c| INVALID_CHARS.contains(&c)) {
                return Err(StoreError::InvalidPath(path.to_string()));
            }
        }

        Ok(trimmed.to_string())
    }

    /// Derives the document ID for a path.
    pub fn path_to_id(&self, path: &str) -> StoreResult<DocId> {
        let normalized = self.normalize(path)?;
        let canonical = if self.case_insensitive {
            normalized.to_lowercase()
        } else {
            normalized.clone()
        };

        match &self.obfuscation_key {
            None => Ok(DocId::new(canonical)),
            Some(key) => {
                let mut hasher = Sha256::new();
                hasher.update(key.as_bytes());
                hasher.update([0u8]);
                hasher.update(canonical.as_bytes());
                let digest = hasher.finalize();
                Ok(DocId::new(format!(
                    "{OBFUSCATED_PREFIX}{}",
                    hex::encode(digest)
                )))
            }
        }
    }

    /// Recovers the display path for an ID.
    ///
    /// Obfuscated IDs do not encode the path; it is reconstructed from the
    /// entry the caller already holds.
    pub fn id_to_path(&self, id: &DocId, hint: Option<&Entry>) -> StoreResult<String> {
        if let Some(raw) = id.as_str().strip_prefix(OBFUSCATED_PREFIX) {
            let entry = hint.ok_or_else(|| {
                StoreError::InvalidPath(format!("obfuscated id {raw} without path hint"))
            })?;
            return self.normalize(&entry.path);
        }
        self.normalize(id.as_str())
    }
}
