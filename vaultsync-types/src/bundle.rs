//! Multi-file bundle documents.
//!
//! A bundle is one logical document whose payload is a serialized list of
//! sub-files (a plugin's `manifest.json` + `main.js` + `styles.css` +
//! `data.json`, or a themed set of hidden files). The sub-file list is only
//! ever replaced atomically as a whole; a bundle entry is never partially
//! written.

use serde::{Deserialize, Serialize};

/// One constituent file of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    /// File name relative to the bundle root.
    pub name: String,
    /// Base64-encoded file content.
    pub content: String,
    /// Last-modified time, epoch milliseconds.
    pub mtime: i64,
    /// Decoded size in bytes.
    pub size: u64,
}

/// A logical multi-file document, stored as one entry payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedBundle {
    /// Bundle display name (plugin ID, hidden-file group).
    pub name: String,
    /// The constituent files, replaced as a whole on every write.
    pub files: Vec<BundleFile>,
}

impl SyncedBundle {
    /// Creates an empty bundle with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: Vec::new(),
        }
    }

    /// The bundle's effective mtime: the newest constituent mtime.
    ///
    /// "Most recent change anywhere in the bundle" is what newer-wins
    /// comparisons actually want, so max is used rather than any averaging.
    pub fn mtime(&self) -> i64 {
        self.files.iter().map(|f| f.mtime).max().unwrap_or(0)
    }

    /// Total decoded size of all constituents.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Looks up a constituent by name.
    pub fn file(&self, name: &str) -> Option<&BundleFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Serializes the bundle to its entry payload text.
    pub fn to_payload(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes a bundle from an entry payload.
    pub fn from_payload(payload: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, mtime: i64) -> BundleFile {
        BundleFile {
            name: name.to_string(),
            content: String::new(),
            mtime,
            size: 0,
        }
    }

    #[test]
    fn mtime_is_max_of_constituents() {
        let mut bundle = SyncedBundle::new("plugin-a");
        bundle.files = vec![file("manifest.json", 100), file("main.js", 900), file("styles.css", 400)];
        assert_eq!(bundle.mtime(), 900);
    }

    #[test]
    fn payload_roundtrip() {
        let mut bundle = SyncedBundle::new("plugin-b");
        bundle.files = vec![file("data.json", 5)];
        let payload = bundle.to_payload().unwrap();
        assert_eq!(SyncedBundle::from_payload(&payload).unwrap(), bundle);
    }
}
