//! Host storage adapters.
//!
//! The engine never touches a filesystem directly; the host hands it a
//! [`StorageAdapter`] for whatever backs the vault (desktop filesystem,
//! mobile sandbox, browser storage). Paths are vault-relative with `/`
//! separators. [`MemoryVault`] is the in-memory implementation used by
//! the sweep tests.

mod hidden;
mod plugins;

pub use hidden::HiddenFileSync;
pub use plugins::{PluginBundleSync, PLUGIN_FILES};

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One directory level: file and subdirectory names relative to the
/// listed path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirListing {
    /// Files directly under the path.
    pub files: Vec<String>,
    /// Subdirectories directly under the path.
    pub folders: Vec<String>,
}

/// Metadata for one stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Last-modified time, epoch milliseconds.
    pub mtime: i64,
    /// Creation time, epoch milliseconds.
    pub ctime: i64,
    /// Size in bytes.
    pub size: u64,
}

/// Abstract vault storage the engine reads and writes through.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Whether a file exists at the path.
    async fn exists(&self, path: &str) -> SyncResult<bool>;

    /// Stats a file, failing if it does not exist.
    async fn stat(&self, path: &str) -> SyncResult<FileStat>;

    /// Reads a file's raw bytes.
    async fn read_binary(&self, path: &str) -> SyncResult<Vec<u8>>;

    /// Reads a file as UTF-8 text.
    async fn read_text(&self, path: &str) -> SyncResult<String> {
        let bytes = self.read_binary(path).await?;
        String::from_utf8(bytes).map_err(|_| SyncError::Encoding {
            path: path.to_string(),
            reason: "not valid UTF-8".to_string(),
        })
    }

    /// Writes raw bytes, creating parent directories as needed.
    async fn write_binary(&self, path: &str, content: &[u8], mtime: i64) -> SyncResult<()>;

    /// Writes UTF-8 text, creating parent directories as needed.
    async fn write_text(&self, path: &str, content: &str, mtime: i64) -> SyncResult<()> {
        self.write_binary(path, content.as_bytes(), mtime).await
    }

    /// Lists the files and subdirectories directly under a directory.
    async fn list(&self, dir: &str) -> SyncResult<DirListing>;

    /// Removes a file; removing an absent file is not an error.
    async fn remove(&self, path: &str) -> SyncResult<()>;

    /// Ensures a directory exists.
    async fn ensure_directory(&self, path: &str) -> SyncResult<()>;
}

/// In-memory [`StorageAdapter`] for tests.
#[derive(Default)]
pub struct MemoryVault {
    files: Mutex<BTreeMap<String, (Vec<u8>, FileStat)>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file directly, bypassing the adapter surface.
    pub fn seed(&self, path: &str, content: &[u8], mtime: i64) {
        let stat = FileStat {
            mtime,
            ctime: mtime,
            size: content.len() as u64,
        };
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), (content.to_vec(), stat));
    }

    /// All current paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StorageAdapter for MemoryVault {
    async fn exists(&self, path: &str) -> SyncResult<bool> {
        Ok(self
            .files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path))
    }

    async fn stat(&self, path: &str) -> SyncResult<FileStat> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .map(|(_, stat)| *stat)
            .ok_or_else(|| SyncError::Transient(format!("{path}: no such file")))
    }

    async fn read_binary(&self, path: &str) -> SyncResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| SyncError::Transient(format!("{path}: no such file")))
    }

    async fn write_binary(&self, path: &str, content: &[u8], mtime: i64) -> SyncResult<()> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let ctime = files.get(path).map(|(_, s)| s.ctime).unwrap_or(mtime);
        let stat = FileStat {
            mtime,
            ctime,
            size: content.len() as u64,
        };
        files.insert(path.to_string(), (content.to_vec(), stat));
        Ok(())
    }

    async fn list(&self, dir: &str) -> SyncResult<DirListing> {
        let prefix = if dir.is_empty() || dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{dir}/")
        };
        let mut listing = DirListing::default();
        for path in self.files.lock().unwrap_or_else(|e| e.into_inner()).keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    if !listing.folders.iter().any(|f| f == folder) {
                        listing.folders.push(folder.to_string());
                    }
                }
                None => listing.files.push(rest.to_string()),
            }
        }
        Ok(listing)
    }

    async fn remove(&self, path: &str) -> SyncResult<()> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
        Ok(())
    }

    async fn ensure_directory(&self, _path: &str) -> SyncResult<()> {
        Ok(())
    }
}
