//! Hidden-file synchronization.
//!
//! Configuration files outside the normal vault surface (app settings,
//! themes, snippets) replicate as single-file bundle documents under the
//! hidden prefix. Each watched path maps to one document; a sweep in
//! either direction compares content digests and mtimes and only moves
//! what actually changed. Newer-wins: a local edit beats an older remote
//! bundle and vice versa. Each path's work runs under its bundle lock in
//! skip-if-busy mode, so periodic sweeps never pile up on a contended
//! file.

use crate::adapters::StorageAdapter;
use crate::error::{SyncError, SyncResult};
use crate::locks::{KeyedLocks, LockKey};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, info};
use vaultsync_store::{prefix_range, DocumentStore};
use vaultsync_types::{
    BundleFile, DocId, Entry, EntryPayload, PlainBody, SyncedBundle, HIDDEN_PREFIX,
};

#[derive(Debug, Clone)]
struct FileState {
    digest: String,
    mtime: i64,
}

/// Replicates a configured set of hidden files through the store.
pub struct HiddenFileSync {
    store: Arc<dyn DocumentStore>,
    vault: Arc<dyn StorageAdapter>,
    locks: Arc<KeyedLocks>,
    watched: Vec<String>,
    state: Mutex<HashMap<String, FileState>>,
}

fn doc_id(path: &str) -> DocId {
    DocId::new(format!("{HIDDEN_PREFIX}{path}"))
}

fn digest_of(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

impl HiddenFileSync {
    /// Creates a sweeper for the given watched paths.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        vault: Arc<dyn StorageAdapter>,
        locks: Arc<KeyedLocks>,
        watched: Vec<String>,
    ) -> Self {
        Self {
            store,
            vault,
            locks,
            watched,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HashMap<String, FileState>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Scans the watched files and stores the ones that changed since
    /// the last sweep. A watched file that disappeared after being
    /// synced gets a tombstone. A path whose bundle lock is held is
    /// skipped until the next sweep. Returns how many documents were
    /// written.
    pub async fn push_sweep(&self) -> SyncResult<usize> {
        let mut written = 0;

        for path in &self.watched {
            match self
                .locks
                .try_run(&LockKey::bundle(path), self.push_path(path))
                .await
            {
                Ok(wrote) => written += wrote?,
                Err(SyncError::Busy) => {
                    debug!(path, "bundle busy, skipping until the next sweep");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    async fn push_path(&self, path: &str) -> SyncResult<usize> {
        if self.vault.exists(path).await? {
            let content = self.vault.read_binary(path).await?;
            let stat = self.vault.stat(path).await?;
            let digest = digest_of(&content);

            let unchanged = self
                .state()
                .get(path)
                .is_some_and(|s| s.digest == digest);
            if unchanged {
                return Ok(0);
            }

            let mut bundle = SyncedBundle::new(path);
            bundle.files.push(BundleFile {
                name: path.to_string(),
                content: STANDARD.encode(&content),
                mtime: stat.mtime,
                size: stat.size,
            });

            let id = doc_id(path);
            let parent = self.store.winner_rev(&id).await?;
            let entry = Entry::plain(id, path, bundle.to_payload()?)
                .with_times(stat.mtime, stat.ctime);
            self.store.put(&entry, parent.as_ref()).await?;

            debug!(path, "hidden file stored");
            self.state().insert(
                path.to_string(),
                FileState {
                    digest,
                    mtime: stat.mtime,
                },
            );
            Ok(1)
        } else if self.state().contains_key(path) {
            let mut written = 0;
            let id = doc_id(path);
            if let Some(parent) = self.store.winner_rev(&id).await? {
                let entry = Entry::tombstone(id, path);
                self.store.put(&entry, Some(&parent)).await?;
                info!(path, "hidden file removed, tombstoned");
                written = 1;
            }
            self.state().remove(path);
            Ok(written)
        } else {
            Ok(0)
        }
    }

    /// Applies hidden-file documents from the store to the vault. A
    /// document that vanished from the store removes its previously
    /// synced local file. Busy bundle locks skip as in [`push_sweep`].
    /// Returns how many local files changed.
    ///
    /// [`push_sweep`]: HiddenFileSync::push_sweep
    pub async fn pull_sweep(&self) -> SyncResult<usize> {
        let (start, end) = prefix_range(HIDDEN_PREFIX);
        let entries = self.store.all_in_range(&start, &end).await?;

        let mut seen = HashSet::new();
        let mut applied = 0;

        for entry in entries {
            let Some(path) = entry.id.as_str().strip_prefix(HIDDEN_PREFIX) else {
                continue;
            };
            if !self.watched.iter().any(|w| w == path) {
                continue;
            }
            seen.insert(path.to_string());

            match self
                .locks
                .try_run(&LockKey::bundle(path), self.pull_entry(path, &entry))
                .await
            {
                Ok(wrote) => applied += wrote?,
                Err(SyncError::Busy) => {
                    debug!(path, "bundle busy, skipping until the next sweep");
                }
                Err(e) => return Err(e),
            }
        }

        // A previously synced file whose document is gone (deleted on
        // another device) is removed locally.
        let orphaned: Vec<String> = self
            .state()
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();
        for path in orphaned {
            match self
                .locks
                .try_run(&LockKey::bundle(&path), self.remove_orphan(&path))
                .await
            {
                Ok(wrote) => applied += wrote?,
                Err(SyncError::Busy) => {
                    debug!(path, "bundle busy, skipping until the next sweep");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(applied)
    }

    async fn pull_entry(&self, path: &str, entry: &Entry) -> SyncResult<usize> {
        let EntryPayload::Plain {
            body: PlainBody::Inline { data },
        } = &entry.payload
        else {
            return Ok(0);
        };
        let bundle = SyncedBundle::from_payload(data)?;
        let Some(file) = bundle.files.first() else {
            return Ok(0);
        };

        let local_mtime = if self.vault.exists(path).await? {
            self.vault.stat(path).await?.mtime
        } else {
            i64::MIN
        };
        if file.mtime <= local_mtime {
            return Ok(0);
        }

        let content = STANDARD.decode(&file.content).map_err(|e| {
            SyncError::Encoding {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.vault.write_binary(path, &content, file.mtime).await?;
        debug!(path, "hidden file applied from store");
        self.state().insert(
            path.to_string(),
            FileState {
                digest: digest_of(&content),
                mtime: file.mtime,
            },
        );
        Ok(1)
    }

    async fn remove_orphan(&self, path: &str) -> SyncResult<usize> {
        self.vault.remove(path).await?;
        self.state().remove(path);
        info!(path, "hidden file deleted on another device, removed");
        Ok(1)
    }
}
