//! Plugin bundle synchronization.
//!
//! A plugin is a small fixed set of files in its own directory. The set
//! replicates as one bundle document under the plugin prefix, and the
//! file list is only ever replaced as a whole: a pull writes every
//! constituent and removes the ones the bundle no longer carries, so a
//! half-updated plugin directory cannot be observed. Each plugin's work
//! runs under its bundle lock in skip-if-busy mode.

use crate::adapters::StorageAdapter;
use crate::error::{SyncError, SyncResult};
use crate::locks::{KeyedLocks, LockKey};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, info};
use vaultsync_store::{prefix_range, DocumentStore};
use vaultsync_types::{
    BundleFile, DocId, Entry, EntryPayload, PlainBody, SyncedBundle, PLUGIN_PREFIX,
};

/// The constituent files a plugin directory may carry.
pub const PLUGIN_FILES: &[&str] = &["manifest.json", "main.js", "styles.css", "data.json"];

/// Replicates plugin directories through the store as whole bundles.
pub struct PluginBundleSync {
    store: Arc<dyn DocumentStore>,
    vault: Arc<dyn StorageAdapter>,
    locks: Arc<KeyedLocks>,
    root: String,
    // bundle name -> mtime of the last synced version
    state: Mutex<HashMap<String, i64>>,
}

fn doc_id(name: &str) -> DocId {
    DocId::new(format!("{PLUGIN_PREFIX}{name}"))
}

impl PluginBundleSync {
    /// Creates a sweeper over the directory holding one subdirectory
    /// per plugin.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        vault: Arc<dyn StorageAdapter>,
        locks: Arc<KeyedLocks>,
        root: impl Into<String>,
    ) -> Self {
        Self {
            store,
            vault,
            locks,
            root: root.into(),
            state: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn file_path(&self, name: &str, file: &str) -> String {
        format!("{}/{name}/{file}", self.root)
    }

    /// Plugin names present in the vault, from the directory listing.
    async fn local_plugins(&self) -> SyncResult<Vec<String>> {
        let mut names = self.vault.list(&self.root).await?.folders;
        names.sort();
        Ok(names)
    }

    /// Reads a plugin directory into a bundle, skipping absent
    /// constituents.
    async fn read_bundle(&self, name: &str) -> SyncResult<SyncedBundle> {
        let mut bundle = SyncedBundle::new(name);
        for file in PLUGIN_FILES {
            let path = self.file_path(name, file);
            if !self.vault.exists(&path).await? {
                continue;
            }
            let content = self.vault.read_binary(&path).await?;
            let stat = self.vault.stat(&path).await?;
            bundle.files.push(BundleFile {
                name: (*file).to_string(),
                content: STANDARD.encode(&content),
                mtime: stat.mtime,
                size: stat.size,
            });
        }
        Ok(bundle)
    }

    /// Stores every local plugin whose bundle changed since the last
    /// sweep; a plugin whose directory emptied out gets a tombstone. A
    /// plugin whose bundle lock is held is skipped until the next
    /// sweep. Returns how many documents were written.
    pub async fn push_sweep(&self) -> SyncResult<usize> {
        let mut written = 0;
        let local = self.local_plugins().await?;

        for name in &local {
            match self
                .locks
                .try_run(&LockKey::bundle(name), self.push_plugin(name))
                .await
            {
                Ok(wrote) => written += wrote?,
                Err(SyncError::Busy) => {
                    debug!(plugin = %name, "bundle busy, skipping until the next sweep");
                }
                Err(e) => return Err(e),
            }
        }

        // Plugins synced before and now gone from the vault.
        let vanished: Vec<String> = self
            .state()
            .keys()
            .filter(|name| !local.contains(name))
            .cloned()
            .collect();
        for name in vanished {
            match self
                .locks
                .try_run(&LockKey::bundle(&name), self.tombstone_plugin(&name))
                .await
            {
                Ok(wrote) => written += wrote?,
                Err(SyncError::Busy) => {
                    debug!(plugin = %name, "bundle busy, skipping until the next sweep");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(written)
    }

    async fn push_plugin(&self, name: &str) -> SyncResult<usize> {
        let bundle = self.read_bundle(name).await?;
        if bundle.files.is_empty() {
            return Ok(0);
        }
        let mtime = bundle.mtime();
        if self.state().get(name).copied() == Some(mtime) {
            return Ok(0);
        }

        let id = doc_id(name);
        let parent = self.store.winner_rev(&id).await?;
        let entry = Entry::plain(id, name, bundle.to_payload()?).with_times(mtime, mtime);
        self.store.put(&entry, parent.as_ref()).await?;

        debug!(plugin = %name, files = bundle.files.len(), "plugin bundle stored");
        self.state().insert(name.to_string(), mtime);
        Ok(1)
    }

    async fn tombstone_plugin(&self, name: &str) -> SyncResult<usize> {
        let mut written = 0;
        let id = doc_id(name);
        if let Some(parent) = self.store.winner_rev(&id).await? {
            let entry = Entry::tombstone(id, name);
            self.store.put(&entry, Some(&parent)).await?;
            info!(plugin = %name, "plugin removed, tombstoned");
            written = 1;
        }
        self.state().remove(name);
        Ok(written)
    }

    /// Applies plugin bundles from the store to the vault. Each applied
    /// bundle replaces the whole plugin directory: constituents the
    /// bundle no longer carries are removed. Busy bundle locks skip as
    /// in [`push_sweep`]. Returns how many bundles were applied.
    ///
    /// [`push_sweep`]: PluginBundleSync::push_sweep
    pub async fn pull_sweep(&self) -> SyncResult<usize> {
        let (start, end) = prefix_range(PLUGIN_PREFIX);
        let entries = self.store.all_in_range(&start, &end).await?;

        let mut seen = HashSet::new();
        let mut applied = 0;

        for entry in entries {
            let Some(name) = entry.id.as_str().strip_prefix(PLUGIN_PREFIX) else {
                continue;
            };
            seen.insert(name.to_string());

            match self
                .locks
                .try_run(&LockKey::bundle(name), self.apply_bundle(name, &entry))
                .await
            {
                Ok(wrote) => applied += wrote?,
                Err(SyncError::Busy) => {
                    debug!(plugin = %name, "bundle busy, skipping until the next sweep");
                }
                Err(e) => return Err(e),
            }
        }

        // A bundle deleted on another device removes the local plugin.
        let orphaned: Vec<String> = self
            .state()
            .keys()
            .filter(|name| !seen.contains(*name))
            .cloned()
            .collect();
        for name in orphaned {
            match self
                .locks
                .try_run(&LockKey::bundle(&name), self.remove_plugin(&name))
                .await
            {
                Ok(wrote) => applied += wrote?,
                Err(SyncError::Busy) => {
                    debug!(plugin = %name, "bundle busy, skipping until the next sweep");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(applied)
    }

    async fn apply_bundle(&self, name: &str, entry: &Entry) -> SyncResult<usize> {
        let EntryPayload::Plain {
            body: PlainBody::Inline { data },
        } = &entry.payload
        else {
            return Ok(0);
        };
        let bundle = SyncedBundle::from_payload(data)?;
        if bundle.files.is_empty() {
            return Ok(0);
        }

        let local_mtime = self.read_bundle(name).await?.mtime();
        if bundle.mtime() <= local_mtime {
            return Ok(0);
        }

        self.vault
            .ensure_directory(&format!("{}/{name}", self.root))
            .await?;
        let carried: HashSet<&str> = bundle.files.iter().map(|f| f.name.as_str()).collect();
        for file in &bundle.files {
            let content = STANDARD
                .decode(&file.content)
                .map_err(|e| SyncError::Encoding {
                    path: self.file_path(name, &file.name),
                    reason: e.to_string(),
                })?;
            self.vault
                .write_binary(&self.file_path(name, &file.name), &content, file.mtime)
                .await?;
        }
        for file in PLUGIN_FILES {
            if !carried.contains(file) {
                self.vault.remove(&self.file_path(name, file)).await?;
            }
        }

        info!(plugin = %name, files = bundle.files.len(), "plugin bundle applied");
        self.state().insert(name.to_string(), bundle.mtime());
        Ok(1)
    }

    async fn remove_plugin(&self, name: &str) -> SyncResult<usize> {
        for file in PLUGIN_FILES {
            self.vault.remove(&self.file_path(name, file)).await?;
        }
        self.state().remove(name);
        info!(plugin = %name, "plugin deleted on another device, removed");
        Ok(1)
    }
}
