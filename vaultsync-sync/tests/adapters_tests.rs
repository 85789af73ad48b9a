//! Hidden-file and plugin-bundle sweeps over the in-memory vault.

use std::sync::Arc;
use vaultsync_store::{DocumentStore, MemoryStore};
use vaultsync_sync::adapters::{
    HiddenFileSync, MemoryVault, PluginBundleSync, StorageAdapter,
};
use vaultsync_sync::{KeyedLocks, LockKey};

fn store() -> Arc<dyn DocumentStore> {
    Arc::new(MemoryStore::new())
}

fn hidden(store: &Arc<dyn DocumentStore>, vault: &Arc<MemoryVault>) -> HiddenFileSync {
    hidden_with(store, vault, Arc::new(KeyedLocks::new()))
}

fn hidden_with(
    store: &Arc<dyn DocumentStore>,
    vault: &Arc<MemoryVault>,
    locks: Arc<KeyedLocks>,
) -> HiddenFileSync {
    HiddenFileSync::new(
        store.clone(),
        vault.clone() as Arc<dyn StorageAdapter>,
        locks,
        vec![".config/app.json".to_string(), ".config/hotkeys.json".to_string()],
    )
}

fn plugins(store: &Arc<dyn DocumentStore>, vault: &Arc<MemoryVault>) -> PluginBundleSync {
    PluginBundleSync::new(
        store.clone(),
        vault.clone() as Arc<dyn StorageAdapter>,
        Arc::new(KeyedLocks::new()),
        "plugins",
    )
}

#[tokio::test]
async fn hidden_file_travels_between_vaults() {
    let store = store();
    let (v1, v2) = (Arc::new(MemoryVault::new()), Arc::new(MemoryVault::new()));
    v1.seed(".config/app.json", br#"{"theme":"dark"}"#, 100);

    let (h1, h2) = (hidden(&store, &v1), hidden(&store, &v2));
    assert_eq!(h1.push_sweep().await.unwrap(), 1);
    assert_eq!(h2.pull_sweep().await.unwrap(), 1);

    assert_eq!(
        v2.read_binary(".config/app.json").await.unwrap(),
        br#"{"theme":"dark"}"#
    );
    // Nothing changed: both sweeps are no-ops now.
    assert_eq!(h1.push_sweep().await.unwrap(), 0);
    assert_eq!(h2.pull_sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn local_newer_copy_is_not_clobbered() {
    let store = store();
    let (v1, v2) = (Arc::new(MemoryVault::new()), Arc::new(MemoryVault::new()));
    v1.seed(".config/app.json", b"old remote", 100);
    v2.seed(".config/app.json", b"newer local", 200);

    let (h1, h2) = (hidden(&store, &v1), hidden(&store, &v2));
    h1.push_sweep().await.unwrap();
    assert_eq!(h2.pull_sweep().await.unwrap(), 0);
    assert_eq!(
        v2.read_binary(".config/app.json").await.unwrap(),
        b"newer local"
    );
}

#[tokio::test]
async fn hidden_file_deletion_propagates() {
    let store = store();
    let (v1, v2) = (Arc::new(MemoryVault::new()), Arc::new(MemoryVault::new()));
    v1.seed(".config/app.json", b"settings", 100);

    let (h1, h2) = (hidden(&store, &v1), hidden(&store, &v2));
    h1.push_sweep().await.unwrap();
    h2.pull_sweep().await.unwrap();
    assert!(v2.exists(".config/app.json").await.unwrap());

    v1.remove(".config/app.json").await.unwrap();
    assert_eq!(h1.push_sweep().await.unwrap(), 1);
    assert_eq!(h2.pull_sweep().await.unwrap(), 1);
    assert!(!v2.exists(".config/app.json").await.unwrap());
}

#[tokio::test]
async fn unwatched_files_are_ignored() {
    let store = store();
    let v1 = Arc::new(MemoryVault::new());
    v1.seed(".config/unrelated.bin", b"noise", 100);

    let h1 = hidden(&store, &v1);
    assert_eq!(h1.push_sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn busy_bundle_is_skipped_by_the_sweep() {
    let store = store();
    let v1 = Arc::new(MemoryVault::new());
    v1.seed(".config/app.json", b"settings", 100);

    let locks = Arc::new(KeyedLocks::new());
    let h1 = hidden_with(&store, &v1, locks.clone());

    // While the bundle lock is held elsewhere, the sweep passes over
    // the file instead of waiting.
    let held = locks.acquire(&LockKey::bundle(".config/app.json")).await;
    assert_eq!(h1.push_sweep().await.unwrap(), 0);

    drop(held);
    assert_eq!(h1.push_sweep().await.unwrap(), 1);
}

#[tokio::test]
async fn listing_splits_files_from_folders() {
    let vault = MemoryVault::new();
    vault.seed("plugins/calendar/manifest.json", b"{}", 100);
    vault.seed("plugins/tasks/main.js", b"code", 100);
    vault.seed("plugins/readme.txt", b"notes", 100);

    let listing = vault.list("plugins").await.unwrap();
    assert_eq!(listing.files, vec!["readme.txt"]);
    assert_eq!(listing.folders, vec!["calendar", "tasks"]);
}

#[tokio::test]
async fn plugin_bundle_travels_whole() {
    let store = store();
    let (v1, v2) = (Arc::new(MemoryVault::new()), Arc::new(MemoryVault::new()));
    v1.seed("plugins/calendar/manifest.json", br#"{"id":"calendar"}"#, 100);
    v1.seed("plugins/calendar/main.js", b"module.exports = {}", 150);

    let (p1, p2) = (plugins(&store, &v1), plugins(&store, &v2));
    assert_eq!(p1.push_sweep().await.unwrap(), 1);
    assert_eq!(p2.pull_sweep().await.unwrap(), 1);

    assert_eq!(
        v2.read_binary("plugins/calendar/manifest.json").await.unwrap(),
        br#"{"id":"calendar"}"#
    );
    assert_eq!(
        v2.read_binary("plugins/calendar/main.js").await.unwrap(),
        b"module.exports = {}"
    );
}

#[tokio::test]
async fn pulled_bundle_replaces_the_directory_atomically() {
    let store = store();
    let (v1, v2) = (Arc::new(MemoryVault::new()), Arc::new(MemoryVault::new()));
    v1.seed("plugins/calendar/manifest.json", b"{}", 100);
    v1.seed("plugins/calendar/main.js", b"v1", 100);
    v1.seed("plugins/calendar/styles.css", b"body {}", 100);

    let (p1, p2) = (plugins(&store, &v1), plugins(&store, &v2));
    p1.push_sweep().await.unwrap();
    p2.pull_sweep().await.unwrap();
    assert!(v2.exists("plugins/calendar/styles.css").await.unwrap());

    // The plugin drops its stylesheet; the pulled bundle must not leave
    // the stale file behind.
    v1.remove("plugins/calendar/styles.css").await.unwrap();
    v1.seed("plugins/calendar/main.js", b"v2", 200);
    assert_eq!(p1.push_sweep().await.unwrap(), 1);
    assert_eq!(p2.pull_sweep().await.unwrap(), 1);

    assert_eq!(v2.read_binary("plugins/calendar/main.js").await.unwrap(), b"v2");
    assert!(!v2.exists("plugins/calendar/styles.css").await.unwrap());
}

#[tokio::test]
async fn plugin_removal_propagates() {
    let store = store();
    let (v1, v2) = (Arc::new(MemoryVault::new()), Arc::new(MemoryVault::new()));
    v1.seed("plugins/calendar/manifest.json", b"{}", 100);
    v1.seed("plugins/calendar/main.js", b"code", 100);

    let (p1, p2) = (plugins(&store, &v1), plugins(&store, &v2));
    p1.push_sweep().await.unwrap();
    p2.pull_sweep().await.unwrap();

    v1.remove("plugins/calendar/manifest.json").await.unwrap();
    v1.remove("plugins/calendar/main.js").await.unwrap();
    assert_eq!(p1.push_sweep().await.unwrap(), 1);
    assert_eq!(p2.pull_sweep().await.unwrap(), 1);

    assert!(!v2.exists("plugins/calendar/manifest.json").await.unwrap());
    assert!(!v2.exists("plugins/calendar/main.js").await.unwrap());
}
