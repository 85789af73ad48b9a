//! End-to-end replication between two engines sharing one remote.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::{Arc, Mutex};
use vaultsync_chunks::chunk_id;
use vaultsync_store::{DocumentStore, MemoryStore, Milestone, StoreError};
use vaultsync_sync::{
    ConflictChoice, ConflictDiff, ConflictUi, Orchestrator, SilentUi, SyncError,
};
use vaultsync_types::{DocId, Entry, SyncSettings};

fn stores() -> (Arc<dyn DocumentStore>, Arc<dyn DocumentStore>) {
    (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
}

fn engine(
    local: Arc<dyn DocumentStore>,
    remote: Arc<dyn DocumentStore>,
    settings: SyncSettings,
) -> Orchestrator {
    Orchestrator::new(local, remote, settings, Arc::new(SilentUi))
}

/// Records notices and answers every confirmation the same way.
struct NoticeCounter {
    answer: Option<usize>,
    notices: Mutex<Vec<String>>,
}

impl NoticeCounter {
    fn declining() -> Arc<Self> {
        Arc::new(Self {
            answer: None,
            notices: Mutex::new(Vec::new()),
        })
    }

    fn answering(choice: usize) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(choice),
            notices: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ConflictUi for NoticeCounter {
    async fn show_conflict_diff(&self, _: &str, _: &ConflictDiff) -> Option<ConflictChoice> {
        None
    }

    async fn confirm(&self, _: &str, _: &[&str]) -> Option<usize> {
        self.answer
    }

    async fn notify(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}

#[tokio::test]
async fn a_file_travels_between_devices() {
    let (local_a, shared) = stores();
    let (local_b, _) = stores();

    let a = engine(local_a, shared.clone(), SyncSettings::default());
    let b = engine(local_b, shared.clone(), SyncSettings::default());

    a.store_file("notes/a.md", b"hello from a", 100).await.unwrap();
    let up = a.sync_cycle().await.unwrap();
    assert!(up.pushed >= 1);

    let down = b.sync_cycle().await.unwrap();
    assert!(down.pulled >= 1);
    assert_eq!(b.open_file("notes/a.md").await.unwrap(), b"hello from a");

    // And the other direction over the same remote.
    b.store_file("notes/b.md", b"hello from b", 200).await.unwrap();
    b.sync_cycle().await.unwrap();
    a.sync_cycle().await.unwrap();
    assert_eq!(a.open_file("notes/b.md").await.unwrap(), b"hello from b");
}

#[tokio::test]
async fn chunked_binary_content_replicates() {
    let (local_a, shared) = stores();
    let (local_b, _) = stores();
    let settings = SyncSettings {
        custom_chunk_size: 4 * 1024,
        ..Default::default()
    };

    let a = engine(local_a, shared.clone(), settings.clone());
    let b = engine(local_b, shared.clone(), settings);

    // Invalid UTF-8 forces the binary path.
    let content: Vec<u8> = (0..40_000u32).map(|i| (i % 256) as u8).collect();
    a.store_file("assets/img.png", &content, 100).await.unwrap();
    a.sync_cycle().await.unwrap();

    let report = b.sync_cycle().await.unwrap();
    assert_eq!(report.pending, 0);
    assert_eq!(b.open_file("assets/img.png").await.unwrap(), content);
}

#[tokio::test]
async fn deletion_propagates() {
    let (local_a, shared) = stores();
    let (local_b, _) = stores();

    let a = engine(local_a, shared.clone(), SyncSettings::default());
    let b = engine(local_b, shared.clone(), SyncSettings::default());

    a.store_file("notes/tmp.md", b"short lived", 100).await.unwrap();
    a.sync_cycle().await.unwrap();
    b.sync_cycle().await.unwrap();
    assert!(b.open_file("notes/tmp.md").await.is_ok());

    a.delete_file("notes/tmp.md").await.unwrap();
    a.sync_cycle().await.unwrap();
    b.sync_cycle().await.unwrap();

    match b.open_file("notes/tmp.md").await {
        Err(SyncError::Store(StoreError::NotFound(_))) => {}
        other => panic!("expected the file gone, got {other:?}"),
    }
}

#[tokio::test]
async fn schema_mismatch_halts_the_session() {
    let (local, shared) = stores();
    let stale = Milestone { accepted_version: 1 };
    shared.put(&stale.to_entry().unwrap(), None).await.unwrap();

    let engine = engine(local, shared, SyncSettings::default());
    let err = engine.startup().await.unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
    assert!(matches!(err, SyncError::VersionMismatch { remote: 1, .. }));
}

#[tokio::test]
async fn fresh_remote_receives_a_version_marker() {
    let (local, shared) = stores();
    let engine = engine(local, shared.clone(), SyncSettings::default());
    engine.startup().await.unwrap();

    let entry = shared
        .get(&DocId::new("x:milestone"), None)
        .await
        .unwrap();
    assert_eq!(Milestone::from_entry(&entry).unwrap(), Milestone::current());
}

#[tokio::test]
async fn entry_arriving_before_its_chunks_waits_then_applies() {
    let (local_b, shared) = stores();
    let b = engine(local_b, shared.clone(), SyncSettings::default());

    // The entry lands on the remote first, its chunk later.
    let bytes = b"chunk payload that the entry already references".to_vec();
    let cid = chunk_id(&bytes);
    let entry = Entry::note(
        DocId::new("notes/late.md"),
        "notes/late.md",
        vec![cid.clone()],
        bytes.len() as u64,
    );
    shared.put(&entry, None).await.unwrap();

    let report = b.sync_cycle().await.unwrap();
    assert_eq!(report.pending, 1);
    assert!(b.open_file("notes/late.md").await.is_err());

    let chunk_doc = Entry::plain(cid.doc_id(), cid.doc_id().as_str(), STANDARD.encode(&bytes));
    shared.put(&chunk_doc, None).await.unwrap();

    let report = b.sync_cycle().await.unwrap();
    assert_eq!(report.pending, 0);
    assert_eq!(b.open_file("notes/late.md").await.unwrap(), bytes);
}

#[tokio::test]
async fn queued_wait_survives_a_restart() {
    let (local_b, shared) = stores();

    let bytes = b"payload behind a slow chunk".to_vec();
    let cid = chunk_id(&bytes);
    let entry = Entry::note(
        DocId::new("notes/slow.md"),
        "notes/slow.md",
        vec![cid.clone()],
        bytes.len() as u64,
    );
    shared.put(&entry, None).await.unwrap();

    {
        let b = engine(local_b.clone(), shared.clone(), SyncSettings::default());
        b.startup().await.unwrap();
        assert_eq!(b.sync_cycle().await.unwrap().pending, 1);
    }

    // The chunk arrives while the engine is down.
    let chunk_doc = Entry::plain(cid.doc_id(), cid.doc_id().as_str(), STANDARD.encode(&bytes));
    shared.put(&chunk_doc, None).await.unwrap();

    let b = engine(local_b, shared, SyncSettings::default());
    b.startup().await.unwrap();
    b.sync_cycle().await.unwrap();
    assert_eq!(b.open_file("notes/slow.md").await.unwrap(), bytes);
}

#[tokio::test]
async fn oversized_files_are_skipped_visibly_not_lost() {
    let (local_a, shared) = stores();
    let settings = SyncSettings {
        sync_max_size_in_mb: 1,
        custom_chunk_size: 64 * 1024,
        ..Default::default()
    };
    let ui = NoticeCounter::declining();
    let a = Orchestrator::new(local_a, shared.clone(), settings, ui.clone());

    let big = vec![b'x'; 2 * 1024 * 1024];
    a.store_file("notes/huge.md", &big, 100).await.unwrap();
    a.sync_cycle().await.unwrap();
    a.sync_cycle().await.unwrap();

    // Never pushed, still intact locally, reported to the user once.
    assert!(matches!(
        shared.get(&DocId::new("notes/huge.md"), None).await,
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(a.open_file("notes/huge.md").await.unwrap(), big);
    assert_eq!(ui.notices.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn oversized_file_ships_when_the_user_syncs_anyway() {
    let (local_a, shared) = stores();
    let settings = SyncSettings {
        sync_max_size_in_mb: 1,
        custom_chunk_size: 64 * 1024,
        ..Default::default()
    };
    // "Sync anyway" is the second choice offered.
    let ui = NoticeCounter::answering(1);
    let a = Orchestrator::new(local_a, shared.clone(), settings, ui.clone());

    let big = vec![b'x'; 2 * 1024 * 1024];
    a.store_file("notes/huge.md", &big, 100).await.unwrap();
    a.sync_cycle().await.unwrap();

    assert!(shared.get(&DocId::new("notes/huge.md"), None).await.is_ok());
    assert!(ui.notices.lock().unwrap().is_empty());
}

#[tokio::test]
async fn oversized_remote_files_are_not_materialized_locally() {
    let (local_b, shared) = stores();
    let settings = SyncSettings {
        sync_max_size_in_mb: 1,
        ..Default::default()
    };
    let ui = NoticeCounter::declining();
    let b = Orchestrator::new(local_b, shared.clone(), settings, ui.clone());

    let big = "y".repeat(2 * 1024 * 1024);
    let entry = Entry::plain(DocId::new("notes/huge.md"), "notes/huge.md", big);
    shared.put(&entry, None).await.unwrap();

    b.sync_cycle().await.unwrap();
    b.sync_cycle().await.unwrap();

    // The cap holds on the way in too, with a single visible notice.
    match b.open_file("notes/huge.md").await {
        Err(SyncError::Store(StoreError::NotFound(_))) => {}
        other => panic!("expected the oversized file skipped, got {other:?}"),
    }
    assert_eq!(ui.notices.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn encrypted_vaults_never_replicate_plaintext() {
    let (local_a, shared) = stores();
    let (local_b, _) = stores();
    let settings = SyncSettings {
        encrypt: true,
        passphrase: "hunter2".into(),
        ..Default::default()
    };

    let a = engine(local_a, shared.clone(), settings.clone());
    let b = engine(local_b, shared.clone(), settings);

    a.store_file("notes/secret.md", b"TOP SECRET CONTENTS", 100)
        .await
        .unwrap();
    a.sync_cycle().await.unwrap();

    // Even a small text file replicates chunked; no remote document
    // carries the plaintext.
    let entry = shared
        .get(&DocId::new("notes/secret.md"), None)
        .await
        .unwrap();
    assert!(!entry.children().is_empty(), "payload must be chunked");
    let wire = serde_json::to_string(&entry).unwrap();
    assert!(!wire.contains("TOP SECRET"), "{wire}");
    for chunk in entry.children() {
        let stored = shared.get(&chunk.doc_id(), None).await.unwrap();
        let wire = serde_json::to_string(&stored).unwrap();
        assert!(!wire.contains(&STANDARD.encode(b"TOP SECRET CONTENTS")), "{wire}");
    }

    // A second device with the passphrase still reads the content.
    b.sync_cycle().await.unwrap();
    assert_eq!(
        b.open_file("notes/secret.md").await.unwrap(),
        b"TOP SECRET CONTENTS"
    );
}

#[tokio::test]
async fn concurrent_edits_surface_as_a_conflict_and_resolve() {
    let (local_a, shared) = stores();
    let (local_b, _) = stores();
    let newer_wins = SyncSettings {
        resolve_conflicts_by_newer_file: true,
        ..Default::default()
    };

    let a = engine(local_a, shared.clone(), newer_wins.clone());
    let b = engine(local_b, shared.clone(), newer_wins);

    a.store_file("notes/shared.md", b"origin", 100).await.unwrap();
    a.sync_cycle().await.unwrap();
    b.sync_cycle().await.unwrap();

    // Both devices edit the same file before syncing again.
    a.store_file("notes/shared.md", b"edit from a", 200).await.unwrap();
    b.store_file("notes/shared.md", b"edit from b", 300).await.unwrap();
    a.sync_cycle().await.unwrap();
    b.sync_cycle().await.unwrap();
    a.sync_cycle().await.unwrap();

    // Newer-wins picked b's edit on both sides.
    assert_eq!(a.open_file("notes/shared.md").await.unwrap(), b"edit from b");
    assert_eq!(b.open_file("notes/shared.md").await.unwrap(), b"edit from b");
}
