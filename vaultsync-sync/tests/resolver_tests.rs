//! Conflict resolution ladder, exercised against the in-memory store.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use vaultsync_store::{DocumentStore, MemoryStore, RevisionState};
use vaultsync_sync::{
    ConflictChoice, ConflictDiff, ConflictPhase, ConflictResolver, ConflictUi, DiffLine,
    SilentUi,
};
use vaultsync_types::{ChunkId, DocId, Entry, EntryPayload, PlainBody, RevTag, SyncSettings};

fn store() -> Arc<dyn DocumentStore> {
    Arc::new(MemoryStore::new())
}

fn entry_at(id: &str, text: &str, mtime: i64) -> Entry {
    Entry::plain(DocId::new(id), id, text).with_times(mtime, mtime)
}

/// Seeds a two-leaf conflict and returns (doc id, left rev, right rev).
async fn conflict(
    store: &Arc<dyn DocumentStore>,
    base: &str,
    left: (&str, i64),
    right: (&str, i64),
) -> (DocId, RevTag, RevTag) {
    let id = DocId::new("notes/n.md");
    let root = store.put(&entry_at("notes/n.md", base, 10), None).await.unwrap();
    let l = store
        .put(&entry_at("notes/n.md", left.0, left.1), Some(&root))
        .await
        .unwrap();
    let r = store
        .put(&entry_at("notes/n.md", right.0, right.1), Some(&root))
        .await
        .unwrap();
    (id, l, r)
}

fn inline(entry: &Entry) -> &str {
    match &entry.payload {
        EntryPayload::Plain {
            body: PlainBody::Inline { data },
        } => data,
        other => panic!("expected inline payload, got {other:?}"),
    }
}

/// A `ConflictUi` that records what it was shown and always answers the
/// same thing.
struct ScriptedUi {
    answer: Option<ConflictChoice>,
    shown: Mutex<Vec<ConflictDiff>>,
    notices: Mutex<Vec<String>>,
}

impl ScriptedUi {
    fn answering(answer: Option<ConflictChoice>) -> Arc<Self> {
        Arc::new(Self {
            answer,
            shown: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ConflictUi for ScriptedUi {
    async fn show_conflict_diff(&self, _path: &str, diff: &ConflictDiff) -> Option<ConflictChoice> {
        self.shown.lock().unwrap().push(diff.clone());
        self.answer
    }

    async fn confirm(&self, _message: &str, _choices: &[&str]) -> Option<usize> {
        None
    }

    async fn notify(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}

#[tokio::test]
async fn identical_content_keeps_newer_leaf() {
    let store = store();
    let (id, newer, older) = conflict(&store, "base", ("same", 200), ("same", 100)).await;

    let resolver = ConflictResolver::new(store.clone(), SyncSettings::default(), Arc::new(SilentUi));
    let phase = resolver.resolve(&id).await.unwrap();

    assert_eq!(phase, ConflictPhase::AutoResolved);
    assert_eq!(
        store.revision_state(&id).await.unwrap(),
        RevisionState::Single(newer)
    );
    assert_ne!(
        store.revision_state(&id).await.unwrap(),
        RevisionState::Single(older)
    );
}

#[tokio::test]
async fn newer_file_policy_resolves_without_asking() {
    let store = store();
    let (id, newer, _) = conflict(&store, "base", ("new text", 500), ("old text", 100)).await;

    let settings = SyncSettings {
        resolve_conflicts_by_newer_file: true,
        ..Default::default()
    };
    let ui = ScriptedUi::answering(None);
    let resolver = ConflictResolver::new(store.clone(), settings, ui.clone());

    assert_eq!(resolver.resolve(&id).await.unwrap(), ConflictPhase::AutoResolved);
    assert_eq!(
        store.revision_state(&id).await.unwrap(),
        RevisionState::Single(newer)
    );
    assert_eq!(inline(&store.get(&id, None).await.unwrap()), "new text");
    // The user was informed but never asked.
    assert!(ui.shown.lock().unwrap().is_empty());
    assert_eq!(ui.notices.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn disjoint_json_edits_merge_structurally() {
    let store = store();
    let (id, _, _) = conflict(
        &store,
        r#"{"title":"t","count":1}"#,
        (r#"{"title":"renamed","count":1}"#, 200),
        (r#"{"title":"t","count":7}"#, 100),
    )
    .await;

    let resolver = ConflictResolver::new(store.clone(), SyncSettings::default(), Arc::new(SilentUi));
    assert_eq!(resolver.resolve(&id).await.unwrap(), ConflictPhase::AutoResolved);

    assert!(matches!(
        store.revision_state(&id).await.unwrap(),
        RevisionState::Single(_)
    ));
    let merged: serde_json::Value =
        serde_json::from_str(inline(&store.get(&id, None).await.unwrap())).unwrap();
    assert_eq!(merged["title"], "renamed");
    assert_eq!(merged["count"], 7);
}

#[tokio::test]
async fn overlapping_json_edits_escalate() {
    let store = store();
    let (id, _, _) = conflict(
        &store,
        r#"{"count":1}"#,
        (r#"{"count":2}"#, 200),
        (r#"{"count":3}"#, 100),
    )
    .await;

    let ui = ScriptedUi::answering(Some(ConflictChoice::KeepLeft));
    let resolver = ConflictResolver::new(store.clone(), SyncSettings::default(), ui.clone());

    assert_eq!(resolver.resolve(&id).await.unwrap(), ConflictPhase::Escalated);
    assert_eq!(ui.shown.lock().unwrap().len(), 1);
    assert!(matches!(
        store.revision_state(&id).await.unwrap(),
        RevisionState::Single(_)
    ));
}

#[tokio::test]
async fn concatenate_both_yields_one_revision_with_both_texts() {
    let store = store();
    let (id, _, _) = conflict(&store, "base", ("hello", 200), ("world", 100)).await;

    let ui = ScriptedUi::answering(Some(ConflictChoice::ConcatenateBoth));
    let resolver = ConflictResolver::new(store.clone(), SyncSettings::default(), ui.clone());

    assert_eq!(resolver.resolve(&id).await.unwrap(), ConflictPhase::Escalated);
    assert!(matches!(
        store.revision_state(&id).await.unwrap(),
        RevisionState::Single(_)
    ));

    let text = inline(&store.get(&id, None).await.unwrap()).to_string();
    assert!(text.contains("hello") && text.contains("world"), "{text}");

    // The user saw a line diff carrying both versions (side order
    // follows leaf order, which is not fixed for sibling leaves).
    let shown = ui.shown.lock().unwrap();
    match &shown[0] {
        ConflictDiff::Text(lines) => {
            let mut sides: Vec<&str> = lines
                .iter()
                .map(|l| match l {
                    DiffLine::Left(s) | DiffLine::Right(s) => s.as_str(),
                    DiffLine::Context(s) => s.as_str(),
                })
                .collect();
            sides.sort();
            assert_eq!(sides, vec!["hello", "world"]);
        }
        other => panic!("expected text diff, got {other:?}"),
    }
}

#[tokio::test]
async fn postponement_leaves_the_conflict_in_the_tree() {
    let store = store();
    let (id, _, _) = conflict(&store, "base", ("hello", 200), ("world", 100)).await;

    let resolver = ConflictResolver::new(store.clone(), SyncSettings::default(), Arc::new(SilentUi));
    assert_eq!(resolver.resolve(&id).await.unwrap(), ConflictPhase::Escalated);

    match store.revision_state(&id).await.unwrap() {
        RevisionState::Conflicted(leaves) => assert_eq!(leaves.len(), 2),
        other => panic!("conflict should persist, got {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_leaf_is_dropped() {
    let store = store();
    let id = DocId::new("notes/n.md");
    let root = store.put(&entry_at("notes/n.md", "base", 10), None).await.unwrap();
    let good = store
        .put(&entry_at("notes/n.md", "kept", 100), Some(&root))
        .await
        .unwrap();
    // A chunked leaf whose chunks never arrived.
    let broken = Entry::note(
        id.clone(),
        "notes/n.md",
        vec![ChunkId::new("0000000000000000")],
        999,
    )
    .with_times(500, 10);
    store.put(&broken, Some(&root)).await.unwrap();

    let resolver = ConflictResolver::new(store.clone(), SyncSettings::default(), Arc::new(SilentUi));
    assert_eq!(resolver.resolve(&id).await.unwrap(), ConflictPhase::AutoResolved);
    assert_eq!(
        store.revision_state(&id).await.unwrap(),
        RevisionState::Single(good)
    );
}

#[tokio::test]
async fn resolution_is_deterministic_across_replicas() {
    // Two stores land the same leaves in opposite orders; both must keep
    // the same revision.
    let (a, b) = (store(), store());
    let mut survivors = Vec::new();

    for store in [&a, &b] {
        let id = DocId::new("n.md");
        let e1 = entry_at("n.md", "one", 100);
        let e2 = entry_at("n.md", "two", 100);
        let r1 = vaultsync_store::next_rev(&e1, None);
        let r2 = vaultsync_store::next_rev(&e2, None);
        if std::ptr::eq(store, &a) {
            store.force_put(&e1, &r1, None).await.unwrap();
            store.force_put(&e2, &r2, None).await.unwrap();
        } else {
            store.force_put(&e2, &r2, None).await.unwrap();
            store.force_put(&e1, &r1, None).await.unwrap();
        }

        let settings = SyncSettings {
            resolve_conflicts_by_newer_file: true,
            ..Default::default()
        };
        let resolver = ConflictResolver::new(store.clone(), settings, Arc::new(SilentUi));
        resolver.resolve(&id).await.unwrap();
        match store.revision_state(&id).await.unwrap() {
            RevisionState::Single(rev) => survivors.push(rev),
            other => panic!("expected resolution, got {other:?}"),
        }
    }

    assert_eq!(survivors[0], survivors[1]);
}
