//! SQLite-backed local document store.
//!
//! Revision rows are the persistent form of the in-memory revision tree:
//! one row per `(doc, rev)` with a parent pointer and the serialized
//! entry payload. Operations load a document's rows into a `RevTree`,
//! decide there, and write the delta back, so the MVCC semantics are
//! shared with the in-memory store rather than re-derived in SQL.

use crate::error::{StoreError, StoreResult};
use crate::revtree::{next_rev, RevNode, RevTree, RevisionState};
use crate::store::{Change, DocumentStore};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use vaultsync_types::{DocId, Entry, EntryMeta, RevTag};

/// A persistent MVCC document store backed by SQLite.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS revisions (
                doc_id TEXT NOT NULL,
                rev TEXT NOT NULL,
                parent TEXT,
                payload TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (doc_id, rev)
            );

            CREATE INDEX IF NOT EXISTS idx_revisions_doc ON revisions(doc_id);

            CREATE TABLE IF NOT EXISTS changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id TEXT NOT NULL,
                rev TEXT NOT NULL,
                parent TEXT,
                deleted INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load_doc(
        conn: &Connection,
        id: &DocId,
    ) -> StoreResult<(RevTree, HashMap<RevTag, Entry>)> {
        let mut stmt =
            conn.prepare("SELECT rev, parent, payload, deleted FROM revisions WHERE doc_id = ?1")?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            let rev: String = row.get(0)?;
            let parent: Option<String> = row.get(1)?;
            let payload: String = row.get(2)?;
            let deleted: bool = row.get(3)?;
            Ok((rev, parent, payload, deleted))
        })?;

        let mut tree = RevTree::new();
        let mut payloads = HashMap::new();
        for row in rows {
            let (rev, parent, payload, deleted) = row?;
            let rev = RevTag::parse(&rev)?;
            let parent = parent.as_deref().map(RevTag::parse).transpose()?;
            tree.insert(RevNode {
                rev: rev.clone(),
                parent,
                deleted,
            });
            if !payload.is_empty() {
                payloads.insert(rev, serde_json::from_str(&payload)?);
            }
        }
        Ok((tree, payloads))
    }

    fn winner_entry(
        tree: &RevTree,
        payloads: &HashMap<RevTag, Entry>,
    ) -> Option<Entry> {
        tree.winner().and_then(|w| payloads.get(&w).cloned())
    }

    fn insert_revision(
        conn: &Connection,
        entry: &Entry,
        rev: &RevTag,
        parent: Option<&RevTag>,
    ) -> StoreResult<()> {
        let payload = serde_json::to_string(entry)?;
        conn.execute(
            "INSERT OR IGNORE INTO revisions (doc_id, rev, parent, payload, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id.as_str(),
                rev.as_str(),
                parent.map(|p| p.as_str()),
                payload,
                entry.is_deleted(),
            ],
        )?;
        conn.execute(
            "INSERT INTO changes (doc_id, rev, parent, deleted) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.id.as_str(),
                rev.as_str(),
                parent.map(|p| p.as_str()),
                entry.is_deleted(),
            ],
        )?;
        Ok(())
    }

    /// The revision tree of a document (resolver support).
    pub fn tree_of(&self, id: &DocId) -> StoreResult<RevTree> {
        let conn = self.lock();
        Ok(Self::load_doc(&conn, id)?.0)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, id: &DocId, rev: Option<&RevTag>) -> StoreResult<Entry> {
        let conn = self.lock();
        let (tree, payloads) = Self::load_doc(&conn, id)?;
        match rev {
            Some(rev) => payloads
                .get(rev)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.clone())),
            None => Self::winner_entry(&tree, &payloads)
                .filter(|e| !e.is_deleted())
                .ok_or_else(|| StoreError::NotFound(id.clone())),
        }
    }

    async fn get_meta(&self, id: &DocId) -> StoreResult<EntryMeta> {
        let conn = self.lock();
        let (tree, payloads) = Self::load_doc(&conn, id)?;
        Self::winner_entry(&tree, &payloads)
            .map(|e| EntryMeta::from(&e))
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn revision_state(&self, id: &DocId) -> StoreResult<RevisionState> {
        let conn = self.lock();
        let (tree, _) = Self::load_doc(&conn, id)?;
        Ok(tree.state())
    }

    async fn put(&self, entry: &Entry, parent: Option<&RevTag>) -> StoreResult<RevTag> {
        let rev = next_rev(entry, parent);
        let conn = self.lock();
        Self::insert_revision(&conn, entry, &rev, parent)?;
        Ok(rev)
    }

    async fn force_put(
        &self,
        entry: &Entry,
        rev: &RevTag,
        parent: Option<&RevTag>,
    ) -> StoreResult<()> {
        let conn = self.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM revisions WHERE doc_id = ?1 AND rev = ?2",
                params![entry.id.as_str(), rev.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Ok(());
        }
        Self::insert_revision(&conn, entry, rev, parent)?;
        Ok(())
    }

    async fn remove(&self, id: &DocId, rev: &RevTag) -> StoreResult<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE revisions SET deleted = 1 WHERE doc_id = ?1 AND rev = ?2",
            params![id.as_str(), rev.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        conn.execute(
            "INSERT INTO changes (doc_id, rev, parent, deleted) VALUES (?1, ?2, NULL, 1)",
            params![id.as_str(), rev.as_str()],
        )?;
        Ok(())
    }

    async fn all_in_range(&self, start: &str, end: &str) -> StoreResult<Vec<Entry>> {
        let ids: Vec<DocId> = {
            let conn = self.lock();
            let mut stmt = conn.prepare(
                "SELECT DISTINCT doc_id FROM revisions WHERE doc_id >= ?1 AND doc_id < ?2
                 ORDER BY doc_id",
            )?;
            let rows = stmt.query_map(params![start, end], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<String>, _>>()?
                .into_iter()
                .map(DocId::new)
                .collect()
        };

        let mut out = Vec::new();
        for id in ids {
            let conn = self.lock();
            let (tree, payloads) = Self::load_doc(&conn, &id)?;
            if let Some(entry) = Self::winner_entry(&tree, &payloads) {
                if !entry.is_deleted() {
                    out.push(entry);
                }
            }
        }
        Ok(out)
    }

    async fn changes_since(&self, seq: u64) -> StoreResult<Vec<Change>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT seq, doc_id, rev, parent, deleted FROM changes WHERE seq > ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![seq as i64], |row| {
            let seq: i64 = row.get(0)?;
            let id: String = row.get(1)?;
            let rev: String = row.get(2)?;
            let parent: Option<String> = row.get(3)?;
            let deleted: bool = row.get(4)?;
            Ok((seq, id, rev, parent, deleted))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, id, rev, parent, deleted) = row?;
            out.push(Change {
                seq: seq as u64,
                id: DocId::new(id),
                rev: RevTag::parse(&rev)?,
                parent: parent.as_deref().map(RevTag::parse).transpose()?,
                deleted,
            });
        }
        Ok(out)
    }

    async fn last_seq(&self) -> StoreResult<u64> {
        let conn = self.lock();
        let seq: Option<i64> =
            conn.query_row("SELECT MAX(seq) FROM changes", [], |row| row.get(0))?;
        Ok(seq.unwrap_or(0) as u64)
    }

    async fn bulk_get(&self, ids: &[DocId]) -> StoreResult<Vec<Entry>> {
        let mut out = Vec::new();
        for id in ids {
            match self.get(id, None).await {
                Ok(entry) => out.push(entry),
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    async fn bulk_put(&self, docs: &[(Entry, RevTag, Option<RevTag>)]) -> StoreResult<()> {
        for (entry, rev, parent) in docs {
            self.force_put(entry, rev, parent.as_ref()).await?;
        }
        Ok(())
    }

    async fn common_ancestor(
        &self,
        id: &DocId,
        a: &RevTag,
        b: &RevTag,
    ) -> StoreResult<Option<RevTag>> {
        let tree = self.tree_of(id)?;
        Ok(tree.common_ancestor(a, b))
    }

    async fn purge(&self, id: &DocId, rev: &RevTag) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM revisions WHERE doc_id = ?1 AND rev = ?2",
            params![id.as_str(), rev.as_str()],
        )?;
        Ok(())
    }

    async fn compact(&self) -> StoreResult<()> {
        let conn = self.lock();
        // Drop payloads of superseded revisions; keep the tree metadata so
        // ancestry queries still work.
        conn.execute(
            "UPDATE revisions SET payload = ''
             WHERE EXISTS (
                 SELECT 1 FROM revisions AS child
                 WHERE child.doc_id = revisions.doc_id AND child.parent = revisions.rev
             )",
            [],
        )?;
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}
