//! Remote document store client.
//!
//! Speaks a CouchDB-flavored revisioned HTTP+JSON protocol: document
//! GET/PUT with revisions, `_bulk_docs`, `_all_docs` range queries, a
//! `_changes` feed, and `_purge`. Any transport implementing this
//! contract can stand in as the remote replica.
//!
//! Before the first replication cycle the version-marker document is
//! checked; a remote speaking a different schema version halts the
//! session rather than risking corruption.

use crate::error::{StoreError, StoreResult};
use crate::revtree::{next_rev, RevisionState};
use crate::store::{Change, DocumentStore, Milestone, MILESTONE_DOC_ID, SCHEMA_VERSION};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use vaultsync_types::{DocId, Entry, EntryMeta, RevTag};

/// Connection settings for a remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the remote, e.g. `https://host:5984`.
    pub base_url: String,
    /// Database name under the base URL.
    pub database: String,
    /// Optional basic-auth credentials.
    pub username: Option<String>,
    pub password: Option<String>,
}

/// HTTP client implementing the `DocumentStore` contract.
pub struct RemoteStore {
    config: RemoteConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    results: Vec<ChangeRow>,
}

#[derive(Debug, Deserialize)]
struct ChangeRow {
    seq: Value,
    id: String,
    changes: Vec<ChangeRev>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct ChangeRev {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    #[serde(default)]
    doc: Option<Value>,
}

impl RemoteStore {
    /// Creates a client for the given remote.
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn doc_url(&self, id: &DocId) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.database,
            percent_encode(id.as_str())
        )
    }

    fn db_url(&self, suffix: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.database,
            suffix
        )
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.config.username, &self.config.password) {
            (Some(user), pass) => builder.basic_auth(user, pass.as_deref()),
            _ => builder,
        }
    }

    /// Verifies the remote speaks our schema version, creating the marker
    /// on a fresh remote. Mismatch is fatal for the session.
    pub async fn check_version(&self) -> StoreResult<()> {
        let id = DocId::new(MILESTONE_DOC_ID);
        match self.get(&id, None).await {
            Ok(entry) => {
                let marker = Milestone::from_entry(&entry)?;
                if marker.accepted_version != SCHEMA_VERSION {
                    return Err(StoreError::VersionMismatch {
                        local: SCHEMA_VERSION,
                        remote: marker.accepted_version,
                    });
                }
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                debug!("remote has no version marker, writing ours");
                let entry = Milestone::current().to_entry()?;
                self.put(&entry, None).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn entry_to_wire(entry: &Entry, rev: Option<&RevTag>) -> StoreResult<Value> {
        let mut doc = serde_json::to_value(entry)?;
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| StoreError::Protocol("entry did not serialize to object".into()))?;
        obj.insert("_id".into(), Value::String(entry.id.to_string()));
        if let Some(rev) = rev {
            obj.insert("_rev".into(), Value::String(rev.to_string()));
        }
        if entry.is_deleted() {
            obj.insert("_deleted".into(), Value::Bool(true));
        }
        Ok(doc)
    }

    fn entry_from_wire(doc: Value) -> StoreResult<Entry> {
        let mut doc = doc;
        if let Some(obj) = doc.as_object_mut() {
            obj.remove("_rev");
            obj.remove("_parent");
            obj.remove("_deleted");
            if let Some(id) = obj.remove("_id") {
                obj.entry("id").or_insert(id);
            }
        }
        Ok(serde_json::from_value(doc)?)
    }

    fn rev_from_wire(doc: &Value) -> StoreResult<RevTag> {
        let rev = doc
            .get("_rev")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Protocol("document without _rev".into()))?;
        Ok(RevTag::parse(rev)?)
    }

    async fn fetch_doc(&self, id: &DocId, rev: Option<&RevTag>) -> StoreResult<Value> {
        let mut builder = self.client.get(self.doc_url(id));
        if let Some(rev) = rev {
            builder = builder.query(&[("rev", rev.as_str())]);
        }
        let response = self.request(builder).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(id.clone())),
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::PAYLOAD_TOO_LARGE => Err(StoreError::PayloadTooLarge(id.clone())),
            status => Err(StoreError::Protocol(format!("get failed with {status}"))),
        }
    }
}

fn percent_encode(id: &str) -> String {
    // Only the characters that matter for our ID alphabet.
    id.replace('%', "%25").replace(':', "%3A").replace('/', "%2F")
}

fn parse_seq(seq: &Value) -> u64 {
    match seq {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s
            .split('-')
            .next()
            .and_then(|head| head.parse().ok())
            .unwrap_or(0),
        _ => 0,
    }
}

#[async_trait]
impl DocumentStore for RemoteStore {
    async fn get(&self, id: &DocId, rev: Option<&RevTag>) -> StoreResult<Entry> {
        let doc = self.fetch_doc(id, rev).await?;
        Self::entry_from_wire(doc)
    }

    async fn get_meta(&self, id: &DocId) -> StoreResult<EntryMeta> {
        let entry = self.get(id, None).await?;
        Ok(EntryMeta::from(&entry))
    }

    async fn revision_state(&self, id: &DocId) -> StoreResult<RevisionState> {
        let builder = self
            .client
            .get(self.doc_url(id))
            .query(&[("conflicts", "true")]);
        let response = self.request(builder).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(RevisionState::None),
            status if status.is_success() => {
                let doc: Value = response.json().await?;
                let winner = Self::rev_from_wire(&doc)?;
                let mut leaves = vec![winner];
                if let Some(conflicts) = doc.get("_conflicts").and_then(Value::as_array) {
                    for rev in conflicts.iter().filter_map(Value::as_str) {
                        leaves.push(RevTag::parse(rev)?);
                    }
                }
                Ok(match leaves.len() {
                    1 => RevisionState::Single(leaves.remove(0)),
                    _ => RevisionState::Conflicted(leaves),
                })
            }
            status => Err(StoreError::Protocol(format!(
                "conflict query failed with {status}"
            ))),
        }
    }

    async fn put(&self, entry: &Entry, parent: Option<&RevTag>) -> StoreResult<RevTag> {
        let body = Self::entry_to_wire(entry, parent)?;
        let response = self
            .request(self.client.put(self.doc_url(&entry.id)).json(&body))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let put: PutResponse = response.json().await?;
                Ok(RevTag::parse(&put.rev)?)
            }
            StatusCode::CONFLICT => {
                // The remote moved past our parent. Land the write as a
                // sibling leaf so the divergence is detectable, matching
                // the CAS contract.
                let rev = next_rev(entry, parent);
                warn!(id = %entry.id, %rev, "remote CAS miss, landing conflicting leaf");
                self.force_put(entry, &rev, parent).await?;
                Ok(rev)
            }
            StatusCode::PAYLOAD_TOO_LARGE => Err(StoreError::PayloadTooLarge(entry.id.clone())),
            status => Err(StoreError::Protocol(format!("put failed with {status}"))),
        }
    }

    async fn force_put(
        &self,
        entry: &Entry,
        rev: &RevTag,
        parent: Option<&RevTag>,
    ) -> StoreResult<()> {
        self.bulk_put(&[(entry.clone(), rev.clone(), parent.cloned())])
            .await
    }

    async fn remove(&self, id: &DocId, rev: &RevTag) -> StoreResult<()> {
        let response = self
            .request(
                self.client
                    .delete(self.doc_url(id))
                    .query(&[("rev", rev.as_str())]),
            )
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(id.clone())),
            status => Err(StoreError::Protocol(format!("delete failed with {status}"))),
        }
    }

    async fn all_in_range(&self, start: &str, end: &str) -> StoreResult<Vec<Entry>> {
        let builder = self.client.get(self.db_url("_all_docs")).query(&[
            ("startkey", format!("\"{start}\"")),
            ("endkey", format!("\"{end}\"")),
            ("include_docs", "true".to_string()),
        ]);
        let response = self.request(builder).send().await?.error_for_status()?;
        let body: AllDocsResponse = response.json().await?;

        let mut out = Vec::new();
        for row in body.rows {
            let Some(doc) = row.doc else { continue };
            if doc.get("_deleted").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            match Self::entry_from_wire(doc) {
                Ok(entry) => out.push(entry),
                Err(e) => warn!("skipping undecodable remote document: {e}"),
            }
        }
        Ok(out)
    }

    async fn changes_since(&self, seq: u64) -> StoreResult<Vec<Change>> {
        let builder = self
            .client
            .get(self.db_url("_changes"))
            .query(&[("since", seq.to_string())]);
        let response = self.request(builder).send().await?.error_for_status()?;
        let body: ChangesResponse = response.json().await?;

        let mut out = Vec::new();
        for row in body.results {
            let Some(first) = row.changes.first() else {
                continue;
            };
            out.push(Change {
                seq: parse_seq(&row.seq),
                id: DocId::new(row.id),
                rev: RevTag::parse(&first.rev)?,
                parent: row.parent.as_deref().map(RevTag::parse).transpose()?,
                deleted: row.deleted,
            });
        }
        Ok(out)
    }

    async fn last_seq(&self) -> StoreResult<u64> {
        let response = self
            .request(self.client.get(self.db_url("")))
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        Ok(body
            .get("update_seq")
            .map(parse_seq)
            .unwrap_or(0))
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
        if docs.is_empty() {
            return Ok(());
        }
        let mut wire_docs = Vec::with_capacity(docs.len());
        for (entry, rev, parent) in docs {
            let mut doc = Self::entry_to_wire(entry, Some(rev))?;
            if let (Some(obj), Some(parent)) = (doc.as_object_mut(), parent) {
                obj.insert("_parent".into(), Value::String(parent.to_string()));
            }
            wire_docs.push(doc);
        }
        let body = json!({ "docs": wire_docs, "new_edits": false });
        let response = self
            .request(self.client.post(self.db_url("_bulk_docs")).json(&body))
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::PAYLOAD_TOO_LARGE => Err(StoreError::PayloadTooLarge(
                docs[0].0.id.clone(),
            )),
            status => Err(StoreError::Protocol(format!(
                "bulk_docs failed with {status}"
            ))),
        }
    }

    async fn purge(&self, id: &DocId, rev: &RevTag) -> StoreResult<()> {
        let body = json!({ id.as_str(): [rev.as_str()] });
        self.request(self.client.post(self.db_url("_purge")).json(&body))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn compact(&self) -> StoreResult<()> {
        self.request(self.client.post(self.db_url("_compact")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
