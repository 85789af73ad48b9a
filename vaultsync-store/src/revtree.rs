//! Per-document revision trees.
//!
//! Each document carries a tree of revisions. A *leaf* is a revision with
//! no child. One live leaf means the document has a single current
//! revision; several live leaves mean concurrent writers diverged and the
//! document is in conflict. The winner among leaves is deterministic:
//! highest generation, then lexicographically greatest tag.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use vaultsync_types::{Entry, RevTag};

/// One node in a revision tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevNode {
    /// This revision's tag.
    pub rev: RevTag,
    /// Parent revision, `None` for a root.
    pub parent: Option<RevTag>,
    /// Whether this revision is a deletion (closed leaf).
    pub deleted: bool,
}

/// Whether a document currently has one head or several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionState {
    /// Exactly one live leaf.
    Single(RevTag),
    /// Multiple live leaves: the document is in conflict. Sorted with the
    /// winner first.
    Conflicted(Vec<RevTag>),
    /// No live leaf (deleted or empty document).
    None,
}

/// The revision history of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevTree {
    nodes: HashMap<RevTag, RevNode>,
}

impl RevTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// All nodes in the tree.
    pub fn nodes(&self) -> impl Iterator<Item = &RevNode> {
        self.nodes.values()
    }

    /// Looks up a node.
    pub fn get(&self, rev: &RevTag) -> Option<&RevNode> {
        self.nodes.get(rev)
    }

    /// Whether the tree holds no revisions at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Inserts a node. Existing nodes are left untouched (revisions are
    /// immutable once written).
    pub fn insert(&mut self, node: RevNode) {
        self.nodes.entry(node.rev.clone()).or_insert(node);
    }

    /// Marks a revision deleted, closing that branch.
    pub fn mark_deleted(&mut self, rev: &RevTag) -> bool {
        match self.nodes.get_mut(rev) {
            Some(node) => {
                node.deleted = true;
                true
            }
            None => false,
        }
    }

    /// Physically removes a revision (garbage collection only).
    pub fn purge(&mut self, rev: &RevTag) -> bool {
        self.nodes.remove(rev).is_some()
    }

    /// All leaves: revisions that are no other revision's parent.
    pub fn leaves(&self) -> Vec<&RevNode> {
        self.nodes
            .values()
            .filter(|node| {
                !self
                    .nodes
                    .values()
                    .any(|other| other.parent.as_ref() == Some(&node.rev))
            })
            .collect()
    }

    /// Live (non-deleted) leaves, winner first.
    pub fn live_leaves(&self) -> Vec<RevTag> {
        let mut live: Vec<RevTag> = self
            .leaves()
            .into_iter()
            .filter(|n| !n.deleted)
            .map(|n| n.rev.clone())
            .collect();
        live.sort_by(|a, b| {
            b.generation()
                .cmp(&a.generation())
                .then_with(|| b.as_str().cmp(a.as_str()))
        });
        live
    }

    /// The winning revision, if any live leaf exists.
    pub fn winner(&self) -> Option<RevTag> {
        self.live_leaves().into_iter().next()
    }

    /// Single / conflicted / gone.
    pub fn state(&self) -> RevisionState {
        let mut live = self.live_leaves();
        match live.len() {
            0 => RevisionState::None,
            1 => RevisionState::Single(live.remove(0)),
            _ => RevisionState::Conflicted(live),
        }
    }

    /// Walks ancestors of `rev`, nearest first (excluding `rev` itself).
    pub fn ancestors(&self, rev: &RevTag) -> Vec<RevTag> {
        let mut out = Vec::new();
        let mut cursor = self.nodes.get(rev).and_then(|n| n.parent.clone());
        while let Some(parent) = cursor {
            cursor = self.nodes.get(&parent).and_then(|n| n.parent.clone());
            out.push(parent);
        }
        out
    }

    /// Nearest common ancestor of two revisions, if the branches share one.
    pub fn common_ancestor(&self, a: &RevTag, b: &RevTag) -> Option<RevTag> {
        let ancestors_a: Vec<RevTag> = self.ancestors(a);
        let ancestors_b = self.ancestors(b);
        ancestors_a
            .into_iter()
            .find(|rev| ancestors_b.contains(rev))
    }
}

/// Computes the deterministic revision tag for an entry written on top of
/// `parent`.
pub fn next_rev(entry: &Entry, parent: Option<&RevTag>) -> RevTag {
    let generation = parent.map(|p| p.generation() + 1).unwrap_or(1);
    let mut hasher = Sha256::new();
    if let Some(parent) = parent {
        hasher.update(parent.as_str().as_bytes());
    }
    if let Ok(body) = serde_json::to_vec(entry) {
        hasher.update(&body);
    }
    let digest = hasher.finalize();
    RevTag::new(generation, &hex::encode(&digest[..8]))
}
