//! Structural diff and patch algebra for conflict resolution.
//!
//! Two tools live here. The typed JSON delta tree drives automatic
//! three-way merges: two patches against a common ancestor that touch
//! disjoint key paths compose cleanly. The line diff renders an escalated
//! conflict for a human; non-text payloads collapse to a binary marker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One node of a structural JSON delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Delta {
    /// A key absent in the base was added.
    Added { value: Value },
    /// A key present in the base was removed.
    Removed,
    /// A leaf value changed.
    Changed { from: Value, to: Value },
    /// Changes nested inside an object.
    Nested { children: BTreeMap<String, Delta> },
}

/// Computes the delta from `base` to `target`, or `None` when equal.
pub fn diff(base: &Value, target: &Value) -> Option<Delta> {
    if base == target {
        return None;
    }
    match (base, target) {
        (Value::Object(a), Value::Object(b)) => {
            let mut children = BTreeMap::new();
            for (key, old) in a {
                match b.get(key) {
                    None => {
                        children.insert(key.clone(), Delta::Removed);
                    }
                    Some(new) => {
                        if let Some(child) = diff(old, new) {
                            children.insert(key.clone(), child);
                        }
                    }
                }
            }
            for (key, new) in b {
                if !a.contains_key(key) {
                    children.insert(key.clone(), Delta::Added { value: new.clone() });
                }
            }
            if children.is_empty() {
                None
            } else {
                Some(Delta::Nested { children })
            }
        }
        _ => Some(Delta::Changed {
            from: base.clone(),
            to: target.clone(),
        }),
    }
}

/// The key paths a delta touches, `/`-joined from the root.
pub fn touched_paths(delta: &Delta) -> Vec<String> {
    let mut out = Vec::new();
    collect_paths(delta, "", &mut out);
    out
}

fn collect_paths(delta: &Delta, prefix: &str, out: &mut Vec<String>) {
    match delta {
        Delta::Nested { children } => {
            for (key, child) in children {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}/{key}")
                };
                collect_paths(child, &path, out);
            }
        }
        _ => out.push(prefix.to_string()),
    }
}

fn overlapping(a: &str, b: &str) -> bool {
    a.is_empty()
        || b.is_empty()
        || a == b
        || a.starts_with(&format!("{b}/"))
        || b.starts_with(&format!("{a}/"))
}

/// Whether two deltas touch strictly disjoint key paths.
///
/// A path and its ancestor overlap: replacing `"a"` wholesale conflicts
/// with editing `"a/b"`.
pub fn disjoint(a: &Delta, b: &Delta) -> bool {
    let pa = touched_paths(a);
    let pb = touched_paths(b);
    !pa.iter().any(|x| pb.iter().any(|y| overlapping(x, y)))
}

/// Applies a delta to a base value, returning the patched value.
pub fn apply(base: &Value, delta: &Delta) -> Value {
    match delta {
        Delta::Added { value } => value.clone(),
        Delta::Removed => Value::Null,
        Delta::Changed { to, .. } => to.clone(),
        Delta::Nested { children } => {
            let mut obj = match base {
                Value::Object(map) => map.clone(),
                _ => serde_json::Map::new(),
            };
            for (key, child) in children {
                match child {
                    Delta::Added { value } => {
                        obj.insert(key.clone(), value.clone());
                    }
                    Delta::Removed => {
                        obj.remove(key);
                    }
                    Delta::Changed { to, .. } => {
                        obj.insert(key.clone(), to.clone());
                    }
                    Delta::Nested { .. } => {
                        let inner = obj.get(key).cloned().unwrap_or(Value::Null);
                        obj.insert(key.clone(), apply(&inner, child));
                    }
                }
            }
            Value::Object(obj)
        }
    }
}

// ── Line diff for escalation ─────────────────────────────────────

/// One line of a rendered two-way diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    /// Present in both versions.
    Context(String),
    /// Only in the left version.
    Left(String),
    /// Only in the right version.
    Right(String),
}

/// What the conflict UI is shown for an escalated conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictDiff {
    /// Line-level diff of two text versions.
    Text(Vec<DiffLine>),
    /// At least one side is not valid UTF-8.
    Binary { left_size: u64, right_size: u64 },
}

impl ConflictDiff {
    /// Builds the diff the UI should display for two decoded payloads.
    pub fn between(left: &[u8], right: &[u8]) -> Self {
        match (std::str::from_utf8(left), std::str::from_utf8(right)) {
            (Ok(l), Ok(r)) => ConflictDiff::Text(line_diff(l, r)),
            _ => ConflictDiff::Binary {
                left_size: left.len() as u64,
                right_size: right.len() as u64,
            },
        }
    }
}

/// Longest-common-subsequence line diff.
pub fn line_diff(left: &str, right: &str) -> Vec<DiffLine> {
    let a: Vec<&str> = left.lines().collect();
    let b: Vec<&str> = right.lines().collect();
    let (n, m) = (a.len(), b.len());

    // dp[i][j] = LCS length of a[i..] and b[j..]
    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if a[i] == b[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            out.push(DiffLine::Context(a[i].to_string()));
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            out.push(DiffLine::Left(a[i].to_string()));
            i += 1;
        } else {
            out.push(DiffLine::Right(b[j].to_string()));
            j += 1;
        }
    }
    out.extend(a[i..].iter().map(|l| DiffLine::Left(l.to_string())));
    out.extend(b[j..].iter().map(|l| DiffLine::Right(l.to_string())));
    out
}
