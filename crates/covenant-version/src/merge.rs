//! Three-way merge over policy content trees.
//!
//! The merge is explicit about conflicts: changes are computed from a
//! common ancestor to each side, non-overlapping changes apply cleanly,
//! and overlapping changes must carry a caller-supplied resolution or the
//! merge fails with the full conflict list. Nothing is silently
//! overwritten.
//!
//! Overlap is conservative: two edits conflict when they touch the same
//! path, when one path contains the other, or when both reach into the
//! same array (index shifts make concurrent array edits unsafe to combine).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use covenant_core::{DiffEntry, DiffKind, PolicyDiff};
use covenant_audit::{apply_diff, compute_diff};

/// One unresolved overlap between the two sides of a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub path: String,
    #[serde(default)]
    pub base: Option<Value>,
    #[serde(default)]
    pub left: Option<Value>,
    #[serde(default)]
    pub right: Option<Value>,
}

/// Caller-supplied resolution for a conflicting path.
/// `value: None` resolves the conflict by removing the path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResolution {
    pub path: String,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub content: Value,
    pub applied_changes: usize,
    pub resolved_conflicts: usize,
}

/// Merge `left` and `right` against their common ancestor `base`.
pub fn three_way_merge(
    base: &Value,
    left: &Value,
    right: &Value,
    resolutions: &[MergeResolution],
) -> Result<MergeOutcome, Vec<MergeConflict>> {
    let left_diff = compute_diff(base, left);
    let right_diff = compute_diff(base, right);

    let mut merged: Vec<DiffEntry> = Vec::new();
    let mut conflict_paths: Vec<String> = Vec::new();

    for l in &left_diff.entries {
        if right_diff.entries.iter().any(|r| overlaps(base, l, r)) {
            push_unique(&mut conflict_paths, conflict_path(l));
        } else {
            merged.push(l.clone());
        }
    }
    for r in &right_diff.entries {
        if left_diff.entries.iter().any(|l| overlaps(base, l, r)) {
            push_unique(&mut conflict_paths, conflict_path(r));
        } else if !merged.iter().any(|m| m.path == r.path && same_effect(m, r)) {
            merged.push(r.clone());
        }
    }
    // Identical edits on both sides are not conflicts; re-admit them once.
    for l in &left_diff.entries {
        if right_diff
            .entries
            .iter()
            .any(|r| r.path == l.path && same_effect(l, r))
        {
            conflict_paths.retain(|p| p != &l.path);
            if !merged.iter().any(|m| m.path == l.path) {
                merged.push(l.clone());
            }
        }
    }

    let mut resolved = 0usize;
    let mut unresolved = Vec::new();
    for path in &conflict_paths {
        match resolutions.iter().find(|r| &r.path == path) {
            Some(resolution) => {
                merged.push(resolution_entry(base, path, resolution.value.clone()));
                resolved += 1;
            }
            None => unresolved.push(MergeConflict {
                path: path.clone(),
                base: base.pointer(path).cloned(),
                left: left.pointer(path).cloned(),
                right: right.pointer(path).cloned(),
            }),
        }
    }
    if !unresolved.is_empty() {
        return Err(unresolved);
    }

    merged.sort_by(|a, b| compare_paths(&a.path, &b.path));
    let applied_changes = merged.len();
    let combined = PolicyDiff {
        additions: merged.iter().filter(|e| e.kind == DiffKind::Add).count(),
        modifications: merged.iter().filter(|e| e.kind == DiffKind::Modify).count(),
        deletions: merged.iter().filter(|e| e.kind == DiffKind::Delete).count(),
        complexity: covenant_core::ChangeComplexity::Trivial,
        entries: merged,
    };

    match apply_diff(base, &combined) {
        Ok(content) => Ok(MergeOutcome {
            content,
            applied_changes,
            resolved_conflicts: resolved,
        }),
        Err(_) => {
            // Structurally incompatible edits that escaped overlap
            // detection; surface them as conflicts on the combined paths.
            Err(combined
                .entries
                .iter()
                .map(|e| MergeConflict {
                    path: e.path.clone(),
                    base: base.pointer(&e.path).cloned(),
                    left: left.pointer(&e.path).cloned(),
                    right: right.pointer(&e.path).cloned(),
                })
                .collect())
        }
    }
}

fn same_effect(a: &DiffEntry, b: &DiffEntry) -> bool {
    a.kind == b.kind && a.after == b.after
}

fn overlaps(base: &Value, l: &DiffEntry, r: &DiffEntry) -> bool {
    if l.path == r.path {
        return !same_effect(l, r);
    }
    if contains(&l.path, &r.path) || contains(&r.path, &l.path) {
        return true;
    }
    // Two distinct edits into the same array
    match (parent_of(&l.path), parent_of(&r.path)) {
        (Some(lp), Some(rp)) if lp == rp => base
            .pointer(lp)
            .map(|v| v.is_array())
            .unwrap_or(false),
        _ => false,
    }
}

/// Segment-wise path comparison with numeric ordering for array indices,
/// so `/rules/2` sorts before `/rules/10`.
fn compare_paths(a: &str, b: &str) -> std::cmp::Ordering {
    let mut left = a.split('/');
    let mut right = b.split('/');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return std::cmp::Ordering::Equal,
            (None, Some(_)) => return std::cmp::Ordering::Less,
            (Some(_), None) => return std::cmp::Ordering::Greater,
            (Some(ls), Some(rs)) => {
                let ordering = match (ls.parse::<usize>(), rs.parse::<usize>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                    _ => ls.cmp(rs),
                };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn contains(outer: &str, inner: &str) -> bool {
    inner.starts_with(outer) && inner[outer.len()..].starts_with('/')
}

fn parent_of(path: &str) -> Option<&str> {
    path.rfind('/').map(|i| &path[..i])
}

fn conflict_path(entry: &DiffEntry) -> String {
    entry.path.clone()
}

fn push_unique(paths: &mut Vec<String>, path: String) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}

fn resolution_entry(base: &Value, path: &str, value: Option<Value>) -> DiffEntry {
    let before = base.pointer(path).cloned();
    match value {
        Some(v) => DiffEntry {
            path: path.to_string(),
            kind: if before.is_some() {
                DiffKind::Modify
            } else {
                DiffKind::Add
            },
            before,
            after: Some(v),
        },
        None => DiffEntry {
            path: path.to_string(),
            kind: DiffKind::Delete,
            before,
            after: None,
        },
    }
}
