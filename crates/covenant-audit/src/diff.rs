//! Structural diff over policy content trees.
//!
//! Policy content is an opaque tagged tree (scalars, arrays, objects).
//! The diff is a pure recursive function: objects are compared key-by-key,
//! arrays index-by-index, and every leaf difference is classified as
//! add, modify, or delete. Applying a diff to the left-hand tree
//! reconstructs the right-hand tree exactly.

use serde_json::Value;

use covenant_core::{
    ChangeComplexity, ChangeOperation, Changeset, DiffEntry, DiffKind, OperationKind, PolicyDiff,
    RollbackInstruction,
};

use crate::error::{AuditError, AuditResult};

/// Compute the structural difference from `before` to `after`.
pub fn compute_diff(before: &Value, after: &Value) -> PolicyDiff {
    let mut entries = Vec::new();
    walk("", Some(before), Some(after), &mut entries);

    let additions = entries.iter().filter(|e| e.kind == DiffKind::Add).count();
    let modifications = entries.iter().filter(|e| e.kind == DiffKind::Modify).count();
    let deletions = entries.iter().filter(|e| e.kind == DiffKind::Delete).count();
    let complexity = complexity_for(additions + modifications + deletions);

    PolicyDiff {
        entries,
        additions,
        modifications,
        deletions,
        complexity,
    }
}

/// Complexity tier from the total leaf change count.
/// Thresholds: 0 / <=5 / <=15 / <=50 / >50.
fn complexity_for(total: usize) -> ChangeComplexity {
    match total {
        0 => ChangeComplexity::Trivial,
        1..=5 => ChangeComplexity::Simple,
        6..=15 => ChangeComplexity::Moderate,
        16..=50 => ChangeComplexity::Complex,
        _ => ChangeComplexity::Major,
    }
}

fn walk(path: &str, before: Option<&Value>, after: Option<&Value>, out: &mut Vec<DiffEntry>) {
    match (before, after) {
        (None, None) => {}
        (None, Some(a)) => out.push(DiffEntry {
            path: path.to_string(),
            kind: DiffKind::Add,
            before: None,
            after: Some(a.clone()),
        }),
        (Some(b), None) => out.push(DiffEntry {
            path: path.to_string(),
            kind: DiffKind::Delete,
            before: Some(b.clone()),
            after: None,
        }),
        (Some(b), Some(a)) => {
            if b == a {
                return;
            }
            match (b, a) {
                (Value::Object(bo), Value::Object(ao)) => {
                    // Union of keys; Map iteration is key-sorted so the
                    // entry order is deterministic.
                    let mut keys: Vec<&String> = bo.keys().chain(ao.keys()).collect();
                    keys.sort();
                    keys.dedup();
                    for key in keys {
                        let child = format!("{}/{}", path, key);
                        walk(&child, bo.get(key), ao.get(key), out);
                    }
                }
                (Value::Array(ba), Value::Array(aa)) => {
                    let len = ba.len().max(aa.len());
                    for i in 0..len {
                        let child = format!("{}/{}", path, i);
                        walk(&child, ba.get(i), aa.get(i), out);
                    }
                }
                _ => out.push(DiffEntry {
                    path: path.to_string(),
                    kind: DiffKind::Modify,
                    before: Some(b.clone()),
                    after: Some(a.clone()),
                }),
            }
        }
    }
}

/// Apply a diff to `base`, producing the right-hand tree.
///
/// Adds and modifies are applied in entry order; deletes are applied last
/// in reverse order so trailing array indices shift correctly.
pub fn apply_diff(base: &Value, diff: &PolicyDiff) -> AuditResult<Value> {
    let mut result = base.clone();
    for entry in &diff.entries {
        if entry.kind != DiffKind::Delete {
            let value = entry.after.clone().ok_or_else(|| {
                AuditError::Internal(format!("diff entry at {} has no after value", entry.path))
            })?;
            set_path(&mut result, &entry.path, value)?;
        }
    }
    for entry in diff.entries.iter().rev() {
        if entry.kind == DiffKind::Delete {
            remove_path(&mut result, &entry.path)?;
        }
    }
    Ok(result)
}

/// Derive the ordered changeset (with per-operation rollback instructions)
/// from a computed diff.
pub fn changeset_from_diff(diff: &PolicyDiff) -> Changeset {
    let operations = diff
        .entries
        .iter()
        .enumerate()
        .map(|(index, entry)| match entry.kind {
            DiffKind::Add => ChangeOperation {
                index,
                kind: OperationKind::Set,
                path: entry.path.clone(),
                value: entry.after.clone(),
                rollback: RollbackInstruction {
                    kind: OperationKind::Remove,
                    path: entry.path.clone(),
                    restore: None,
                },
            },
            DiffKind::Modify => ChangeOperation {
                index,
                kind: OperationKind::Set,
                path: entry.path.clone(),
                value: entry.after.clone(),
                rollback: RollbackInstruction {
                    kind: OperationKind::Set,
                    path: entry.path.clone(),
                    restore: entry.before.clone(),
                },
            },
            DiffKind::Delete => ChangeOperation {
                index,
                kind: OperationKind::Remove,
                path: entry.path.clone(),
                value: None,
                rollback: RollbackInstruction {
                    kind: OperationKind::Set,
                    path: entry.path.clone(),
                    restore: entry.before.clone(),
                },
            },
        })
        .collect();
    Changeset { operations }
}

fn set_path(root: &mut Value, path: &str, value: Value) -> AuditResult<()> {
    if path.is_empty() {
        *root = value;
        return Ok(());
    }
    let segments: Vec<&str> = path.split('/').skip(1).collect();
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        match current {
            Value::Object(map) => {
                if last {
                    map.insert(segment.to_string(), value);
                    return Ok(());
                }
                // Create intermediate objects for synthetic entries
                current = map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
            }
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| {
                    AuditError::Internal(format!("non-numeric array index in path {}", path))
                })?;
                if last {
                    if index < items.len() {
                        items[index] = value;
                    } else if index == items.len() {
                        items.push(value);
                    } else {
                        return Err(AuditError::Internal(format!(
                            "array index {} out of bounds applying {}",
                            index, path
                        )));
                    }
                    return Ok(());
                }
                current = items.get_mut(index).ok_or_else(|| {
                    AuditError::Internal(format!("missing array element applying {}", path))
                })?;
            }
            _ => {
                return Err(AuditError::Internal(format!(
                    "cannot descend into scalar applying {}",
                    path
                )))
            }
        }
    }
    Ok(())
}

fn remove_path(root: &mut Value, path: &str) -> AuditResult<()> {
    if path.is_empty() {
        *root = Value::Null;
        return Ok(());
    }
    let segments: Vec<&str> = path.split('/').skip(1).collect();
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        match current {
            Value::Object(map) => {
                if last {
                    map.remove(*segment);
                    return Ok(());
                }
                current = map.get_mut(*segment).ok_or_else(|| {
                    AuditError::Internal(format!("missing object key removing {}", path))
                })?;
            }
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| {
                    AuditError::Internal(format!("non-numeric array index in path {}", path))
                })?;
                if last {
                    if index < items.len() {
                        items.remove(index);
                    }
                    return Ok(());
                }
                current = items.get_mut(index).ok_or_else(|| {
                    AuditError::Internal(format!("missing array element removing {}", path))
                })?;
            }
            _ => {
                return Err(AuditError::Internal(format!(
                    "cannot descend into scalar removing {}",
                    path
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_trees_trivial() {
        let v = json!({"rules": ["a", "b"], "limit": 10});
        let diff = compute_diff(&v, &v);
        assert!(diff.entries.is_empty());
        assert_eq!(diff.complexity, ChangeComplexity::Trivial);
    }

    #[test]
    fn test_scalar_modify() {
        let diff = compute_diff(&json!({"limit": 10}), &json!({"limit": 20}));
        assert_eq!(diff.entries.len(), 1);
        assert_eq!(diff.entries[0].kind, DiffKind::Modify);
        assert_eq!(diff.entries[0].path, "/limit");
        assert_eq!(diff.modifications, 1);
    }

    #[test]
    fn test_key_add_and_delete() {
        let diff = compute_diff(&json!({"a": 1}), &json!({"b": 2}));
        assert_eq!(diff.additions, 1);
        assert_eq!(diff.deletions, 1);
        let kinds: Vec<DiffKind> = diff.entries.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&DiffKind::Add));
        assert!(kinds.contains(&DiffKind::Delete));
    }

    #[test]
    fn test_array_index_by_index() {
        let diff = compute_diff(&json!(["a", "b", "c"]), &json!(["a", "x"]));
        // index 1 modified, index 2 deleted
        assert_eq!(diff.modifications, 1);
        assert_eq!(diff.deletions, 1);
        assert_eq!(diff.entries[0].path, "/1");
        assert_eq!(diff.entries[1].path, "/2");
    }

    #[test]
    fn test_nested_paths() {
        let before = json!({"rules": {"read": {"allow": true}}});
        let after = json!({"rules": {"read": {"allow": false}}});
        let diff = compute_diff(&before, &after);
        assert_eq!(diff.entries.len(), 1);
        assert_eq!(diff.entries[0].path, "/rules/read/allow");
    }

    #[test]
    fn test_type_change_is_single_modify() {
        let diff = compute_diff(&json!({"v": [1, 2]}), &json!({"v": "scalar"}));
        assert_eq!(diff.entries.len(), 1);
        assert_eq!(diff.entries[0].kind, DiffKind::Modify);
    }

    #[test]
    fn test_complexity_tiers() {
        assert_eq!(complexity_for(0), ChangeComplexity::Trivial);
        assert_eq!(complexity_for(5), ChangeComplexity::Simple);
        assert_eq!(complexity_for(6), ChangeComplexity::Moderate);
        assert_eq!(complexity_for(15), ChangeComplexity::Moderate);
        assert_eq!(complexity_for(16), ChangeComplexity::Complex);
        assert_eq!(complexity_for(50), ChangeComplexity::Complex);
        assert_eq!(complexity_for(51), ChangeComplexity::Major);
    }

    #[test]
    fn test_round_trip_objects() {
        let before = json!({"a": 1, "b": {"c": [1, 2, 3], "d": "x"}, "e": true});
        let after = json!({"a": 2, "b": {"c": [1, 9], "f": null}, "g": "new"});
        let diff = compute_diff(&before, &after);
        let rebuilt = apply_diff(&before, &diff).unwrap();
        assert_eq!(rebuilt, after);
    }

    #[test]
    fn test_round_trip_array_growth() {
        let before = json!({"rules": ["a"]});
        let after = json!({"rules": ["a", "b", "c"]});
        let diff = compute_diff(&before, &after);
        assert_eq!(diff.additions, 2);
        assert_eq!(apply_diff(&before, &diff).unwrap(), after);
    }

    #[test]
    fn test_round_trip_array_shrink() {
        let before = json!({"rules": ["a", "b", "c", "d"]});
        let after = json!({"rules": ["a"]});
        let diff = compute_diff(&before, &after);
        assert_eq!(diff.deletions, 3);
        assert_eq!(apply_diff(&before, &diff).unwrap(), after);
    }

    #[test]
    fn test_round_trip_from_null_creation() {
        let after = json!({"rules": ["allow"], "limit": 5});
        let diff = compute_diff(&Value::Null, &after);
        assert_eq!(apply_diff(&Value::Null, &diff).unwrap(), after);
    }

    #[test]
    fn test_changeset_rollback_instructions() {
        let before = json!({"keep": 1, "change": "old", "drop": true});
        let after = json!({"keep": 1, "change": "new", "added": 9});
        let diff = compute_diff(&before, &after);
        let changeset = changeset_from_diff(&diff);
        assert_eq!(changeset.operations.len(), diff.entries.len());

        for op in &changeset.operations {
            match op.path.as_str() {
                "/change" => {
                    assert_eq!(op.kind, OperationKind::Set);
                    assert_eq!(op.rollback.kind, OperationKind::Set);
                    assert_eq!(op.rollback.restore, Some(json!("old")));
                }
                "/added" => {
                    assert_eq!(op.kind, OperationKind::Set);
                    assert_eq!(op.rollback.kind, OperationKind::Remove);
                }
                "/drop" => {
                    assert_eq!(op.kind, OperationKind::Remove);
                    assert_eq!(op.rollback.restore, Some(json!(true)));
                }
                other => panic!("unexpected operation path {}", other),
            }
        }
    }
}
