//! Conflict detection over a resolved rollback plan.
//!
//! Each detector is independent and produces zero or more conflicts;
//! none of them aborts validation. Compliance is a strategy seam so
//! deployments can plug jurisdiction-specific rules in without touching
//! the detectors.

use covenant_core::{
    ConflictSeverity, PolicyChange, PolicyId, PolicyVersion, RollbackPlan, Timestamp,
};

use crate::graph::DependencyGraph;
use crate::types::{Conflict, ConflictKind, ResolutionKind, ResolutionOption};

const SECONDS_PER_DAY: u64 = 86_400;

// ---------------------------------------------------------------------------
// ComplianceChecker — pluggable policy-compliance strategy
// ---------------------------------------------------------------------------

pub trait ComplianceChecker: Send + Sync {
    /// Inspect the plan and its resolved targets, returning any
    /// compliance conflicts. Must not panic; infrastructure errors should
    /// surface as a `Compliance` conflict rather than an `Err`.
    fn check(&self, plan: &RollbackPlan, resolved: &[PolicyVersion]) -> Vec<Conflict>;
}

/// Default checker: no compliance rules configured.
#[derive(Debug, Default)]
pub struct NoopComplianceChecker;

impl ComplianceChecker for NoopComplianceChecker {
    fn check(&self, _plan: &RollbackPlan, _resolved: &[PolicyVersion]) -> Vec<Conflict> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

/// Target and current version further apart than the mismatch window:
/// the environment has drifted too far for a single-step rollback.
pub fn version_mismatch_conflicts(
    resolved: &[PolicyVersion],
    current: &[PolicyVersion],
    window_days: u64,
    now: Timestamp,
) -> Vec<Conflict> {
    let window_secs = window_days * SECONDS_PER_DAY;
    let mut conflicts = Vec::new();
    for target in resolved {
        let Some(live) = current.iter().find(|c| c.policy_id == target.policy_id) else {
            continue;
        };
        if live.version == target.version {
            continue;
        }
        let age = now.seconds_since(target.metadata.created_at);
        if age > window_secs {
            conflicts.push(Conflict {
                kind: ConflictKind::VersionMismatch,
                severity: ConflictSeverity::Medium,
                description: format!(
                    "target version {} of policy {} is {} days old; current is {}",
                    target.version,
                    target.policy_id,
                    age / SECONDS_PER_DAY,
                    live.version,
                ),
                affected_policies: vec![target.policy_id.clone()],
                auto_resolvable: false,
                resolutions: vec![ResolutionOption {
                    kind: ResolutionKind::StagedRollback,
                    description: "roll back through intermediate versions in stages".into(),
                }],
            });
        }
    }
    conflicts
}

/// One conflict per distinct cycle, plus one low-severity conflict per
/// orphaned (out-of-scope) dependency.
pub fn dependency_conflicts(graph: &DependencyGraph, scope: &[PolicyId]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    for cycle in graph.find_cycles() {
        if cycle.is_empty() {
            continue;
        }
        let path = cycle
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(" -> ");
        let (from, to) = suggest_edge_removal(&cycle);
        conflicts.push(Conflict {
            kind: ConflictKind::CircularDependency,
            severity: ConflictSeverity::High,
            description: format!("circular dependency: {path} -> {}", cycle[0]),
            affected_policies: cycle.clone(),
            auto_resolvable: false,
            resolutions: vec![ResolutionOption {
                kind: ResolutionKind::RemoveDependencyEdge,
                description: format!("remove edge {from} -> {to} to break the cycle"),
            }],
        });
    }

    for orphan in graph.orphans(scope) {
        conflicts.push(Conflict {
            kind: ConflictKind::OrphanedDependency,
            severity: ConflictSeverity::Low,
            description: format!("policy {orphan} is referenced but outside the rollback scope"),
            affected_policies: vec![orphan],
            auto_resolvable: true,
            resolutions: vec![ResolutionOption {
                kind: ResolutionKind::ExcludeFromScope,
                description: "proceed without the out-of-scope dependency".into(),
            }],
        });
    }
    conflicts
}

/// Any in-scope policy changed within the modification window: someone
/// is actively working on it and the rollback needs coordination.
pub fn concurrent_modification_conflicts(
    recent_changes: &[PolicyChange],
    window_secs: u64,
    now: Timestamp,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for change in recent_changes {
        if now.seconds_since(change.recorded_at) <= window_secs {
            conflicts.push(Conflict {
                kind: ConflictKind::ConcurrentModification,
                severity: ConflictSeverity::High,
                description: format!(
                    "policy {} changed to {} within the last {} minutes",
                    change.policy_id,
                    change.to_version,
                    window_secs / 60,
                ),
                affected_policies: vec![change.policy_id.clone()],
                auto_resolvable: false,
                resolutions: vec![ResolutionOption {
                    kind: ResolutionKind::CoordinateWithAuthors,
                    description: "coordinate with the authors of the recent change".into(),
                }],
            });
        }
    }
    conflicts
}

/// The cycle's last edge closes it; suggesting its removal names a
/// concrete, minimal fix. Callers pass non-empty cycles only.
fn suggest_edge_removal(cycle: &[PolicyId]) -> (PolicyId, PolicyId) {
    let first = cycle[0].clone();
    let last = cycle.last().cloned().unwrap_or_else(|| first.clone());
    (last, first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::{RiskLevel, VersionMetadata, VersionStatus};
    use serde_json::json;

    fn version_at(policy: &str, version: &str, created_secs: u64) -> PolicyVersion {
        let ts = Timestamp::from_seconds(created_secs);
        PolicyVersion {
            policy_id: PolicyId::new(policy),
            version: version.into(),
            content_hash: covenant_core::crypto::content_hash(&json!({})).unwrap(),
            content: json!({}),
            metadata: VersionMetadata {
                category: "access".into(),
                impact: RiskLevel::Low,
                approver: None,
                created_at: ts,
                updated_at: ts,
            },
            parent_version: None,
            branches: vec![],
            tags: vec![],
            status: VersionStatus::Active,
        }
    }

    fn deps(policy: &str, depends: &[&str]) -> PolicyVersion {
        let mut v = version_at(policy, "1.0.0", 0);
        let list: Vec<serde_json::Value> =
            depends.iter().map(|d| json!({"depends_on": d})).collect();
        v.content = json!({"dependencies": list});
        v
    }

    #[test]
    fn test_stale_target_yields_staged_rollback() {
        let now = Timestamp::from_seconds(100 * 86_400);
        let target = version_at("p1", "1.0.0", 10 * 86_400); // 90 days old
        let current = version_at("p1", "2.0.0", 99 * 86_400);

        let conflicts = version_mismatch_conflicts(&[target], &[current], 30, now);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::VersionMismatch);
        assert_eq!(conflicts[0].severity, ConflictSeverity::Medium);
        assert_eq!(conflicts[0].resolutions[0].kind, ResolutionKind::StagedRollback);
    }

    #[test]
    fn test_recent_target_no_mismatch() {
        let now = Timestamp::from_seconds(40 * 86_400);
        let target = version_at("p1", "1.0.0", 25 * 86_400); // 15 days old
        let current = version_at("p1", "2.0.0", 39 * 86_400);
        assert!(version_mismatch_conflicts(&[target], &[current], 30, now).is_empty());
    }

    #[test]
    fn test_same_version_no_mismatch() {
        let now = Timestamp::from_seconds(100 * 86_400);
        let target = version_at("p1", "1.0.0", 0);
        let current = version_at("p1", "1.0.0", 0);
        assert!(version_mismatch_conflicts(&[target], &[current], 30, now).is_empty());
    }

    #[test]
    fn test_cycle_yields_single_high_conflict_naming_all_members() {
        let versions = [deps("a", &["b"]), deps("b", &["c"]), deps("c", &["a"])];
        let scope: Vec<PolicyId> = versions.iter().map(|v| v.policy_id.clone()).collect();
        let graph = DependencyGraph::build(&versions);

        let conflicts = dependency_conflicts(&graph, &scope);
        let cycles: Vec<&Conflict> = conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::CircularDependency)
            .collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].severity, ConflictSeverity::High);
        assert_eq!(
            cycles[0].affected_policies,
            vec![PolicyId::new("a"), PolicyId::new("b"), PolicyId::new("c")]
        );
        assert_eq!(cycles[0].resolutions[0].kind, ResolutionKind::RemoveDependencyEdge);
    }

    #[test]
    fn test_orphans_low_and_auto_resolvable() {
        let versions = [deps("a", &["x"])];
        let scope = vec![PolicyId::new("a")];
        let graph = DependencyGraph::build(&versions);

        let conflicts = dependency_conflicts(&graph, &scope);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::OrphanedDependency);
        assert_eq!(conflicts[0].severity, ConflictSeverity::Low);
        assert!(conflicts[0].auto_resolvable);
    }

    #[test]
    fn test_recent_change_is_concurrent_modification() {
        use covenant_core::{
            ChangeComplexity, ChangeId, ChangeMetadata, ChangeUrgency, Changeset, PolicyDiff,
        };
        let now = Timestamp::from_seconds(10_000);
        let change = PolicyChange {
            change_id: ChangeId::new("c1"),
            policy_id: PolicyId::new("p1"),
            from_version: Some("1.0.0".into()),
            to_version: "1.0.1".into(),
            diff: PolicyDiff {
                entries: vec![],
                additions: 0,
                modifications: 0,
                deletions: 0,
                complexity: ChangeComplexity::Trivial,
            },
            changeset: Changeset { operations: vec![] },
            metadata: ChangeMetadata {
                reason: "tweak".into(),
                urgency: ChangeUrgency::Routine,
                impact: RiskLevel::Low,
                affected_systems: vec![],
                affected_users: vec![],
                rollback_complexity: ChangeComplexity::Trivial,
            },
            audit_entry_ids: vec![],
            recorded_at: Timestamp::from_seconds(9_000),
        };

        let hits = concurrent_modification_conflicts(&[change.clone()], 3_600, now);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].severity, ConflictSeverity::High);
        assert!(!hits[0].auto_resolvable);

        // same change, outside the window
        let later = Timestamp::from_seconds(9_000 + 7_200);
        assert!(concurrent_modification_conflicts(&[change], 3_600, later).is_empty());
    }
}
