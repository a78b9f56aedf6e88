//! Report types produced by rollback validation and execution.

use serde::{Deserialize, Serialize};

use covenant_core::{ConflictSeverity, PlanId, PolicyId, PolicyVersion, Timestamp};

// ---------------------------------------------------------------------------
// Validation checks
// ---------------------------------------------------------------------------

/// One named check against one policy (or the plan as a whole when
/// `policy_id` is `None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    #[serde(default)]
    pub policy_id: Option<PolicyId>,
    pub passed: bool,
    pub severity: ConflictSeverity,
    pub message: String,
}

impl ValidationCheck {
    pub fn passed(name: impl Into<String>, policy_id: PolicyId, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy_id: Some(policy_id),
            passed: true,
            severity: ConflictSeverity::Low,
            message: message.into(),
        }
    }

    pub fn failed(
        name: impl Into<String>,
        policy_id: Option<PolicyId>,
        severity: ConflictSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            policy_id,
            passed: false,
            severity,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conflicts and resolution options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    VersionMismatch,
    CircularDependency,
    OrphanedDependency,
    ConcurrentModification,
    Compliance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    StagedRollback,
    ExcludeFromScope,
    RemoveDependencyEdge,
    CoordinateWithAuthors,
    ManualReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionOption {
    pub kind: ResolutionKind,
    pub description: String,
}

/// A detected structural risk in a rollback plan. Execution is blocked
/// only by `Critical` severity; everything else is surfaced for the
/// caller to weigh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub description: String,
    pub affected_policies: Vec<PolicyId>,
    pub auto_resolvable: bool,
    pub resolutions: Vec<ResolutionOption>,
}

// ---------------------------------------------------------------------------
// ValidationReport
// ---------------------------------------------------------------------------

/// One resolved rollback target: the concrete version a policy would be
/// rolled back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub policy_id: PolicyId,
    pub version: String,
    #[serde(skip)]
    pub resolved: Option<PolicyVersion>,
}

impl ResolvedTarget {
    pub fn new(version: PolicyVersion) -> Self {
        Self {
            policy_id: version.policy_id.clone(),
            version: version.version.clone(),
            resolved: Some(version),
        }
    }
}

/// The structured answer to "can this plan run, and if not, why".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub plan_id: PlanId,
    pub validated_at: Timestamp,
    pub valid: bool,
    pub checks: Vec<ValidationCheck>,
    pub conflicts: Vec<Conflict>,
    pub resolved_targets: Vec<ResolvedTarget>,
    pub rollback_order: Vec<PolicyId>,
    pub orphaned: Vec<PolicyId>,
    pub recommendations: Vec<String>,
    pub duration_ms: u64,
}

impl ValidationReport {
    pub fn critical_failures(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == ConflictSeverity::Critical)
            .count()
    }

    pub fn critical_conflicts(&self) -> usize {
        self.conflicts
            .iter()
            .filter(|c| c.severity == ConflictSeverity::Critical)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Execution outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    PartiallyCompleted,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub policy_id: PolicyId,
    pub success: bool,
    #[serde(default)]
    pub new_version: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackExecution {
    pub plan_id: PlanId,
    pub status: ExecutionStatus,
    pub outcomes: Vec<PolicyOutcome>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}
