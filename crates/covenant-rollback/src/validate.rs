//! Plan proposal and validation.
//!
//! Validation always returns a structured report. Store failures and
//! budget overruns inside the validation pipeline collapse into a single
//! synthetic `validation_error` check; they never propagate out of
//! `validate_plan` as an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;

use covenant_audit::AuditTrailService;
use covenant_core::{
    AuditEventType, AuditOutcome, ChangeFilter, ConflictSeverity, OperationContext, PlanId,
    PlanState, PolicyId, PolicyVersion, RollbackMetadata, RollbackPlan, RollbackTarget, Timestamp,
    VersionStore,
};

use crate::conflict::{
    concurrent_modification_conflicts, dependency_conflicts, version_mismatch_conflicts,
    ComplianceChecker,
};
use crate::error::{RollbackError, RollbackResult};
use crate::graph::DependencyGraph;
use crate::resolve::{is_stable, resolve_target};
use crate::types::{
    Conflict, ConflictKind, ResolvedTarget, RollbackExecution, ValidationCheck, ValidationReport,
};

// ---------------------------------------------------------------------------
// RollbackConfig
// ---------------------------------------------------------------------------

fn default_validation_timeout_secs() -> u64 {
    300
}

fn default_version_mismatch_window_days() -> u64 {
    30
}

fn default_concurrent_modification_window_secs() -> u64 {
    3_600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    #[serde(default = "default_validation_timeout_secs")]
    pub validation_timeout_secs: u64,
    #[serde(default = "default_version_mismatch_window_days")]
    pub version_mismatch_window_days: u64,
    #[serde(default = "default_concurrent_modification_window_secs")]
    pub concurrent_modification_window_secs: u64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            validation_timeout_secs: default_validation_timeout_secs(),
            version_mismatch_window_days: default_version_mismatch_window_days(),
            concurrent_modification_window_secs: default_concurrent_modification_window_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// RollbackService
// ---------------------------------------------------------------------------

pub struct RollbackService {
    pub(crate) store: Arc<dyn VersionStore>,
    pub(crate) audit: Arc<AuditTrailService>,
    pub(crate) compliance: Arc<dyn ComplianceChecker>,
    pub(crate) config: RollbackConfig,
    pub(crate) executions: Mutex<HashMap<PlanId, RollbackExecution>>,
}

impl RollbackService {
    pub fn new(
        store: Arc<dyn VersionStore>,
        audit: Arc<AuditTrailService>,
        compliance: Arc<dyn ComplianceChecker>,
        config: RollbackConfig,
    ) -> Self {
        Self {
            store,
            audit,
            compliance,
            config,
            executions: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn lock_executions(
        &self,
    ) -> RollbackResult<MutexGuard<'_, HashMap<PlanId, RollbackExecution>>> {
        self.executions
            .lock()
            .map_err(|e| RollbackError::Internal(format!("execution registry lock: {e}")))
    }

    /// Propose a new plan in the `Proposed` state.
    pub fn propose_plan(
        &self,
        target: RollbackTarget,
        scope: Vec<PolicyId>,
        metadata: RollbackMetadata,
    ) -> RollbackResult<RollbackPlan> {
        if scope.is_empty() {
            return Err(RollbackError::Internal("plan scope is empty".into()));
        }
        let plan = RollbackPlan {
            plan_id: PlanId::new(uuid::Uuid::new_v4().to_string()),
            target,
            scope,
            metadata,
            state: PlanState::Proposed,
            created_at: Timestamp::now(),
        };
        self.store.save_rollback_plan(&plan)?;
        tracing::info!(plan = %plan.plan_id, policies = plan.scope.len(), "rollback plan proposed");
        Ok(plan)
    }

    pub fn get_plan(&self, plan_id: &PlanId) -> RollbackResult<RollbackPlan> {
        self.store
            .get_rollback_plan(plan_id)?
            .ok_or_else(|| RollbackError::PlanNotFound(plan_id.to_string()))
    }

    /// Validate a plan: resolve targets, analyze dependencies, detect
    /// conflicts, decide. Moves the plan to `Executable` or `Blocked`.
    pub fn validate_plan(
        &self,
        plan_id: &PlanId,
        ctx: &OperationContext,
    ) -> RollbackResult<ValidationReport> {
        let mut plan = self.get_plan(plan_id)?;
        if plan.state.is_terminal() {
            return Err(RollbackError::InvalidPlanState {
                plan_id: plan_id.to_string(),
                state: plan.state,
                attempted: "validate",
            });
        }

        let started = Instant::now();
        let budget = Duration::from_secs(self.config.validation_timeout_secs);
        let mut report = match self.run_validation(&plan, started, budget) {
            Ok(report) => report,
            Err(message) => self.failure_report(&plan, message),
        };

        report.valid = report.critical_failures() == 0 && report.critical_conflicts() == 0;
        report.recommendations = recommendations(&report);
        report.validated_at = Timestamp::now();
        report.duration_ms = started.elapsed().as_millis() as u64;

        plan.state = if report.valid {
            PlanState::Executable
        } else {
            PlanState::Blocked
        };
        self.store.save_rollback_plan(&plan)?;

        let outcome = if report.valid {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        };
        self.audit.record_entry(
            AuditEventType::RollbackValidated,
            plan_id.as_str(),
            json!({
                "valid": report.valid,
                "checks": report.checks.len(),
                "conflicts": report.conflicts.len(),
                "rollback_order": report.rollback_order,
            }),
            outcome,
            ctx,
        )?;

        tracing::info!(
            plan = %plan_id,
            valid = report.valid,
            conflicts = report.conflicts.len(),
            "rollback plan validated"
        );
        Ok(report)
    }

    /// The validation pipeline proper. Any `Err` here is a message for
    /// the synthetic failure check, not a propagated error.
    fn run_validation(
        &self,
        plan: &RollbackPlan,
        started: Instant,
        budget: Duration,
    ) -> Result<ValidationReport, String> {
        let now = Timestamp::now();
        let mut checks: Vec<ValidationCheck> = Vec::new();
        let mut resolved_targets: Vec<ResolvedTarget> = Vec::new();
        let mut resolved_versions: Vec<PolicyVersion> = Vec::new();
        let mut current_versions: Vec<PolicyVersion> = Vec::new();

        // Phase 1: target resolution and stability, per policy
        for policy_id in &plan.scope {
            match resolve_target(self.store.as_ref(), policy_id, &plan.target)
                .map_err(|e| format!("target resolution for {policy_id}: {e}"))?
            {
                None => {
                    checks.push(ValidationCheck::failed(
                        "target_resolution",
                        Some(policy_id.clone()),
                        ConflictSeverity::Critical,
                        format!("no version of {policy_id} matches the rollback target"),
                    ));
                }
                Some(version) => {
                    checks.push(ValidationCheck::passed(
                        "target_resolution",
                        policy_id.clone(),
                        format!("resolved to version {}", version.version),
                    ));
                    if is_stable(&version) {
                        checks.push(ValidationCheck::passed(
                            "stability",
                            policy_id.clone(),
                            format!("version {} is {:?}", version.version, version.status),
                        ));
                    } else {
                        checks.push(ValidationCheck::failed(
                            "stability",
                            Some(policy_id.clone()),
                            ConflictSeverity::High,
                            format!(
                                "version {} is {:?}, never deployed or approved",
                                version.version, version.status
                            ),
                        ));
                    }
                    resolved_targets.push(ResolvedTarget::new(version.clone()));
                    resolved_versions.push(version);
                }
            }
            if let Some(latest) = self
                .store
                .get_latest_version(policy_id)
                .map_err(|e| format!("loading current version of {policy_id}: {e}"))?
            {
                current_versions.push(latest);
            }
        }
        check_budget(started, budget)?;

        // Phase 2: dependency analysis over the resolved targets
        let graph = DependencyGraph::build(&resolved_versions);
        let rollback_order = graph.rollback_order(&plan.scope);
        let orphaned = graph.orphans(&plan.scope);
        check_budget(started, budget)?;

        // Phase 3: conflict detection
        let mut conflicts: Vec<Conflict> = Vec::new();
        conflicts.extend(version_mismatch_conflicts(
            &resolved_versions,
            &current_versions,
            self.config.version_mismatch_window_days,
            now,
        ));
        conflicts.extend(dependency_conflicts(&graph, &plan.scope));

        let mut recent_changes = Vec::new();
        for policy_id in &plan.scope {
            let changes = self
                .store
                .get_changes(policy_id, &ChangeFilter::default())
                .map_err(|e| format!("loading changes for {policy_id}: {e}"))?;
            recent_changes.extend(changes);
        }
        conflicts.extend(concurrent_modification_conflicts(
            &recent_changes,
            self.config.concurrent_modification_window_secs,
            now,
        ));
        conflicts.extend(self.compliance.check(plan, &resolved_versions));
        check_budget(started, budget)?;

        Ok(ValidationReport {
            plan_id: plan.plan_id.clone(),
            validated_at: now,
            valid: false, // decided by the caller
            checks,
            conflicts,
            resolved_targets,
            rollback_order,
            orphaned,
            recommendations: Vec::new(),
            duration_ms: 0,
        })
    }

    /// Collapse an unexpected validation failure into a report with a
    /// single critical `validation_error` check.
    fn failure_report(&self, plan: &RollbackPlan, message: String) -> ValidationReport {
        tracing::warn!(plan = %plan.plan_id, error = %message, "validation failed");
        ValidationReport {
            plan_id: plan.plan_id.clone(),
            validated_at: Timestamp::now(),
            valid: false,
            checks: vec![ValidationCheck::failed(
                "validation_error",
                None,
                ConflictSeverity::Critical,
                message,
            )],
            conflicts: Vec::new(),
            resolved_targets: Vec::new(),
            rollback_order: Vec::new(),
            orphaned: Vec::new(),
            recommendations: Vec::new(),
            duration_ms: 0,
        }
    }
}

fn check_budget(started: Instant, budget: Duration) -> Result<(), String> {
    if started.elapsed() > budget {
        Err(format!(
            "validation exceeded its {}s budget",
            budget.as_secs()
        ))
    } else {
        Ok(())
    }
}

/// Human-readable guidance for a blocked plan.
fn recommendations(report: &ValidationReport) -> Vec<String> {
    if report.valid {
        return Vec::new();
    }
    let mut out = Vec::new();
    let critical = report.critical_failures() + report.critical_conflicts();
    if critical > 0 {
        out.push(format!("resolve {critical} critical finding(s) before execution"));
    }
    if report
        .conflicts
        .iter()
        .any(|c| c.kind == ConflictKind::CircularDependency)
    {
        out.push("break circular dependencies before rollback".into());
    }
    if report
        .conflicts
        .iter()
        .any(|c| c.kind == ConflictKind::ConcurrentModification)
    {
        out.push("coordinate with authors of recent changes".into());
    }
    if report.checks.iter().any(|c| !c.passed && c.name == "target_resolution") {
        out.push("narrow the scope to policies with a resolvable target".into());
    }
    if out.is_empty() {
        out.push("review reported conflicts and revalidate".into());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::NoopComplianceChecker;
    use crate::types::ExecutionStatus;
    use covenant_audit::{AuditConfig, AuditTrailService, ChangeRequest};
    use covenant_core::{RiskLevel, RollbackMetadata, VersionMetadata, VersionStatus};
    use covenant_version::InMemoryVersionStore;
    use serde_json::json;

    fn service() -> RollbackService {
        let store = Arc::new(InMemoryVersionStore::new());
        let audit = Arc::new(
            AuditTrailService::new(store.clone(), [3u8; 32], AuditConfig::default()).unwrap(),
        );
        RollbackService::new(
            store,
            audit,
            Arc::new(NoopComplianceChecker),
            RollbackConfig::default(),
        )
    }

    fn seed(
        service: &RollbackService,
        policy: &str,
        version: &str,
        content: serde_json::Value,
        status: VersionStatus,
    ) {
        let now = Timestamp::now();
        service
            .store
            .save_version(&PolicyVersion {
                policy_id: PolicyId::new(policy),
                version: version.into(),
                content_hash: covenant_core::crypto::content_hash(&content).unwrap(),
                content,
                metadata: VersionMetadata {
                    category: "access".into(),
                    impact: RiskLevel::Low,
                    approver: None,
                    created_at: now,
                    updated_at: now,
                },
                parent_version: None,
                branches: vec![],
                tags: vec![],
                status,
            })
            .unwrap();
    }

    fn seed_active(service: &RollbackService, policy: &str, version: &str, content: serde_json::Value) {
        seed(service, policy, version, content, VersionStatus::Active);
    }

    fn metadata() -> RollbackMetadata {
        RollbackMetadata {
            justification: "incident".into(),
            estimated_duration_secs: 60,
            declared_risk: RiskLevel::Medium,
            approval_required: false,
            maintenance_window: None,
        }
    }

    fn ctx() -> OperationContext {
        OperationContext::new("op", "req-9")
    }

    #[test]
    fn test_valid_plan_becomes_executable() {
        let service = service();
        seed_active(&service, "p1", "1.0.0", json!({"a": 1}));

        let plan = service
            .propose_plan(
                RollbackTarget::Version("1.0.0".into()),
                vec![PolicyId::new("p1")],
                metadata(),
            )
            .unwrap();
        assert_eq!(plan.state, PlanState::Proposed);

        let report = service.validate_plan(&plan.plan_id, &ctx()).unwrap();
        assert!(report.valid);
        assert!(report.checks.iter().all(|c| c.passed));
        assert_eq!(service.get_plan(&plan.plan_id).unwrap().state, PlanState::Executable);
    }

    #[test]
    fn test_unresolved_target_blocks_only_that_policy() {
        let service = service();
        seed_active(&service, "p1", "1.0.0", json!({}));
        // p2 has no version matching the target
        seed_active(&service, "p2", "2.0.0", json!({}));

        let plan = service
            .propose_plan(
                RollbackTarget::Version("1.0.0".into()),
                vec![PolicyId::new("p1"), PolicyId::new("p2")],
                metadata(),
            )
            .unwrap();
        let report = service.validate_plan(&plan.plan_id, &ctx()).unwrap();

        assert!(!report.valid);
        let p1_checks: Vec<_> = report
            .checks
            .iter()
            .filter(|c| c.policy_id == Some(PolicyId::new("p1")))
            .collect();
        assert!(p1_checks.iter().all(|c| c.passed));
        assert!(report
            .checks
            .iter()
            .any(|c| !c.passed
                && c.name == "target_resolution"
                && c.policy_id == Some(PolicyId::new("p2"))));
        assert_eq!(service.get_plan(&plan.plan_id).unwrap().state, PlanState::Blocked);
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn test_cycle_reported_in_validation() {
        let service = service();
        for (policy, dep) in [("a", "b"), ("b", "c"), ("c", "a")] {
            seed_active(
                &service,
                policy,
                "1.0.0",
                json!({"dependencies": [{"depends_on": dep}]}),
            );
        }
        let plan = service
            .propose_plan(
                RollbackTarget::Version("1.0.0".into()),
                vec![PolicyId::new("a"), PolicyId::new("b"), PolicyId::new("c")],
                metadata(),
            )
            .unwrap();
        let report = service.validate_plan(&plan.plan_id, &ctx()).unwrap();

        let cycles: Vec<_> = report
            .conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::CircularDependency)
            .collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].affected_policies.len(), 3);
    }

    #[test]
    fn test_execute_creates_new_active_version() {
        let service = service();
        seed(&service, "p1", "1.0.0", json!({"limit": 5}), VersionStatus::Approved);
        // a later version is currently active
        seed_active(&service, "p1", "2.0.0", json!({"limit": 50}));

        let plan = service
            .propose_plan(
                RollbackTarget::Version("1.0.0".into()),
                vec![PolicyId::new("p1")],
                metadata(),
            )
            .unwrap();
        service.validate_plan(&plan.plan_id, &ctx()).unwrap();

        let execution = service
            .execute_plan(&plan.plan_id, &ChangeRequest::routine("incident"), &ctx())
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.outcomes.len(), 1);
        let new_version = execution.outcomes[0].new_version.clone().unwrap();
        assert_eq!(new_version, "1.0.0-rb1");

        let active = service
            .store
            .get_version(&PolicyId::new("p1"), &new_version)
            .unwrap()
            .unwrap();
        assert_eq!(active.status, VersionStatus::Active);
        assert_eq!(active.content, json!({"limit": 5}));

        // terminal plans cannot run twice
        let again = service.execute_plan(&plan.plan_id, &ChangeRequest::routine("again"), &ctx());
        assert!(matches!(again, Err(RollbackError::InvalidPlanState { .. })));
        assert!(service.monitor_execution(&plan.plan_id).unwrap().is_some());
    }

    #[test]
    fn test_execute_requires_executable_state() {
        let service = service();
        seed_active(&service, "p1", "1.0.0", json!({}));
        let plan = service
            .propose_plan(
                RollbackTarget::Version("1.0.0".into()),
                vec![PolicyId::new("p1")],
                metadata(),
            )
            .unwrap();
        let err = service.execute_plan(&plan.plan_id, &ChangeRequest::routine("x"), &ctx());
        assert!(matches!(
            err,
            Err(RollbackError::InvalidPlanState { attempted: "execute", .. })
        ));
    }

    #[test]
    fn test_abort_before_execution() {
        let service = service();
        seed_active(&service, "p1", "1.0.0", json!({}));
        let plan = service
            .propose_plan(
                RollbackTarget::Version("1.0.0".into()),
                vec![PolicyId::new("p1")],
                metadata(),
            )
            .unwrap();
        let aborted = service.abort_plan(&plan.plan_id, "no longer needed", &ctx()).unwrap();
        assert_eq!(aborted.state, PlanState::Aborted);

        let err = service.validate_plan(&plan.plan_id, &ctx());
        assert!(matches!(
            err,
            Err(RollbackError::InvalidPlanState { attempted: "validate", .. })
        ));
    }
}
