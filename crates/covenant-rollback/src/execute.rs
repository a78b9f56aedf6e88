//! Plan execution, monitoring, and pre-execution abort.
//!
//! A rollback never mutates history: each in-scope policy gets a new
//! version carrying the target's content, approved and activated through
//! the store's single critical section. Partial completion is recorded
//! explicitly; nothing is silently rolled further back.

use serde_json::json;

use covenant_audit::ChangeRequest;
use covenant_core::{
    AuditEventType, AuditOutcome, OperationContext, PlanId, PlanState, PolicyId, PolicyVersion,
    RollbackPlan, Timestamp, VersionMetadata, VersionStatus,
};

use crate::error::{RollbackError, RollbackResult};
use crate::resolve::resolve_target;
use crate::types::{ExecutionStatus, PolicyOutcome, RollbackExecution};
use crate::validate::RollbackService;

impl RollbackService {
    /// Execute a plan that validation marked `Executable`. Returns the
    /// per-policy outcomes; consult `monitor_execution` afterwards.
    pub fn execute_plan(
        &self,
        plan_id: &PlanId,
        change: &ChangeRequest,
        ctx: &OperationContext,
    ) -> RollbackResult<RollbackExecution> {
        let mut plan = self.get_plan(plan_id)?;
        if plan.state != PlanState::Executable {
            return Err(RollbackError::InvalidPlanState {
                plan_id: plan_id.to_string(),
                state: plan.state,
                attempted: "execute",
            });
        }

        let started_at = Timestamp::now();
        let mut outcomes: Vec<PolicyOutcome> = Vec::new();
        for policy_id in plan.scope.clone() {
            outcomes.push(self.roll_back_policy(&policy_id, &plan, change, ctx));
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let status = if succeeded == outcomes.len() {
            ExecutionStatus::Completed
        } else if succeeded > 0 {
            ExecutionStatus::PartiallyCompleted
        } else {
            ExecutionStatus::Aborted
        };

        plan.state = if status == ExecutionStatus::Aborted {
            PlanState::Aborted
        } else {
            PlanState::Executed
        };
        self.store.save_rollback_plan(&plan)?;

        let execution = RollbackExecution {
            plan_id: plan_id.clone(),
            status,
            outcomes,
            started_at,
            finished_at: Timestamp::now(),
        };
        self.lock_executions()?
            .insert(plan_id.clone(), execution.clone());

        let (event, outcome) = if status == ExecutionStatus::Aborted {
            (AuditEventType::RollbackAborted, AuditOutcome::Failure)
        } else {
            (AuditEventType::RollbackExecuted, AuditOutcome::Success)
        };
        self.audit.record_entry(
            event,
            plan_id.as_str(),
            json!({
                "status": status,
                "succeeded": succeeded,
                "total": execution.outcomes.len(),
            }),
            outcome,
            ctx,
        )?;

        tracing::info!(plan = %plan_id, ?status, succeeded, "rollback plan executed");
        Ok(execution)
    }

    /// Roll one policy back to its resolved target by creating, approving
    /// and activating a fresh version with the target's content. Failures
    /// become a failed outcome, never an early return, so the remaining
    /// policies still execute.
    fn roll_back_policy(
        &self,
        policy_id: &PolicyId,
        plan: &RollbackPlan,
        change: &ChangeRequest,
        ctx: &OperationContext,
    ) -> PolicyOutcome {
        let failure = |detail: String| PolicyOutcome {
            policy_id: policy_id.clone(),
            success: false,
            new_version: None,
            detail,
        };

        let target = match resolve_target(self.store.as_ref(), policy_id, &plan.target) {
            Ok(Some(version)) => version,
            Ok(None) => return failure("rollback target no longer resolves".into()),
            Err(e) => return failure(format!("target resolution: {e}")),
        };
        let prior_active = match self.store.get_all_versions(policy_id) {
            Ok(versions) => versions.into_iter().find(|v| v.status == VersionStatus::Active),
            Err(e) => return failure(format!("loading versions: {e}")),
        };

        let existing = match self.store.get_all_versions(policy_id) {
            Ok(versions) => versions,
            Err(e) => return failure(format!("loading versions: {e}")),
        };
        let new_version = next_rollback_version(&target.version, &existing);
        let now = Timestamp::now();
        let rolled = PolicyVersion {
            policy_id: policy_id.clone(),
            version: new_version.clone(),
            content_hash: target.content_hash.clone(),
            content: target.content.clone(),
            metadata: VersionMetadata {
                category: target.metadata.category.clone(),
                impact: plan.metadata.declared_risk,
                approver: Some(ctx.user_id.clone()),
                created_at: now,
                updated_at: now,
            },
            parent_version: prior_active.as_ref().map(|v| v.version.clone()),
            branches: Vec::new(),
            tags: vec![format!("rollback:{}", target.version)],
            status: VersionStatus::Approved,
        };

        if let Err(e) = self.store.save_version(&rolled) {
            return failure(format!("saving rollback version: {e}"));
        }
        if let Err(e) = self.store.activate_version(policy_id, &new_version) {
            return failure(format!("activating rollback version: {e}"));
        }
        if let Err(e) =
            self.audit
                .record_policy_change(prior_active.as_ref(), &rolled, change, Vec::new())
        {
            return failure(format!("recording change: {e}"));
        }

        PolicyOutcome {
            policy_id: policy_id.clone(),
            success: true,
            new_version: Some(new_version),
            detail: format!("rolled back to content of {}", target.version),
        }
    }

    /// Execution record for a plan, if it has started.
    pub fn monitor_execution(&self, plan_id: &PlanId) -> RollbackResult<Option<RollbackExecution>> {
        Ok(self.lock_executions()?.get(plan_id).cloned())
    }

    /// Abort a plan before execution begins. Terminal plans cannot be
    /// aborted; a started execution records partial completion instead.
    pub fn abort_plan(
        &self,
        plan_id: &PlanId,
        reason: &str,
        ctx: &OperationContext,
    ) -> RollbackResult<RollbackPlan> {
        let mut plan = self.get_plan(plan_id)?;
        if plan.state.is_terminal() {
            return Err(RollbackError::InvalidPlanState {
                plan_id: plan_id.to_string(),
                state: plan.state,
                attempted: "abort",
            });
        }
        plan.state = PlanState::Aborted;
        self.store.save_rollback_plan(&plan)?;

        self.audit.record_entry(
            AuditEventType::RollbackAborted,
            plan_id.as_str(),
            json!({ "reason": reason }),
            AuditOutcome::Success,
            ctx,
        )?;
        tracing::info!(plan = %plan_id, reason, "rollback plan aborted");
        Ok(plan)
    }
}

/// Version string for the new rollback version: `{target}-rb{n}` with the
/// first unused `n`.
fn next_rollback_version(target_version: &str, existing: &[PolicyVersion]) -> String {
    let mut n = 1;
    loop {
        let candidate = format!("{target_version}-rb{n}");
        if !existing.iter().any(|v| v.version == candidate) {
            return candidate;
        }
        n += 1;
    }
}
