//! # Covenant
//!
//! Policy lifecycle governance: versioned policies with a monotonic
//! approval lifecycle, a tamper-evident hash-chained audit trail,
//! validated rollbacks that never rewrite history, and a decision cache
//! with trigger-based invalidation.
//!
//! [`Covenant`] wires the services around one [`VersionStore`] and
//! exposes the whole API surface. Rule evaluation stays behind the
//! [`DecisionEvaluator`] seam; compliance rules behind
//! [`ComplianceChecker`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use covenant::{Covenant, CovenantConfig, CreateVersionRequest, ChangeRequest};
//! use covenant_cache::{DecisionEvaluator, DecisionInput, DecisionMetadata};
//! use covenant_core::{OperationContext, PolicyId, PolicyVersion, RiskLevel};
//!
//! struct AllowAll;
//! impl DecisionEvaluator for AllowAll {
//!     fn evaluate(
//!         &self,
//!         _policy: &PolicyVersion,
//!         _input: &DecisionInput,
//!     ) -> covenant_core::CoreResult<(serde_json::Value, DecisionMetadata)> {
//!         Ok((serde_json::json!({"allow": true}), DecisionMetadata {
//!             risk: RiskLevel::Low,
//!             classification: Default::default(),
//!             audit_required: false,
//!         }))
//!     }
//! }
//!
//! let covenant = Covenant::new(CovenantConfig::default(), Arc::new(AllowAll)).unwrap();
//! let ctx = OperationContext::new("alice", "req-1");
//! covenant.create_version(
//!     CreateVersionRequest {
//!         policy_id: PolicyId::new("spending-limit"),
//!         version: "1.0.0".into(),
//!         content: serde_json::json!({"limit": 500}),
//!         category: "financial".into(),
//!         impact: RiskLevel::Medium,
//!         tags: vec![],
//!     },
//!     &ChangeRequest::routine("initial policy"),
//!     &ctx,
//! ).unwrap();
//! ```

pub mod config;
pub mod error;
mod trigger;

use std::sync::Arc;

use serde_json::json;

use covenant_audit::AuditTrailService;
use covenant_cache::{CacheStats, CachedDecision, DecisionCache, InMemoryCacheBackend};
use covenant_core::{
    AuditEntry, AuditEventType, AuditFilter, AuditOutcome, ChangeFilter, OperationContext,
    PlanId, PolicyChange, PolicyDiff, PolicyId, PolicyVersion, RollbackMetadata, RollbackPlan,
    RollbackTarget, VersionStatus, VersionStore,
};
use covenant_rollback::RollbackService;
use covenant_version::{InMemoryVersionStore, VersionService};

pub use config::CovenantConfig;
pub use error::{CovenantError, CovenantResult};
pub use trigger::StoreTriggerState;

// Re-export the working vocabulary so callers need one import path.
pub use covenant_audit::{AuditConfig, ChangeRequest, ComplianceReport, IntegrityReport};
pub use covenant_cache::{
    CacheConfig, DecisionEvaluator, DecisionInput, DecisionMetadata, TriggerState,
};
pub use covenant_rollback::{
    ComplianceChecker, NoopComplianceChecker, RollbackConfig, RollbackExecution, ValidationReport,
};
pub use covenant_version::{CreateVersionRequest, MergeResolution};

/// A decision answered through the cache, with its provenance.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub decision: serde_json::Value,
    pub metadata: DecisionMetadata,
    pub policy_version: String,
    pub from_cache: bool,
}

// ---------------------------------------------------------------------------
// Covenant
// ---------------------------------------------------------------------------

pub struct Covenant {
    store: Arc<dyn VersionStore>,
    audit: Arc<AuditTrailService>,
    versions: VersionService,
    rollbacks: RollbackService,
    cache: DecisionCache,
    evaluator: Arc<dyn DecisionEvaluator>,
    triggers: Arc<StoreTriggerState>,
}

impl Covenant {
    /// Build the full stack over an in-memory store with no compliance
    /// rules configured.
    pub fn new(
        config: CovenantConfig,
        evaluator: Arc<dyn DecisionEvaluator>,
    ) -> CovenantResult<Self> {
        Self::with_parts(
            config,
            Arc::new(InMemoryVersionStore::new()),
            evaluator,
            Arc::new(NoopComplianceChecker),
        )
    }

    /// Build over a caller-supplied store and compliance strategy.
    pub fn with_parts(
        config: CovenantConfig,
        store: Arc<dyn VersionStore>,
        evaluator: Arc<dyn DecisionEvaluator>,
        compliance: Arc<dyn ComplianceChecker>,
    ) -> CovenantResult<Self> {
        let key = config.integrity_key()?;
        let audit = Arc::new(AuditTrailService::new(
            store.clone(),
            key,
            config.audit.clone(),
        )?);
        let versions = VersionService::new(store.clone(), audit.clone());
        let rollbacks = RollbackService::new(
            store.clone(),
            audit.clone(),
            compliance,
            config.rollback.clone(),
        );
        let triggers = Arc::new(StoreTriggerState::new(store.clone()));
        let cache = DecisionCache::new(
            Arc::new(InMemoryCacheBackend::new()),
            triggers.clone(),
            config.cache.clone(),
        );
        tracing::info!("covenant stack initialized");
        Ok(Self {
            store,
            audit,
            versions,
            rollbacks,
            cache,
            evaluator,
            triggers,
        })
    }

    /// The underlying store, for direct reads and custom seeding.
    pub fn store(&self) -> Arc<dyn VersionStore> {
        self.store.clone()
    }

    // ---- Version operations ----

    pub fn create_version(
        &self,
        request: CreateVersionRequest,
        change: &ChangeRequest,
        ctx: &OperationContext,
    ) -> CovenantResult<PolicyVersion> {
        Ok(self.versions.create_version(request, change, ctx)?)
    }

    pub fn update_version(
        &self,
        policy_id: &PolicyId,
        version: &str,
        content: serde_json::Value,
        change: &ChangeRequest,
        ctx: &OperationContext,
    ) -> CovenantResult<PolicyVersion> {
        Ok(self
            .versions
            .update_version(policy_id, version, content, change, ctx)?)
    }

    pub fn submit_for_review(
        &self,
        policy_id: &PolicyId,
        version: &str,
        ctx: &OperationContext,
    ) -> CovenantResult<PolicyVersion> {
        Ok(self.versions.submit_for_review(policy_id, version, ctx)?)
    }

    pub fn approve_version(
        &self,
        policy_id: &PolicyId,
        version: &str,
        ctx: &OperationContext,
    ) -> CovenantResult<PolicyVersion> {
        Ok(self.versions.approve_version(policy_id, version, ctx)?)
    }

    /// Deploy an approved version and drop every cached decision made
    /// under the policy's previous versions.
    pub fn deploy_version(
        &self,
        policy_id: &PolicyId,
        version: &str,
        change: &ChangeRequest,
        ctx: &OperationContext,
    ) -> CovenantResult<(PolicyVersion, Option<String>)> {
        let deployed = self.versions.deploy_version(policy_id, version, change, ctx)?;
        self.invalidate_policy_decisions(
            policy_id,
            &format!("version {version} deployed"),
            ctx,
        )?;
        Ok(deployed)
    }

    pub fn compare_versions(
        &self,
        policy_id: &PolicyId,
        from: &str,
        to: &str,
    ) -> CovenantResult<PolicyDiff> {
        Ok(self.versions.compare_versions(policy_id, from, to)?)
    }

    pub fn branch_version(
        &self,
        policy_id: &PolicyId,
        source_version: &str,
        branch_name: &str,
        new_version: &str,
        ctx: &OperationContext,
    ) -> CovenantResult<PolicyVersion> {
        Ok(self
            .versions
            .branch_version(policy_id, source_version, branch_name, new_version, ctx)?)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn merge_versions(
        &self,
        policy_id: &PolicyId,
        left_version: &str,
        right_version: &str,
        new_version: &str,
        resolutions: &[MergeResolution],
        change: &ChangeRequest,
        ctx: &OperationContext,
    ) -> CovenantResult<PolicyVersion> {
        Ok(self.versions.merge_versions(
            policy_id,
            left_version,
            right_version,
            new_version,
            resolutions,
            change,
            ctx,
        )?)
    }

    pub fn get_version(
        &self,
        policy_id: &PolicyId,
        version: &str,
    ) -> CovenantResult<Option<PolicyVersion>> {
        Ok(self.store.get_version(policy_id, version)?)
    }

    pub fn get_all_versions(&self, policy_id: &PolicyId) -> CovenantResult<Vec<PolicyVersion>> {
        Ok(self.store.get_all_versions(policy_id)?)
    }

    pub fn active_version(&self, policy_id: &PolicyId) -> CovenantResult<Option<PolicyVersion>> {
        Ok(self
            .store
            .get_all_versions(policy_id)?
            .into_iter()
            .find(|v| v.status == VersionStatus::Active))
    }

    // ---- Rollback operations ----

    pub fn propose_rollback(
        &self,
        target: RollbackTarget,
        scope: Vec<PolicyId>,
        metadata: RollbackMetadata,
    ) -> CovenantResult<RollbackPlan> {
        Ok(self.rollbacks.propose_plan(target, scope, metadata)?)
    }

    pub fn validate_rollback(
        &self,
        plan_id: &PlanId,
        ctx: &OperationContext,
    ) -> CovenantResult<ValidationReport> {
        Ok(self.rollbacks.validate_plan(plan_id, ctx)?)
    }

    /// Execute an executable plan and invalidate cached decisions for
    /// every policy the execution touched.
    pub fn execute_rollback(
        &self,
        plan_id: &PlanId,
        change: &ChangeRequest,
        ctx: &OperationContext,
    ) -> CovenantResult<RollbackExecution> {
        let execution = self.rollbacks.execute_plan(plan_id, change, ctx)?;
        for outcome in execution.outcomes.iter().filter(|o| o.success) {
            self.invalidate_policy_decisions(
                &outcome.policy_id,
                &format!("rollback plan {plan_id} executed"),
                ctx,
            )?;
        }
        Ok(execution)
    }

    pub fn monitor_rollback(&self, plan_id: &PlanId) -> CovenantResult<Option<RollbackExecution>> {
        Ok(self.rollbacks.monitor_execution(plan_id)?)
    }

    pub fn abort_rollback(
        &self,
        plan_id: &PlanId,
        reason: &str,
        ctx: &OperationContext,
    ) -> CovenantResult<RollbackPlan> {
        Ok(self.rollbacks.abort_plan(plan_id, reason, ctx)?)
    }

    pub fn get_rollback_plan(&self, plan_id: &PlanId) -> CovenantResult<RollbackPlan> {
        Ok(self.rollbacks.get_plan(plan_id)?)
    }

    // ---- Decision operations ----

    /// Answer a decision request: cached when a valid entry exists,
    /// otherwise evaluated against the active version and cached.
    pub fn decide(
        &self,
        policy_id: &PolicyId,
        input: &DecisionInput,
    ) -> CovenantResult<DecisionOutcome> {
        if let Some(hit) = self.cache.get_cached_decision(policy_id, input)? {
            return Ok(DecisionOutcome {
                decision: hit.decision,
                metadata: hit.metadata,
                policy_version: hit.policy_version,
                from_cache: true,
            });
        }

        let active = self
            .active_version(policy_id)?
            .ok_or_else(|| CovenantError::NoActiveVersion(policy_id.to_string()))?;
        let (decision, metadata) = self.evaluator.evaluate(&active, input)?;
        let entry = self.cache.cache_decision(
            policy_id,
            &active.version,
            input,
            decision.clone(),
            metadata,
        )?;
        Ok(DecisionOutcome {
            decision,
            metadata,
            policy_version: entry.policy_version,
            from_cache: false,
        })
    }

    pub fn get_cached_decision(
        &self,
        policy_id: &PolicyId,
        input: &DecisionInput,
    ) -> CovenantResult<Option<CachedDecision>> {
        Ok(self.cache.get_cached_decision(policy_id, input)?)
    }

    /// Bulk-invalidate a policy's cached decisions, leaving an audit
    /// entry when anything was actually removed.
    pub fn invalidate_policy_decisions(
        &self,
        policy_id: &PolicyId,
        reason: &str,
        ctx: &OperationContext,
    ) -> CovenantResult<usize> {
        let removed = self.cache.invalidate_policy_decisions(policy_id, reason)?;
        self.record_invalidation(policy_id.as_str(), reason, removed, ctx)?;
        Ok(removed)
    }

    pub fn invalidate_user_decisions(
        &self,
        user: &str,
        reason: &str,
        ctx: &OperationContext,
    ) -> CovenantResult<usize> {
        let removed = self.cache.invalidate_user_decisions(user, reason)?;
        self.record_invalidation(user, reason, removed, ctx)?;
        Ok(removed)
    }

    pub fn invalidate_resource_decisions(
        &self,
        resource: &str,
        reason: &str,
        ctx: &OperationContext,
    ) -> CovenantResult<usize> {
        let removed = self.cache.invalidate_resource_decisions(resource, reason)?;
        self.record_invalidation(resource, reason, removed, ctx)?;
        Ok(removed)
    }

    fn record_invalidation(
        &self,
        target: &str,
        reason: &str,
        removed: usize,
        ctx: &OperationContext,
    ) -> CovenantResult<()> {
        if removed > 0 {
            self.audit.record_entry(
                AuditEventType::CacheInvalidated,
                target,
                json!({ "reason": reason, "removed": removed }),
                AuditOutcome::Success,
                ctx,
            )?;
        }
        Ok(())
    }

    pub fn cache_stats(&self) -> CovenantResult<CacheStats> {
        Ok(self.cache.stats()?)
    }

    /// Record that a user's consent changed; cached decisions that
    /// depended on the old consent stop being served immediately.
    pub fn notify_consent_change(&self, user: &str) {
        self.triggers.bump_consent(user);
    }

    /// Record that a user's role assignment changed.
    pub fn notify_role_change(&self, user: &str) {
        self.triggers.bump_role(user);
    }

    // ---- Audit queries ----

    pub fn audit_trail(
        &self,
        target: Option<&str>,
        filter: &AuditFilter,
    ) -> CovenantResult<Vec<AuditEntry>> {
        Ok(self.audit.audit_trail(target, filter)?)
    }

    pub fn verify_audit_integrity(&self, filter: &AuditFilter) -> CovenantResult<IntegrityReport> {
        Ok(self.audit.verify_integrity(filter)?)
    }

    pub fn generate_compliance_report(
        &self,
        from: covenant_core::Timestamp,
        to: covenant_core::Timestamp,
    ) -> CovenantResult<ComplianceReport> {
        Ok(self.audit.generate_compliance_report(from, to)?)
    }

    pub fn change_history(
        &self,
        policy_id: &PolicyId,
        filter: &ChangeFilter,
    ) -> CovenantResult<Vec<PolicyChange>> {
        Ok(self.store.get_changes(policy_id, filter)?)
    }
}
