use crate::error::CoreResult;
use crate::types::{
    AuditEntry, AuditFilter, ChangeFilter, PlanId, PolicyChange, PolicyId, PolicyVersion,
    RollbackPlan,
};

// ---------------------------------------------------------------------------
// VersionStore — the persistence contract every service consumes
//
// The store is the single source of truth. Implementations must serialize
// writes to a single version (no lost updates under concurrent approval)
// and return the latest committed state on reads. Any persistence error
// aborts the enclosing operation with no partial write.
// ---------------------------------------------------------------------------

pub trait VersionStore: Send + Sync {
    fn save_version(&self, version: &PolicyVersion) -> CoreResult<()>;
    fn get_version(&self, policy_id: &PolicyId, version: &str) -> CoreResult<Option<PolicyVersion>>;
    fn get_latest_version(&self, policy_id: &PolicyId) -> CoreResult<Option<PolicyVersion>>;
    fn get_all_versions(&self, policy_id: &PolicyId) -> CoreResult<Vec<PolicyVersion>>;

    /// Atomically mark `version` Active and deprecate the previously
    /// Active version of the same policy, in one critical section.
    /// Returns the version string that was deprecated, if any.
    fn activate_version(&self, policy_id: &PolicyId, version: &str) -> CoreResult<Option<String>>;

    fn save_change(&self, change: &PolicyChange) -> CoreResult<()>;
    fn get_changes(&self, policy_id: &PolicyId, filter: &ChangeFilter)
        -> CoreResult<Vec<PolicyChange>>;

    fn save_audit_entry(&self, entry: &AuditEntry) -> CoreResult<()>;

    /// Audit entries for one target (policy id, plan id) or, with
    /// `target = None`, across all targets. Returned in timestamp order.
    fn get_audit_trail(&self, target: Option<&str>, filter: &AuditFilter)
        -> CoreResult<Vec<AuditEntry>>;

    fn save_rollback_plan(&self, plan: &RollbackPlan) -> CoreResult<()>;
    fn get_rollback_plan(&self, plan_id: &PlanId) -> CoreResult<Option<RollbackPlan>>;
}
