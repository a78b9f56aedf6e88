//! In-memory implementation of the `VersionStore` contract.
//!
//! All state sits behind a single mutex, so writes to any one version are
//! serialized and reads observe the latest committed state. Useful for
//! testing and for embedders that do not need durability; a relational or
//! key-value backed implementation satisfies the same trait.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use covenant_core::{
    AuditEntry, AuditFilter, ChangeFilter, CoreError, CoreResult, PlanId, PolicyChange, PolicyId,
    PolicyVersion, RollbackPlan, VersionStatus, VersionStore,
};

#[derive(Default)]
struct Inner {
    versions: HashMap<String, Vec<PolicyVersion>>,
    changes: Vec<PolicyChange>,
    audit: Vec<AuditEntry>,
    plans: HashMap<String, RollbackPlan>,
}

#[derive(Default)]
pub struct InMemoryVersionStore {
    inner: Mutex<Inner>,
}

fn lock_inner(mutex: &Mutex<Inner>) -> CoreResult<MutexGuard<'_, Inner>> {
    mutex
        .lock()
        .map_err(|e| CoreError::Storage(format!("lock poisoned: {}", e)))
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Number of stored versions across all policies (for inspection).
    pub fn version_count(&self) -> usize {
        lock_inner(&self.inner)
            .map(|inner| inner.versions.values().map(|v| v.len()).sum())
            .unwrap_or(0)
    }
}

impl VersionStore for InMemoryVersionStore {
    fn save_version(&self, version: &PolicyVersion) -> CoreResult<()> {
        let mut inner = lock_inner(&self.inner)?;
        let versions = inner
            .versions
            .entry(version.policy_id.as_str().to_string())
            .or_default();
        match versions.iter_mut().find(|v| v.version == version.version) {
            Some(existing) => *existing = version.clone(),
            None => versions.push(version.clone()),
        }
        Ok(())
    }

    fn get_version(&self, policy_id: &PolicyId, version: &str) -> CoreResult<Option<PolicyVersion>> {
        let inner = lock_inner(&self.inner)?;
        Ok(inner
            .versions
            .get(policy_id.as_str())
            .and_then(|versions| versions.iter().find(|v| v.version == version))
            .cloned())
    }

    fn get_latest_version(&self, policy_id: &PolicyId) -> CoreResult<Option<PolicyVersion>> {
        let inner = lock_inner(&self.inner)?;
        Ok(inner
            .versions
            .get(policy_id.as_str())
            .and_then(|versions| versions.last())
            .cloned())
    }

    fn get_all_versions(&self, policy_id: &PolicyId) -> CoreResult<Vec<PolicyVersion>> {
        let inner = lock_inner(&self.inner)?;
        Ok(inner
            .versions
            .get(policy_id.as_str())
            .cloned()
            .unwrap_or_default())
    }

    fn activate_version(&self, policy_id: &PolicyId, version: &str) -> CoreResult<Option<String>> {
        let mut inner = lock_inner(&self.inner)?;
        let versions = inner
            .versions
            .get_mut(policy_id.as_str())
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown policy {}", policy_id)))?;

        let target_index = versions
            .iter()
            .position(|v| v.version == version)
            .ok_or_else(|| {
                CoreError::InvalidInput(format!("version {} of {} not found", version, policy_id))
            })?;
        if versions[target_index].status != VersionStatus::Approved {
            return Err(CoreError::InvalidInput(format!(
                "version {} of {} is {}, not approved",
                version, policy_id, versions[target_index].status
            )));
        }

        // Deprecate the current active version and activate the target in
        // the same critical section, so no observer sees two actives.
        let mut deprecated = None;
        for v in versions.iter_mut() {
            if v.status == VersionStatus::Active {
                v.status = VersionStatus::Deprecated;
                deprecated = Some(v.version.clone());
            }
        }
        versions[target_index].status = VersionStatus::Active;
        Ok(deprecated)
    }

    fn save_change(&self, change: &PolicyChange) -> CoreResult<()> {
        let mut inner = lock_inner(&self.inner)?;
        inner.changes.push(change.clone());
        Ok(())
    }

    fn get_changes(
        &self,
        policy_id: &PolicyId,
        filter: &ChangeFilter,
    ) -> CoreResult<Vec<PolicyChange>> {
        let inner = lock_inner(&self.inner)?;
        Ok(inner
            .changes
            .iter()
            .filter(|c| c.policy_id == *policy_id && filter.matches(c))
            .cloned()
            .collect())
    }

    fn save_audit_entry(&self, entry: &AuditEntry) -> CoreResult<()> {
        let mut inner = lock_inner(&self.inner)?;
        inner.audit.push(entry.clone());
        Ok(())
    }

    fn get_audit_trail(
        &self,
        target: Option<&str>,
        filter: &AuditFilter,
    ) -> CoreResult<Vec<AuditEntry>> {
        let inner = lock_inner(&self.inner)?;
        let mut entries: Vec<AuditEntry> = inner
            .audit
            .iter()
            .filter(|e| target.map(|t| e.target == t).unwrap_or(true) && filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    fn save_rollback_plan(&self, plan: &RollbackPlan) -> CoreResult<()> {
        let mut inner = lock_inner(&self.inner)?;
        inner
            .plans
            .insert(plan.plan_id.as_str().to_string(), plan.clone());
        Ok(())
    }

    fn get_rollback_plan(&self, plan_id: &PlanId) -> CoreResult<Option<RollbackPlan>> {
        let inner = lock_inner(&self.inner)?;
        Ok(inner.plans.get(plan_id.as_str()).cloned())
    }
}
