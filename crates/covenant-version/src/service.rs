//! Lifecycle orchestration for policy versions.
//!
//! Every mutating operation persists through the store, then emits exactly
//! one audit entry before returning success; content-bearing transitions
//! additionally record an immutable `PolicyChange` with the structural
//! diff and its rollback changeset. Invalid lifecycle moves are rejected
//! with a typed error and no side effects.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use covenant_audit::{AuditTrailService, ChangeRequest};
use covenant_core::{
    crypto, AuditEventType, AuditOutcome, OperationContext, PolicyDiff, PolicyId, PolicyVersion,
    RiskLevel, Timestamp, VersionMetadata, VersionStatus, VersionStore,
};

use crate::error::{VersionError, VersionResult};
use crate::merge::{three_way_merge, MergeResolution};

// ---------------------------------------------------------------------------
// CreateVersionRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVersionRequest {
    pub policy_id: PolicyId,
    pub version: String,
    pub content: serde_json::Value,
    pub category: String,
    #[serde(default)]
    pub impact: RiskLevel,
    #[serde(default)]
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// VersionService
// ---------------------------------------------------------------------------

pub struct VersionService {
    store: Arc<dyn VersionStore>,
    audit: Arc<AuditTrailService>,
}

impl VersionService {
    pub fn new(store: Arc<dyn VersionStore>, audit: Arc<AuditTrailService>) -> Self {
        Self { store, audit }
    }

    /// Create a new draft version. The previous latest version (if any)
    /// becomes the parent.
    pub fn create_version(
        &self,
        request: CreateVersionRequest,
        change: &ChangeRequest,
        ctx: &OperationContext,
    ) -> VersionResult<PolicyVersion> {
        if request.version.trim().is_empty() {
            return Err(VersionError::InvalidInput("version string is empty".into()));
        }
        if self
            .store
            .get_version(&request.policy_id, &request.version)?
            .is_some()
        {
            return Err(VersionError::DuplicateVersion {
                policy_id: request.policy_id.to_string(),
                version: request.version,
            });
        }

        let parent = self.store.get_latest_version(&request.policy_id)?;
        let now = Timestamp::now();
        let version = PolicyVersion {
            content_hash: crypto::content_hash(&request.content)?,
            policy_id: request.policy_id.clone(),
            version: request.version.clone(),
            content: request.content,
            metadata: VersionMetadata {
                category: request.category,
                impact: request.impact,
                approver: None,
                created_at: now,
                updated_at: now,
            },
            parent_version: parent.as_ref().map(|p| p.version.clone()),
            branches: Vec::new(),
            tags: request.tags,
            status: VersionStatus::Draft,
        };
        self.store.save_version(&version)?;

        let entry = self.audit.record_entry(
            AuditEventType::VersionCreated,
            request.policy_id.as_str(),
            json!({
                "version": version.version,
                "parent": version.parent_version,
                "content_hash": version.content_hash.to_string(),
            }),
            AuditOutcome::Success,
            ctx,
        )?;
        self.audit
            .record_policy_change(parent.as_ref(), &version, change, vec![entry.entry_id])?;

        tracing::info!(
            policy = %version.policy_id,
            version = %version.version,
            "draft version created"
        );
        Ok(version)
    }

    /// Replace the content of a draft version. Only drafts are mutable.
    pub fn update_version(
        &self,
        policy_id: &PolicyId,
        version: &str,
        content: serde_json::Value,
        change: &ChangeRequest,
        ctx: &OperationContext,
    ) -> VersionResult<PolicyVersion> {
        let before = self.require_version(policy_id, version)?;
        if before.status != VersionStatus::Draft {
            return Err(VersionError::InvalidStateTransition {
                policy_id: policy_id.to_string(),
                version: version.to_string(),
                from: before.status,
                attempted: "update",
            });
        }

        let mut updated = before.clone();
        updated.content_hash = crypto::content_hash(&content)?;
        updated.content = content;
        updated.metadata.updated_at = Timestamp::now();
        self.store.save_version(&updated)?;

        let entry = self.audit.record_entry(
            AuditEventType::VersionUpdated,
            policy_id.as_str(),
            json!({
                "version": updated.version,
                "content_hash": updated.content_hash.to_string(),
            }),
            AuditOutcome::Success,
            ctx,
        )?;
        self.audit
            .record_policy_change(Some(&before), &updated, change, vec![entry.entry_id])?;
        Ok(updated)
    }

    /// Move a draft into review.
    pub fn submit_for_review(
        &self,
        policy_id: &PolicyId,
        version: &str,
        ctx: &OperationContext,
    ) -> VersionResult<PolicyVersion> {
        let current = self.require_version(policy_id, version)?;
        if current.status != VersionStatus::Draft {
            return Err(VersionError::InvalidStateTransition {
                policy_id: policy_id.to_string(),
                version: version.to_string(),
                from: current.status,
                attempted: "submit for review",
            });
        }
        let mut updated = current;
        updated.status = VersionStatus::Review;
        updated.metadata.updated_at = Timestamp::now();
        self.store.save_version(&updated)?;

        self.audit.record_entry(
            AuditEventType::VersionSubmitted,
            policy_id.as_str(),
            json!({ "version": updated.version }),
            AuditOutcome::Success,
            ctx,
        )?;
        Ok(updated)
    }

    /// Approve a draft or in-review version.
    pub fn approve_version(
        &self,
        policy_id: &PolicyId,
        version: &str,
        ctx: &OperationContext,
    ) -> VersionResult<PolicyVersion> {
        let current = self.require_version(policy_id, version)?;
        if !matches!(current.status, VersionStatus::Draft | VersionStatus::Review) {
            return Err(VersionError::InvalidStateTransition {
                policy_id: policy_id.to_string(),
                version: version.to_string(),
                from: current.status,
                attempted: "approve",
            });
        }
        let mut approved = current;
        approved.status = VersionStatus::Approved;
        approved.metadata.approver = Some(ctx.user_id.clone());
        approved.metadata.updated_at = Timestamp::now();
        self.store.save_version(&approved)?;

        self.audit.record_entry(
            AuditEventType::VersionApproved,
            policy_id.as_str(),
            json!({
                "version": approved.version,
                "approver": ctx.user_id.as_str(),
            }),
            AuditOutcome::Success,
            ctx,
        )?;
        tracing::info!(policy = %policy_id, version = %version, "version approved");
        Ok(approved)
    }

    /// Deploy an approved version, atomically deprecating the previously
    /// active version of the same policy. Returns the deployed version and
    /// the version string it deprecated, if any.
    pub fn deploy_version(
        &self,
        policy_id: &PolicyId,
        version: &str,
        change: &ChangeRequest,
        ctx: &OperationContext,
    ) -> VersionResult<(PolicyVersion, Option<String>)> {
        let current = self.require_version(policy_id, version)?;
        if current.status != VersionStatus::Approved {
            return Err(VersionError::InvalidStateTransition {
                policy_id: policy_id.to_string(),
                version: version.to_string(),
                from: current.status,
                attempted: "deploy",
            });
        }

        let prior_active = self
            .store
            .get_all_versions(policy_id)?
            .into_iter()
            .find(|v| v.status == VersionStatus::Active);

        let deprecated = self.store.activate_version(policy_id, version)?;
        let deployed = self.require_version(policy_id, version)?;

        let entry = self.audit.record_entry(
            AuditEventType::VersionDeployed,
            policy_id.as_str(),
            json!({
                "version": deployed.version,
                "deprecated": deprecated,
            }),
            AuditOutcome::Success,
            ctx,
        )?;
        self.audit
            .record_policy_change(prior_active.as_ref(), &deployed, change, vec![entry.entry_id])?;

        tracing::info!(
            policy = %policy_id,
            version = %version,
            deprecated = ?deprecated,
            "version deployed"
        );
        Ok((deployed, deprecated))
    }

    /// Structural diff between two versions of the same policy.
    pub fn compare_versions(
        &self,
        policy_id: &PolicyId,
        from: &str,
        to: &str,
    ) -> VersionResult<PolicyDiff> {
        let before = self.require_version(policy_id, from)?;
        let after = self.require_version(policy_id, to)?;
        Ok(covenant_audit::compute_diff(&before.content, &after.content))
    }

    /// Create a new draft branched from an existing version, tagged with
    /// the branch name and linked back to its source.
    pub fn branch_version(
        &self,
        policy_id: &PolicyId,
        source_version: &str,
        branch_name: &str,
        new_version: &str,
        ctx: &OperationContext,
    ) -> VersionResult<PolicyVersion> {
        let mut source = self.require_version(policy_id, source_version)?;
        if self.store.get_version(policy_id, new_version)?.is_some() {
            return Err(VersionError::DuplicateVersion {
                policy_id: policy_id.to_string(),
                version: new_version.to_string(),
            });
        }

        let now = Timestamp::now();
        let branch = PolicyVersion {
            policy_id: policy_id.clone(),
            version: new_version.to_string(),
            content_hash: source.content_hash.clone(),
            content: source.content.clone(),
            metadata: VersionMetadata {
                category: source.metadata.category.clone(),
                impact: source.metadata.impact,
                approver: None,
                created_at: now,
                updated_at: now,
            },
            parent_version: Some(source.version.clone()),
            branches: Vec::new(),
            tags: vec![format!("branch:{}", branch_name)],
            status: VersionStatus::Draft,
        };
        self.store.save_version(&branch)?;

        source.branches.push(new_version.to_string());
        self.store.save_version(&source)?;

        self.audit.record_entry(
            AuditEventType::VersionBranched,
            policy_id.as_str(),
            json!({
                "source": source_version,
                "branch": branch_name,
                "version": new_version,
            }),
            AuditOutcome::Success,
            ctx,
        )?;
        Ok(branch)
    }

    /// Three-way merge of two versions against their nearest common
    /// ancestor. Unresolved conflicts fail the merge and no version is
    /// created; resolutions are applied per conflicting path.
    pub fn merge_versions(
        &self,
        policy_id: &PolicyId,
        left_version: &str,
        right_version: &str,
        new_version: &str,
        resolutions: &[MergeResolution],
        change: &ChangeRequest,
        ctx: &OperationContext,
    ) -> VersionResult<PolicyVersion> {
        let left = self.require_version(policy_id, left_version)?;
        let right = self.require_version(policy_id, right_version)?;
        if self.store.get_version(policy_id, new_version)?.is_some() {
            return Err(VersionError::DuplicateVersion {
                policy_id: policy_id.to_string(),
                version: new_version.to_string(),
            });
        }

        let ancestor = self.common_ancestor(policy_id, &left, &right)?;
        let base = ancestor
            .as_ref()
            .map(|v| v.content.clone())
            .unwrap_or(serde_json::Value::Null);

        let outcome = three_way_merge(&base, &left.content, &right.content, resolutions)
            .map_err(VersionError::MergeConflicts)?;

        let now = Timestamp::now();
        let merged = PolicyVersion {
            policy_id: policy_id.clone(),
            version: new_version.to_string(),
            content_hash: crypto::content_hash(&outcome.content)?,
            content: outcome.content,
            metadata: VersionMetadata {
                category: left.metadata.category.clone(),
                impact: left.metadata.impact.max(right.metadata.impact),
                approver: None,
                created_at: now,
                updated_at: now,
            },
            parent_version: Some(left.version.clone()),
            branches: Vec::new(),
            tags: vec![format!("merge:{}", right_version)],
            status: VersionStatus::Draft,
        };
        self.store.save_version(&merged)?;

        let entry = self.audit.record_entry(
            AuditEventType::VersionsMerged,
            policy_id.as_str(),
            json!({
                "left": left_version,
                "right": right_version,
                "version": new_version,
                "resolved_conflicts": outcome.resolved_conflicts,
            }),
            AuditOutcome::Success,
            ctx,
        )?;
        self.audit
            .record_policy_change(Some(&left), &merged, change, vec![entry.entry_id])?;
        Ok(merged)
    }

    fn require_version(&self, policy_id: &PolicyId, version: &str) -> VersionResult<PolicyVersion> {
        self.store
            .get_version(policy_id, version)?
            .ok_or_else(|| VersionError::VersionNotFound {
                policy_id: policy_id.to_string(),
                version: version.to_string(),
            })
    }

    /// Nearest common ancestor of two versions, following parent links.
    fn common_ancestor(
        &self,
        policy_id: &PolicyId,
        left: &PolicyVersion,
        right: &PolicyVersion,
    ) -> VersionResult<Option<PolicyVersion>> {
        let all = self.store.get_all_versions(policy_id)?;
        let parent_of = |version: &str| -> Option<String> {
            all.iter()
                .find(|v| v.version == version)
                .and_then(|v| v.parent_version.clone())
        };

        let mut left_line = vec![left.version.clone()];
        let mut cursor = left.parent_version.clone();
        while let Some(v) = cursor {
            left_line.push(v.clone());
            cursor = parent_of(&v);
        }

        let mut candidate = Some(right.version.clone());
        while let Some(v) = candidate {
            if left_line.contains(&v) {
                return Ok(all.into_iter().find(|ver| ver.version == v));
            }
            candidate = parent_of(&v);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryVersionStore;
    use serde_json::json;
    use covenant_audit::AuditConfig;
    use covenant_core::AuditFilter;

    fn setup() -> (Arc<InMemoryVersionStore>, VersionService, Arc<AuditTrailService>) {
        let store = Arc::new(InMemoryVersionStore::new());
        let audit = Arc::new(
            AuditTrailService::new(store.clone(), [7u8; 32], AuditConfig::default()).unwrap(),
        );
        let service = VersionService::new(store.clone(), audit.clone());
        (store, service, audit)
    }

    fn ctx() -> OperationContext {
        OperationContext::new("alice", "req-1").with_session("sess-1")
    }

    fn create(service: &VersionService, policy: &str, version: &str, content: serde_json::Value) {
        service
            .create_version(
                CreateVersionRequest {
                    policy_id: PolicyId::new(policy),
                    version: version.into(),
                    content,
                    category: "access".into(),
                    impact: RiskLevel::Low,
                    tags: vec![],
                },
                &ChangeRequest::routine("test"),
                &ctx(),
            )
            .unwrap();
    }

    #[test]
    fn test_create_sets_parent_to_latest() {
        let (store, service, _) = setup();
        create(&service, "p1", "1.0.0", json!({"a": 1}));
        create(&service, "p1", "1.0.1", json!({"a": 2}));

        let v2 = store
            .get_version(&PolicyId::new("p1"), "1.0.1")
            .unwrap()
            .unwrap();
        assert_eq!(v2.parent_version.as_deref(), Some("1.0.0"));
        assert_eq!(v2.status, VersionStatus::Draft);
    }

    #[test]
    fn test_create_rejects_duplicate() {
        let (_, service, _) = setup();
        create(&service, "p1", "1.0.0", json!({}));
        let err = service.create_version(
            CreateVersionRequest {
                policy_id: PolicyId::new("p1"),
                version: "1.0.0".into(),
                content: json!({}),
                category: "access".into(),
                impact: RiskLevel::Low,
                tags: vec![],
            },
            &ChangeRequest::routine("dup"),
            &ctx(),
        );
        assert!(matches!(err, Err(VersionError::DuplicateVersion { .. })));
    }

    #[test]
    fn test_update_only_drafts() {
        let (_, service, _) = setup();
        let policy = PolicyId::new("p1");
        create(&service, "p1", "1.0.0", json!({"a": 1}));
        service.approve_version(&policy, "1.0.0", &ctx()).unwrap();

        let err = service.update_version(
            &policy,
            "1.0.0",
            json!({"a": 2}),
            &ChangeRequest::routine("late edit"),
            &ctx(),
        );
        assert!(matches!(
            err,
            Err(VersionError::InvalidStateTransition {
                from: VersionStatus::Approved,
                attempted: "update",
                ..
            })
        ));
    }

    #[test]
    fn test_approve_from_draft_and_review() {
        let (_, service, _) = setup();
        let policy = PolicyId::new("p1");
        create(&service, "p1", "1.0.0", json!({}));
        create(&service, "p1", "1.0.1", json!({}));

        // Draft -> Approved directly
        let approved = service.approve_version(&policy, "1.0.0", &ctx()).unwrap();
        assert_eq!(approved.status, VersionStatus::Approved);
        assert_eq!(approved.metadata.approver, Some(covenant_core::UserId::new("alice")));

        // Draft -> Review -> Approved
        service.submit_for_review(&policy, "1.0.1", &ctx()).unwrap();
        let approved = service.approve_version(&policy, "1.0.1", &ctx()).unwrap();
        assert_eq!(approved.status, VersionStatus::Approved);
    }

    #[test]
    fn test_approve_rejects_active() {
        let (_, service, _) = setup();
        let policy = PolicyId::new("p1");
        create(&service, "p1", "1.0.0", json!({}));
        service.approve_version(&policy, "1.0.0", &ctx()).unwrap();
        service
            .deploy_version(&policy, "1.0.0", &ChangeRequest::routine("go"), &ctx())
            .unwrap();

        let err = service.approve_version(&policy, "1.0.0", &ctx());
        assert!(matches!(
            err,
            Err(VersionError::InvalidStateTransition { attempted: "approve", .. })
        ));
    }

    #[test]
    fn test_deploy_requires_approval() {
        let (_, service, _) = setup();
        let policy = PolicyId::new("p1");
        create(&service, "p1", "1.0.0", json!({}));
        let err = service.deploy_version(&policy, "1.0.0", &ChangeRequest::routine("go"), &ctx());
        assert!(matches!(
            err,
            Err(VersionError::InvalidStateTransition { attempted: "deploy", .. })
        ));
    }

    #[test]
    fn test_deploy_deprecates_prior_active() {
        let (store, service, _) = setup();
        let policy = PolicyId::new("p1");
        create(&service, "p1", "1.0.0", json!({"a": 1}));
        service.approve_version(&policy, "1.0.0", &ctx()).unwrap();
        service
            .deploy_version(&policy, "1.0.0", &ChangeRequest::routine("go"), &ctx())
            .unwrap();

        create(&service, "p1", "1.0.1", json!({"a": 2}));
        service.approve_version(&policy, "1.0.1", &ctx()).unwrap();
        let (deployed, deprecated) = service
            .deploy_version(&policy, "1.0.1", &ChangeRequest::routine("go"), &ctx())
            .unwrap();

        assert_eq!(deployed.status, VersionStatus::Active);
        assert_eq!(deprecated.as_deref(), Some("1.0.0"));

        let actives = store
            .get_all_versions(&policy)
            .unwrap()
            .into_iter()
            .filter(|v| v.status == VersionStatus::Active)
            .count();
        assert_eq!(actives, 1);
    }

    #[test]
    fn test_every_mutation_audited() {
        let (_, service, audit) = setup();
        let policy = PolicyId::new("p1");
        create(&service, "p1", "1.0.0", json!({"a": 1}));
        service
            .update_version(&policy, "1.0.0", json!({"a": 2}), &ChangeRequest::routine("edit"), &ctx())
            .unwrap();
        service.approve_version(&policy, "1.0.0", &ctx()).unwrap();
        service
            .deploy_version(&policy, "1.0.0", &ChangeRequest::routine("go"), &ctx())
            .unwrap();

        let trail = audit.audit_trail(Some("p1"), &AuditFilter::default()).unwrap();
        let events: Vec<AuditEventType> = trail.iter().map(|e| e.event_type).collect();
        assert_eq!(
            events,
            vec![
                AuditEventType::VersionCreated,
                AuditEventType::VersionUpdated,
                AuditEventType::VersionApproved,
                AuditEventType::VersionDeployed,
            ]
        );
        // Chain links are intact across the whole sequence
        let report = audit.verify_integrity(&AuditFilter::default()).unwrap();
        assert!(report.valid);
    }

    #[test]
    fn test_compare_versions() {
        let (_, service, _) = setup();
        let policy = PolicyId::new("p1");
        create(&service, "p1", "1.0.0", json!({"limit": 5}));
        create(&service, "p1", "1.0.1", json!({"limit": 9, "mode": "strict"}));

        let diff = service.compare_versions(&policy, "1.0.0", "1.0.1").unwrap();
        assert_eq!(diff.modifications, 1);
        assert_eq!(diff.additions, 1);
    }

    #[test]
    fn test_branch_links_both_ways() {
        let (store, service, _) = setup();
        let policy = PolicyId::new("p1");
        create(&service, "p1", "1.0.0", json!({"a": 1}));

        let branch = service
            .branch_version(&policy, "1.0.0", "experiment", "1.0.0-exp.1", &ctx())
            .unwrap();
        assert_eq!(branch.status, VersionStatus::Draft);
        assert_eq!(branch.parent_version.as_deref(), Some("1.0.0"));
        assert!(branch.tags.contains(&"branch:experiment".to_string()));

        let source = store.get_version(&policy, "1.0.0").unwrap().unwrap();
        assert!(source.branches.contains(&"1.0.0-exp.1".to_string()));
    }

    #[test]
    fn test_merge_clean() {
        let (_, service, _) = setup();
        let policy = PolicyId::new("p1");
        create(&service, "p1", "1.0.0", json!({"a": 1, "b": 2}));
        service
            .branch_version(&policy, "1.0.0", "left", "1.1.0", &ctx())
            .unwrap();
        service
            .branch_version(&policy, "1.0.0", "right", "1.2.0", &ctx())
            .unwrap();
        service
            .update_version(&policy, "1.1.0", json!({"a": 10, "b": 2}), &ChangeRequest::routine("l"), &ctx())
            .unwrap();
        service
            .update_version(&policy, "1.2.0", json!({"a": 1, "b": 20}), &ChangeRequest::routine("r"), &ctx())
            .unwrap();

        let merged = service
            .merge_versions(
                &policy,
                "1.1.0",
                "1.2.0",
                "1.3.0",
                &[],
                &ChangeRequest::routine("merge"),
                &ctx(),
            )
            .unwrap();
        assert_eq!(merged.content, json!({"a": 10, "b": 20}));
        assert_eq!(merged.parent_version.as_deref(), Some("1.1.0"));
    }

    #[test]
    fn test_merge_conflict_creates_no_version() {
        let (store, service, _) = setup();
        let policy = PolicyId::new("p1");
        create(&service, "p1", "1.0.0", json!({"a": 1}));
        service
            .branch_version(&policy, "1.0.0", "left", "1.1.0", &ctx())
            .unwrap();
        service
            .branch_version(&policy, "1.0.0", "right", "1.2.0", &ctx())
            .unwrap();
        service
            .update_version(&policy, "1.1.0", json!({"a": 10}), &ChangeRequest::routine("l"), &ctx())
            .unwrap();
        service
            .update_version(&policy, "1.2.0", json!({"a": 20}), &ChangeRequest::routine("r"), &ctx())
            .unwrap();

        let err = service.merge_versions(
            &policy,
            "1.1.0",
            "1.2.0",
            "1.3.0",
            &[],
            &ChangeRequest::routine("merge"),
            &ctx(),
        );
        match err {
            Err(VersionError::MergeConflicts(conflicts)) => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].path, "/a");
            }
            other => panic!("expected merge conflicts, got {:?}", other.map(|v| v.version)),
        }
        assert!(store.get_version(&policy, "1.3.0").unwrap().is_none());
    }
}
