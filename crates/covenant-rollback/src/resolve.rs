//! Target resolution: mapping a plan's abstract target onto a concrete
//! version of each in-scope policy.

use covenant_core::{
    ChangeFilter, CoreResult, PolicyId, PolicyVersion, RollbackTarget, VersionStatus, VersionStore,
};

/// Resolve the plan target to a concrete version of `policy_id`, or
/// `None` when nothing matches. Resolution never fails the whole plan;
/// the caller turns a `None` into a failed check for this policy only.
pub fn resolve_target(
    store: &dyn VersionStore,
    policy_id: &PolicyId,
    target: &RollbackTarget,
) -> CoreResult<Option<PolicyVersion>> {
    match target {
        RollbackTarget::Version(version) => store.get_version(policy_id, version),
        RollbackTarget::Tag(tag) => {
            let versions = store.get_all_versions(policy_id)?;
            Ok(versions.into_iter().rev().find(|v| v.tags.iter().any(|t| t == tag)))
        }
        RollbackTarget::Timestamp(ts) => {
            let versions = store.get_all_versions(policy_id)?;
            Ok(versions
                .into_iter()
                .filter(|v| v.metadata.created_at <= *ts)
                .max_by_key(|v| v.metadata.created_at))
        }
        RollbackTarget::Changeset(change_id) => {
            let changes = store.get_changes(policy_id, &ChangeFilter::default())?;
            match changes.into_iter().find(|c| c.change_id == *change_id) {
                Some(change) => store.get_version(policy_id, &change.to_version),
                None => Ok(None),
            }
        }
    }
}

/// A version is a safe rollback destination only if it was deployed or
/// at least approved; drafts and in-review versions never were live.
pub fn is_stable(version: &PolicyVersion) -> bool {
    matches!(version.status, VersionStatus::Active | VersionStatus::Approved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::{ChangeId, RiskLevel, Timestamp, VersionMetadata};
    use covenant_version::InMemoryVersionStore;
    use serde_json::json;

    fn version(policy: &str, version: &str, status: VersionStatus, tags: Vec<String>) -> PolicyVersion {
        let now = Timestamp::now();
        PolicyVersion {
            policy_id: PolicyId::new(policy),
            version: version.into(),
            content_hash: covenant_core::crypto::content_hash(&json!({})).unwrap(),
            content: json!({}),
            metadata: VersionMetadata {
                category: "access".into(),
                impact: RiskLevel::Low,
                approver: None,
                created_at: now,
                updated_at: now,
            },
            parent_version: None,
            branches: vec![],
            tags,
            status,
        }
    }

    #[test]
    fn test_resolve_by_version_and_tag() {
        let store = InMemoryVersionStore::new();
        let policy = PolicyId::new("p1");
        store
            .save_version(&version("p1", "1.0.0", VersionStatus::Active, vec!["stable".into()]))
            .unwrap();
        store
            .save_version(&version("p1", "1.1.0", VersionStatus::Draft, vec![]))
            .unwrap();

        let by_version = resolve_target(&store, &policy, &RollbackTarget::Version("1.0.0".into()))
            .unwrap()
            .unwrap();
        assert_eq!(by_version.version, "1.0.0");

        let by_tag = resolve_target(&store, &policy, &RollbackTarget::Tag("stable".into()))
            .unwrap()
            .unwrap();
        assert_eq!(by_tag.version, "1.0.0");

        let missing =
            resolve_target(&store, &policy, &RollbackTarget::Tag("nope".into())).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_resolve_by_timestamp_picks_latest_at_or_before() {
        let store = InMemoryVersionStore::new();
        let policy = PolicyId::new("p1");
        let mut old = version("p1", "1.0.0", VersionStatus::Active, vec![]);
        old.metadata.created_at = Timestamp::from_seconds(1_000);
        let mut newer = version("p1", "1.1.0", VersionStatus::Approved, vec![]);
        newer.metadata.created_at = Timestamp::from_seconds(2_000);
        store.save_version(&old).unwrap();
        store.save_version(&newer).unwrap();

        let resolved = resolve_target(
            &store,
            &policy,
            &RollbackTarget::Timestamp(Timestamp::from_seconds(1_500)),
        )
        .unwrap()
        .unwrap();
        assert_eq!(resolved.version, "1.0.0");

        let none = resolve_target(
            &store,
            &policy,
            &RollbackTarget::Timestamp(Timestamp::from_seconds(500)),
        )
        .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_resolve_by_changeset_id() {
        let store = InMemoryVersionStore::new();
        let policy = PolicyId::new("p1");
        let missing = resolve_target(
            &store,
            &policy,
            &RollbackTarget::Changeset(ChangeId::new("no-such-change")),
        )
        .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_stability() {
        assert!(is_stable(&version("p", "1", VersionStatus::Active, vec![])));
        assert!(is_stable(&version("p", "1", VersionStatus::Approved, vec![])));
        assert!(!is_stable(&version("p", "1", VersionStatus::Draft, vec![])));
        assert!(!is_stable(&version("p", "1", VersionStatus::Deprecated, vec![])));
    }
}
