//! Deterministic cache keys from normalized decision input.

use serde_json::json;

use covenant_core::{crypto, PolicyId};

use crate::error::CacheResult;
use crate::types::DecisionInput;

pub fn normalize(part: &str) -> String {
    part.trim().to_lowercase()
}

/// `policy:{id}:decision:{user}:{action}:{resource}:{hash16}`.
///
/// User, action and resource are trimmed and lower-cased; context keys
/// are normalized and sorted before hashing, so equivalent inputs always
/// produce the same key.
pub fn decision_key(policy_id: &PolicyId, input: &DecisionInput) -> CacheResult<String> {
    let user = normalize(&input.user);
    let action = normalize(&input.action);
    let resource = normalize(&input.resource);

    // BTreeMap keeps the normalized keys sorted
    let context: std::collections::BTreeMap<String, String> = input
        .context
        .iter()
        .map(|(k, v)| (normalize(k), v.trim().to_string()))
        .collect();

    let payload = json!({
        "user": user,
        "action": action,
        "resource": resource,
        "context": context,
    });
    let hash16 = crypto::short_content_hash(&payload)?;

    Ok(format!(
        "policy:{}:decision:{}:{}:{}:{}",
        policy_id, user, action, resource, hash16
    ))
}

/// Prefix matching every decision cached for one policy.
pub fn policy_prefix(policy_id: &PolicyId) -> String {
    format!("policy:{}:decision:", policy_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::Timestamp;
    use std::collections::BTreeMap;

    fn input(user: &str, action: &str, resource: &str) -> DecisionInput {
        DecisionInput {
            user: user.into(),
            action: action.into(),
            resource: resource.into(),
            context: BTreeMap::new(),
            timestamp: Timestamp::now(),
        }
    }

    #[test]
    fn test_key_shape() {
        let key = decision_key(&PolicyId::new("p1"), &input("Alice", "Read", "doc-1")).unwrap();
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts[0], "policy");
        assert_eq!(parts[1], "p1");
        assert_eq!(parts[2], "decision");
        assert_eq!(parts[3], "alice");
        assert_eq!(parts[4], "read");
        assert_eq!(parts[5], "doc-1");
        assert_eq!(parts[6].len(), 16);
    }

    #[test]
    fn test_key_idempotent_under_normalization() {
        let policy = PolicyId::new("p1");
        let a = decision_key(&policy, &input("  Alice ", "READ", "Doc-1")).unwrap();
        let b = decision_key(&policy, &input("alice", "read", "doc-1")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_context_key_order_irrelevant() {
        let policy = PolicyId::new("p1");
        let mut one = input("u", "a", "r");
        one.context.insert("Region".into(), "eu".into());
        one.context.insert("tier".into(), "gold".into());
        let mut two = input("u", "a", "r");
        two.context.insert("tier".into(), "gold".into());
        two.context.insert("region".into(), "eu".into());

        assert_eq!(
            decision_key(&policy, &one).unwrap(),
            decision_key(&policy, &two).unwrap()
        );
    }

    #[test]
    fn test_context_values_change_key() {
        let policy = PolicyId::new("p1");
        let mut one = input("u", "a", "r");
        one.context.insert("tier".into(), "gold".into());
        let mut two = input("u", "a", "r");
        two.context.insert("tier".into(), "silver".into());

        assert_ne!(
            decision_key(&policy, &one).unwrap(),
            decision_key(&policy, &two).unwrap()
        );
    }
}
