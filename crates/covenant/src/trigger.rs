//! Live trigger state backed by the version store.
//!
//! Policy versions come straight from the store, so a deployment is
//! visible to the cache the instant it commits. Consent and role
//! revisions are monotonic counters bumped through the notify hooks;
//! external identity systems are out of scope, only their change
//! signals land here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use covenant_cache::TriggerState;
use covenant_core::{PolicyId, VersionStatus, VersionStore};

pub struct StoreTriggerState {
    store: Arc<dyn VersionStore>,
    consent: Mutex<HashMap<String, u64>>,
    roles: Mutex<HashMap<String, u64>>,
}

impl StoreTriggerState {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self {
            store,
            consent: Mutex::new(HashMap::new()),
            roles: Mutex::new(HashMap::new()),
        }
    }

    pub fn bump_consent(&self, user: &str) {
        if let Ok(mut map) = self.consent.lock() {
            *map.entry(user.trim().to_lowercase()).or_insert(0) += 1;
        }
    }

    pub fn bump_role(&self, user: &str) {
        if let Ok(mut map) = self.roles.lock() {
            *map.entry(user.trim().to_lowercase()).or_insert(0) += 1;
        }
    }
}

impl TriggerState for StoreTriggerState {
    fn current_policy_version(&self, policy_id: &PolicyId) -> Option<String> {
        match self.store.get_all_versions(policy_id) {
            Ok(versions) => versions
                .into_iter()
                .find(|v| v.status == VersionStatus::Active)
                .map(|v| v.version),
            Err(e) => {
                // treat a failing store as "version unknown", which fires
                // the trigger and forces re-evaluation
                tracing::warn!(policy = %policy_id, error = %e, "trigger state store read failed");
                None
            }
        }
    }

    fn consent_revision(&self, user: &str) -> u64 {
        self.consent
            .lock()
            .map(|m| *m.get(user).unwrap_or(&0))
            .unwrap_or(0)
    }

    fn role_revision(&self, user: &str) -> u64 {
        self.roles
            .lock()
            .map(|m| *m.get(user).unwrap_or(&0))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_version::InMemoryVersionStore;

    #[test]
    fn test_revisions_start_at_zero_and_bump() {
        let state = StoreTriggerState::new(Arc::new(InMemoryVersionStore::new()));
        assert_eq!(state.consent_revision("alice"), 0);
        state.bump_consent("Alice ");
        assert_eq!(state.consent_revision("alice"), 1);

        assert_eq!(state.role_revision("alice"), 0);
        state.bump_role("alice");
        state.bump_role("alice");
        assert_eq!(state.role_revision("alice"), 2);
    }

    #[test]
    fn test_no_active_version_reads_none() {
        let state = StoreTriggerState::new(Arc::new(InMemoryVersionStore::new()));
        assert_eq!(state.current_policy_version(&PolicyId::new("p1")), None);
    }
}
