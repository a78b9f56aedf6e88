//! The decision cache proper: TTL derivation, trigger evaluation at
//! read time, pattern-scoped invalidation, and capacity eviction.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use covenant_core::{DataClassification, PolicyId, RiskLevel, Timestamp};

use crate::backend::CacheBackend;
use crate::error::{CacheError, CacheResult};
use crate::key::{decision_key, normalize, policy_prefix};
use crate::types::{
    CacheStats, CachedDecision, DecisionInput, DecisionMetadata, InvalidationRecord,
    InvalidationTrigger, TriggerState,
};

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

fn default_capacity() -> usize {
    10_000
}

fn default_high_risk_ttl_secs() -> u64 {
    60
}

fn default_medium_risk_ttl_secs() -> u64 {
    300
}

fn default_low_risk_ttl_secs() -> u64 {
    900
}

fn default_restricted_ttl_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_high_risk_ttl_secs")]
    pub high_risk_ttl_secs: u64,
    #[serde(default = "default_medium_risk_ttl_secs")]
    pub medium_risk_ttl_secs: u64,
    #[serde(default = "default_low_risk_ttl_secs")]
    pub low_risk_ttl_secs: u64,
    #[serde(default = "default_restricted_ttl_secs")]
    pub restricted_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            high_risk_ttl_secs: default_high_risk_ttl_secs(),
            medium_risk_ttl_secs: default_medium_risk_ttl_secs(),
            low_risk_ttl_secs: default_low_risk_ttl_secs(),
            restricted_ttl_secs: default_restricted_ttl_secs(),
        }
    }
}

/// TTL from risk, capped down for restricted data classifications.
pub fn ttl_for(risk: RiskLevel, classification: DataClassification, config: &CacheConfig) -> u64 {
    let by_risk = match risk {
        RiskLevel::High | RiskLevel::Critical => config.high_risk_ttl_secs,
        RiskLevel::Medium => config.medium_risk_ttl_secs,
        RiskLevel::Low => config.low_risk_ttl_secs,
    };
    if classification.is_restricted() {
        by_risk.min(config.restricted_ttl_secs)
    } else {
        by_risk
    }
}

// ---------------------------------------------------------------------------
// DecisionCache
// ---------------------------------------------------------------------------

pub struct DecisionCache {
    backend: Arc<dyn CacheBackend>,
    triggers: Arc<dyn TriggerState>,
    config: CacheConfig,
    stats: Mutex<CacheStats>,
    invalidations: Mutex<Vec<InvalidationRecord>>,
}

impl DecisionCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        triggers: Arc<dyn TriggerState>,
        config: CacheConfig,
    ) -> Self {
        Self {
            backend,
            triggers,
            config,
            stats: Mutex::new(CacheStats::default()),
            invalidations: Mutex::new(Vec::new()),
        }
    }

    fn lock_stats(&self) -> CacheResult<MutexGuard<'_, CacheStats>> {
        self.stats
            .lock()
            .map_err(|e| CacheError::Backend(format!("stats lock poisoned: {e}")))
    }

    fn lock_invalidations(&self) -> CacheResult<MutexGuard<'_, Vec<InvalidationRecord>>> {
        self.invalidations
            .lock()
            .map_err(|e| CacheError::Backend(format!("invalidation log lock poisoned: {e}")))
    }

    /// Look up a cached decision, validating every invalidation trigger
    /// against live state. A fired trigger deletes the entry and the
    /// lookup reads as a miss.
    pub fn get_cached_decision(
        &self,
        policy_id: &PolicyId,
        input: &DecisionInput,
    ) -> CacheResult<Option<CachedDecision>> {
        let key = decision_key(policy_id, input)?;
        let Some(entry) = self.backend.get(&key)? else {
            self.lock_stats()?.misses += 1;
            return Ok(None);
        };

        if let Some(fired) = self.fired_trigger(&entry) {
            tracing::debug!(key = %key, trigger = ?fired, "cached decision invalidated by trigger");
            self.backend.delete(&key)?;
            let mut stats = self.lock_stats()?;
            stats.trigger_expirations += 1;
            stats.misses += 1;
            return Ok(None);
        }

        self.lock_stats()?.hits += 1;
        Ok(Some(entry))
    }

    fn fired_trigger<'a>(&self, entry: &'a CachedDecision) -> Option<&'a InvalidationTrigger> {
        entry.triggers.iter().find(|trigger| match trigger {
            InvalidationTrigger::TimeExpiry { expires_at } => expires_at.is_past(),
            InvalidationTrigger::PolicyVersionChange { policy_id, version } => {
                self.triggers.current_policy_version(policy_id).as_deref() != Some(version.as_str())
            }
            InvalidationTrigger::ConsentChange { user, revision } => {
                self.triggers.consent_revision(user) != *revision
            }
            InvalidationTrigger::UserRoleChange { user, revision } => {
                self.triggers.role_revision(user) != *revision
            }
        })
    }

    /// Cache a decision with a TTL derived from risk and classification,
    /// triggers capturing the live state, and tags plus dependency keys
    /// for targeted invalidation.
    pub fn cache_decision(
        &self,
        policy_id: &PolicyId,
        policy_version: &str,
        input: &DecisionInput,
        decision: serde_json::Value,
        metadata: DecisionMetadata,
    ) -> CacheResult<CachedDecision> {
        let key = decision_key(policy_id, input)?;
        let user = normalize(&input.user);
        let action = normalize(&input.action);
        let resource = normalize(&input.resource);

        let now = Timestamp::now();
        let ttl = ttl_for(metadata.risk, metadata.classification, &self.config);
        let expires_at = now.plus_seconds(ttl);

        let tags = vec![
            format!("policy:{}:{}", policy_id, policy_version),
            format!("user:{user}"),
            format!("action:{action}"),
            format!("resource:{resource}"),
            format!("risk:{:?}", metadata.risk).to_lowercase(),
            format!("classification:{:?}", metadata.classification).to_lowercase(),
        ];
        let mut dependency_keys = vec![
            format!("dep:policy-config:{policy_id}"),
            format!("dep:permissions:{user}"),
        ];
        let mut triggers = vec![
            InvalidationTrigger::TimeExpiry { expires_at },
            InvalidationTrigger::PolicyVersionChange {
                policy_id: policy_id.clone(),
                version: policy_version.to_string(),
            },
            InvalidationTrigger::UserRoleChange {
                user: user.clone(),
                revision: self.triggers.role_revision(&user),
            },
        ];
        if metadata.classification.is_restricted() {
            dependency_keys.push(format!("dep:consent:{user}"));
            triggers.push(InvalidationTrigger::ConsentChange {
                user: user.clone(),
                revision: self.triggers.consent_revision(&user),
            });
        }

        let entry = CachedDecision {
            key: key.clone(),
            policy_id: policy_id.clone(),
            policy_version: policy_version.to_string(),
            user,
            action,
            resource,
            decision,
            metadata,
            cached_at: now,
            expires_at,
            tags,
            dependency_keys,
            triggers,
        };

        if self.backend.len()? >= self.config.capacity {
            self.evict_oldest()?;
        }
        self.backend.set(entry.clone())?;
        self.lock_stats()?.insertions += 1;
        Ok(entry)
    }

    /// Drop the oldest tenth of the cache by `cached_at`.
    fn evict_oldest(&self) -> CacheResult<()> {
        let mut entries: Vec<CachedDecision> = Vec::new();
        for key in self.backend.keys()? {
            if let Some(entry) = self.backend.get(&key)? {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|e| e.cached_at);
        let victims = (entries.len() / 10).max(1);
        let mut evicted = 0u64;
        for entry in entries.into_iter().take(victims) {
            if self.backend.delete(&entry.key)? {
                evicted += 1;
            }
        }
        self.lock_stats()?.evictions += evicted;
        tracing::debug!(evicted, "cache capacity eviction");
        Ok(())
    }

    pub fn invalidate_policy_decisions(
        &self,
        policy_id: &PolicyId,
        reason: &str,
    ) -> CacheResult<usize> {
        let prefix = policy_prefix(policy_id);
        self.invalidate_matching(&prefix, reason, |entry| entry.key.starts_with(&prefix))
    }

    pub fn invalidate_user_decisions(&self, user: &str, reason: &str) -> CacheResult<usize> {
        let user = normalize(user);
        let pattern = format!("user:{user}");
        self.invalidate_matching(&pattern, reason, |entry| entry.user == user)
    }

    pub fn invalidate_resource_decisions(&self, resource: &str, reason: &str) -> CacheResult<usize> {
        let resource = normalize(resource);
        let pattern = format!("resource:{resource}");
        self.invalidate_matching(&pattern, reason, |entry| entry.resource == resource)
    }

    fn invalidate_matching(
        &self,
        pattern: &str,
        reason: &str,
        matches: impl Fn(&CachedDecision) -> bool,
    ) -> CacheResult<usize> {
        if reason.trim().is_empty() {
            return Err(CacheError::InvalidInput(
                "invalidation requires a reason".into(),
            ));
        }
        let mut removed = 0;
        for key in self.backend.keys()? {
            if let Some(entry) = self.backend.get(&key)? {
                if matches(&entry) && self.backend.delete(&key)? {
                    removed += 1;
                }
            }
        }
        self.lock_stats()?.invalidations += removed as u64;
        self.lock_invalidations()?.push(InvalidationRecord {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
            at: Timestamp::now(),
            removed,
        });
        tracing::info!(pattern, reason, removed, "cache invalidation");
        Ok(removed)
    }

    /// Drop everything. The cache is derived state; clearing it is always
    /// safe.
    pub fn clear(&self, reason: &str) -> CacheResult<usize> {
        if reason.trim().is_empty() {
            return Err(CacheError::InvalidInput(
                "invalidation requires a reason".into(),
            ));
        }
        let removed = self.backend.clear()?;
        self.lock_stats()?.invalidations += removed as u64;
        self.lock_invalidations()?.push(InvalidationRecord {
            pattern: "*".into(),
            reason: reason.to_string(),
            at: Timestamp::now(),
            removed,
        });
        Ok(removed)
    }

    pub fn stats(&self) -> CacheResult<CacheStats> {
        Ok(*self.lock_stats()?)
    }

    pub fn invalidation_log(&self) -> CacheResult<Vec<InvalidationRecord>> {
        Ok(self.lock_invalidations()?.clone())
    }

    pub fn len(&self) -> CacheResult<usize> {
        self.backend.len()
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        self.backend.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryCacheBackend;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeTriggerState {
        versions: Mutex<HashMap<String, String>>,
        consent: Mutex<HashMap<String, u64>>,
        roles: Mutex<HashMap<String, u64>>,
    }

    impl FakeTriggerState {
        fn set_version(&self, policy: &str, version: &str) {
            self.versions
                .lock()
                .unwrap()
                .insert(policy.into(), version.into());
        }

        fn bump_role(&self, user: &str) {
            *self.roles.lock().unwrap().entry(user.into()).or_insert(0) += 1;
        }

        fn bump_consent(&self, user: &str) {
            *self.consent.lock().unwrap().entry(user.into()).or_insert(0) += 1;
        }
    }

    impl TriggerState for FakeTriggerState {
        fn current_policy_version(&self, policy_id: &PolicyId) -> Option<String> {
            self.versions.lock().unwrap().get(policy_id.as_str()).cloned()
        }

        fn consent_revision(&self, user: &str) -> u64 {
            *self.consent.lock().unwrap().get(user).unwrap_or(&0)
        }

        fn role_revision(&self, user: &str) -> u64 {
            *self.roles.lock().unwrap().get(user).unwrap_or(&0)
        }
    }

    fn cache_with_state() -> (DecisionCache, Arc<FakeTriggerState>) {
        let state = Arc::new(FakeTriggerState::default());
        state.set_version("p1", "1.0.0");
        let cache = DecisionCache::new(
            Arc::new(InMemoryCacheBackend::new()),
            state.clone(),
            CacheConfig::default(),
        );
        (cache, state)
    }

    fn input(user: &str, action: &str, resource: &str) -> DecisionInput {
        DecisionInput {
            user: user.into(),
            action: action.into(),
            resource: resource.into(),
            context: BTreeMap::new(),
            timestamp: Timestamp::now(),
        }
    }

    fn metadata(risk: RiskLevel, classification: DataClassification) -> DecisionMetadata {
        DecisionMetadata {
            risk,
            classification,
            audit_required: false,
        }
    }

    #[test]
    fn test_ttl_matrix() {
        let config = CacheConfig::default();
        assert_eq!(ttl_for(RiskLevel::High, DataClassification::Public, &config), 60);
        assert_eq!(ttl_for(RiskLevel::Critical, DataClassification::Public, &config), 60);
        assert_eq!(ttl_for(RiskLevel::Medium, DataClassification::Public, &config), 300);
        assert_eq!(ttl_for(RiskLevel::Low, DataClassification::Internal, &config), 900);
        // restricted classifications cap everything at 30s
        assert_eq!(ttl_for(RiskLevel::Critical, DataClassification::Cultural, &config), 30);
        assert_eq!(ttl_for(RiskLevel::Low, DataClassification::Sensitive, &config), 30);
    }

    #[test]
    fn test_round_trip_hit() {
        let (cache, _) = cache_with_state();
        let policy = PolicyId::new("p1");
        let req = input("alice", "read", "doc-1");

        cache
            .cache_decision(
                &policy,
                "1.0.0",
                &req,
                json!({"allow": true}),
                metadata(RiskLevel::Low, DataClassification::Public),
            )
            .unwrap();

        let hit = cache.get_cached_decision(&policy, &req).unwrap().unwrap();
        assert_eq!(hit.decision, json!({"allow": true}));
        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.insertions, 1);
    }

    #[test]
    fn test_policy_version_change_fires_trigger() {
        let (cache, state) = cache_with_state();
        let policy = PolicyId::new("p1");
        let req = input("alice", "read", "doc-1");
        cache
            .cache_decision(
                &policy,
                "1.0.0",
                &req,
                json!({"allow": true}),
                metadata(RiskLevel::Low, DataClassification::Public),
            )
            .unwrap();

        state.set_version("p1", "2.0.0");
        assert!(cache.get_cached_decision(&policy, &req).unwrap().is_none());
        // the entry was deleted, not just skipped
        assert_eq!(cache.len().unwrap(), 0);
        assert_eq!(cache.stats().unwrap().trigger_expirations, 1);
    }

    #[test]
    fn test_role_change_fires_trigger() {
        let (cache, state) = cache_with_state();
        let policy = PolicyId::new("p1");
        let req = input("alice", "read", "doc-1");
        cache
            .cache_decision(
                &policy,
                "1.0.0",
                &req,
                json!({"allow": true}),
                metadata(RiskLevel::Low, DataClassification::Public),
            )
            .unwrap();

        state.bump_role("alice");
        assert!(cache.get_cached_decision(&policy, &req).unwrap().is_none());
    }

    #[test]
    fn test_consent_trigger_only_for_restricted() {
        let (cache, state) = cache_with_state();
        let policy = PolicyId::new("p1");
        let public_req = input("alice", "read", "doc-1");
        let sensitive_req = input("alice", "read", "record-7");

        cache
            .cache_decision(
                &policy,
                "1.0.0",
                &public_req,
                json!({"allow": true}),
                metadata(RiskLevel::Low, DataClassification::Public),
            )
            .unwrap();
        let sensitive = cache
            .cache_decision(
                &policy,
                "1.0.0",
                &sensitive_req,
                json!({"allow": false}),
                metadata(RiskLevel::Low, DataClassification::Sensitive),
            )
            .unwrap();
        assert!(sensitive
            .dependency_keys
            .contains(&"dep:consent:alice".to_string()));

        state.bump_consent("alice");
        // public entry survives, sensitive one is dropped
        assert!(cache.get_cached_decision(&policy, &public_req).unwrap().is_some());
        assert!(cache.get_cached_decision(&policy, &sensitive_req).unwrap().is_none());
    }

    #[test]
    fn test_invalidate_policy_scoped() {
        let (cache, state) = cache_with_state();
        state.set_version("p2", "1.0.0");
        let p1 = PolicyId::new("p1");
        let p2 = PolicyId::new("p2");
        let req = input("alice", "read", "doc-1");
        let meta = metadata(RiskLevel::Low, DataClassification::Public);

        cache.cache_decision(&p1, "1.0.0", &req, json!(1), meta).unwrap();
        cache.cache_decision(&p2, "1.0.0", &req, json!(2), meta).unwrap();

        let removed = cache.invalidate_policy_decisions(&p1, "policy redeployed").unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get_cached_decision(&p1, &req).unwrap().is_none());
        assert!(cache.get_cached_decision(&p2, &req).unwrap().is_some());

        let log = cache.invalidation_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].reason, "policy redeployed");
        assert_eq!(log[0].removed, 1);
    }

    #[test]
    fn test_invalidate_requires_reason() {
        let (cache, _) = cache_with_state();
        let err = cache.invalidate_policy_decisions(&PolicyId::new("p1"), "  ");
        assert!(matches!(err, Err(CacheError::InvalidInput(_))));
    }

    #[test]
    fn test_invalidate_user_and_resource_scoped() {
        let (cache, _) = cache_with_state();
        let policy = PolicyId::new("p1");
        let meta = metadata(RiskLevel::Low, DataClassification::Public);
        cache
            .cache_decision(&policy, "1.0.0", &input("alice", "read", "doc-1"), json!(1), meta)
            .unwrap();
        cache
            .cache_decision(&policy, "1.0.0", &input("bob", "read", "doc-1"), json!(2), meta)
            .unwrap();
        cache
            .cache_decision(&policy, "1.0.0", &input("bob", "read", "doc-2"), json!(3), meta)
            .unwrap();

        assert_eq!(cache.invalidate_user_decisions("Alice", "role migration").unwrap(), 1);
        assert_eq!(
            cache.invalidate_resource_decisions("doc-1", "resource archived").unwrap(),
            1
        );
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_capacity_eviction_drops_oldest_tenth() {
        let state = Arc::new(FakeTriggerState::default());
        state.set_version("p1", "1.0.0");
        let cache = DecisionCache::new(
            Arc::new(InMemoryCacheBackend::new()),
            state,
            CacheConfig {
                capacity: 20,
                ..CacheConfig::default()
            },
        );
        let policy = PolicyId::new("p1");
        let meta = metadata(RiskLevel::Low, DataClassification::Public);

        for i in 0..20 {
            let mut entry = cache
                .cache_decision(&policy, "1.0.0", &input("u", "read", &format!("r{i}")), json!(i), meta)
                .unwrap();
            // spread cached_at so "oldest" is well defined
            entry.cached_at = Timestamp::from_seconds(1_000 + i as u64);
            cache.backend.set(entry).unwrap();
        }
        assert_eq!(cache.len().unwrap(), 20);

        cache
            .cache_decision(&policy, "1.0.0", &input("u", "read", "r-new"), json!(99), meta)
            .unwrap();
        // two evicted (10% of 20), one inserted
        assert_eq!(cache.len().unwrap(), 19);
        assert_eq!(cache.stats().unwrap().evictions, 2);
        let oldest = input("u", "read", "r0");
        assert!(cache.get_cached_decision(&policy, &oldest).unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let (cache, _) = cache_with_state();
        let policy = PolicyId::new("p1");
        let meta = metadata(RiskLevel::Low, DataClassification::Public);
        cache
            .cache_decision(&policy, "1.0.0", &input("u", "a", "r"), json!(1), meta)
            .unwrap();
        assert_eq!(cache.clear("teardown").unwrap(), 1);
        assert!(cache.is_empty().unwrap());
    }
}
