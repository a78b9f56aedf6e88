//! Cache entry and trigger types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use covenant_core::{DataClassification, PolicyId, RiskLevel, Timestamp};

// ---------------------------------------------------------------------------
// Decision input and metadata
// ---------------------------------------------------------------------------

/// The request whose decision is being cached. `context` carries the
/// evaluator-specific attributes that make the decision situational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionInput {
    pub user: String,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecisionMetadata {
    pub risk: RiskLevel,
    pub classification: DataClassification,
    #[serde(default)]
    pub audit_required: bool,
}

// ---------------------------------------------------------------------------
// Invalidation triggers
// ---------------------------------------------------------------------------

/// State captured at cache time, compared against live state on every
/// read. A fired trigger deletes the entry and the read is a miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum InvalidationTrigger {
    TimeExpiry { expires_at: Timestamp },
    PolicyVersionChange { policy_id: PolicyId, version: String },
    ConsentChange { user: String, revision: u64 },
    UserRoleChange { user: String, revision: u64 },
}

/// The external decision evaluator consulted on a cache miss. Rule
/// evaluation semantics live entirely behind this seam.
pub trait DecisionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        policy: &covenant_core::PolicyVersion,
        input: &DecisionInput,
    ) -> covenant_core::CoreResult<(serde_json::Value, DecisionMetadata)>;
}

/// Live state the triggers are evaluated against at read time.
pub trait TriggerState: Send + Sync {
    /// Version string of the currently active version, if any.
    fn current_policy_version(&self, policy_id: &PolicyId) -> Option<String>;
    fn consent_revision(&self, user: &str) -> u64;
    fn role_revision(&self, user: &str) -> u64;
}

// ---------------------------------------------------------------------------
// Cached entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDecision {
    pub key: String,
    pub policy_id: PolicyId,
    pub policy_version: String,
    /// Normalized input fields, kept for pattern-scoped invalidation.
    pub user: String,
    pub action: String,
    pub resource: String,
    pub decision: serde_json::Value,
    pub metadata: DecisionMetadata,
    pub cached_at: Timestamp,
    pub expires_at: Timestamp,
    pub tags: Vec<String>,
    pub dependency_keys: Vec<String>,
    pub triggers: Vec<InvalidationTrigger>,
}

// ---------------------------------------------------------------------------
// Invalidation log and stats
// ---------------------------------------------------------------------------

/// One bulk invalidation, retained for audit with its operator-supplied
/// reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationRecord {
    pub pattern: String,
    pub reason: String,
    pub at: Timestamp,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub invalidations: u64,
    pub evictions: u64,
    pub trigger_expirations: u64,
}
