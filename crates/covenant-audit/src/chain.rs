//! The audit trail service: hash-chained entry recording and verification.
//!
//! Appending an entry must atomically read the last hash and persist the
//! new entry carrying it as `previous_hash`. That read-link-write window is
//! one critical section under a single mutex; without it, concurrent
//! appends could fork the chain and fail verification.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use covenant_core::{
    crypto, AuditEntry, AuditEntryId, AuditEventType, AuditFilter, AuditOutcome, ChangeId,
    ChangeMetadata, ChangeUrgency, IntegrityHash, OperationContext, PolicyChange, PolicyVersion,
    RiskLevel, Timestamp, UserId, VersionStore,
};

use crate::diff::{changeset_from_diff, compute_diff};
use crate::error::{AuditError, AuditResult};
use crate::report::retention_secs;
use crate::sanitize::{sanitize_details, DEFAULT_SENSITIVE_KEYS};

// ---------------------------------------------------------------------------
// AuditConfig
// ---------------------------------------------------------------------------

/// Configuration for the audit trail service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Maximum length of a string detail value before truncation.
    #[serde(default = "default_max_detail_len")]
    pub max_detail_len: usize,

    /// Field-name fragments to redact from entry details.
    #[serde(default = "default_redact_keys")]
    pub redact_keys: Vec<String>,
}

fn default_max_detail_len() -> usize {
    1024
}

fn default_redact_keys() -> Vec<String> {
    DEFAULT_SENSITIVE_KEYS.iter().map(|s| s.to_string()).collect()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_detail_len: default_max_detail_len(),
            redact_keys: default_redact_keys(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeRequest — caller-supplied context for a recorded policy change
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub reason: String,
    pub urgency: ChangeUrgency,
    #[serde(default)]
    pub affected_systems: Vec<String>,
    #[serde(default)]
    pub affected_users: Vec<UserId>,
}

impl ChangeRequest {
    pub fn routine(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            urgency: ChangeUrgency::Routine,
            affected_systems: Vec::new(),
            affected_users: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// IntegrityReport
// ---------------------------------------------------------------------------

/// Result of walking an audit chain. Localizes damage instead of returning
/// a bare boolean: operators get the first broken index and every entry
/// whose stored hash disagrees with its recomputed hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub entries_checked: usize,
    pub first_broken_index: Option<usize>,
    pub tampered_entries: Vec<AuditEntryId>,
}

// ---------------------------------------------------------------------------
// AuditTrailService
// ---------------------------------------------------------------------------

pub struct AuditTrailService {
    pub(crate) store: Arc<dyn VersionStore>,
    pub(crate) key: [u8; 32],
    config: AuditConfig,
    last_hash: Mutex<Option<IntegrityHash>>,
}

impl AuditTrailService {
    /// Create the service, seeding the chain head from any entries already
    /// in the store.
    pub fn new(
        store: Arc<dyn VersionStore>,
        key: [u8; 32],
        config: AuditConfig,
    ) -> AuditResult<Self> {
        let existing = store.get_audit_trail(None, &AuditFilter::default())?;
        let head = existing.last().map(|e| e.integrity_hash.clone());
        Ok(Self {
            store,
            key,
            config,
            last_hash: Mutex::new(head),
        })
    }

    fn lock_head(&self) -> AuditResult<MutexGuard<'_, Option<IntegrityHash>>> {
        self.last_hash
            .lock()
            .map_err(|e| AuditError::ChainLock(e.to_string()))
    }

    /// Record one audit entry: sanitize details, link to the chain head,
    /// compute the keyed integrity hash, persist, and advance the head.
    ///
    /// The head is advanced only after the store accepts the entry, so a
    /// failed persist leaves the chain unchanged.
    pub fn record_entry(
        &self,
        event_type: AuditEventType,
        target: &str,
        details: serde_json::Value,
        result: AuditOutcome,
        ctx: &OperationContext,
    ) -> AuditResult<AuditEntry> {
        let sanitized = sanitize_details(&details, &self.config.redact_keys, self.config.max_detail_len);
        let now = Timestamp::now();

        let mut guard = self.lock_head()?;
        let mut entry = AuditEntry {
            entry_id: AuditEntryId::new(uuid::Uuid::new_v4().to_string()),
            request_id: ctx.request_id.clone(),
            session_id: ctx.session_id.clone(),
            timestamp: now,
            event_type,
            user_id: ctx.user_id.clone(),
            target: target.to_string(),
            details: sanitized,
            result,
            classification: ctx.classification,
            retention_until: now.plus_seconds(retention_secs(ctx.classification)),
            integrity_hash: IntegrityHash([0u8; 32]),
            previous_hash: guard.clone(),
        };
        entry.integrity_hash = self.compute_entry_hash(&entry)?;

        self.store.save_audit_entry(&entry)?;
        *guard = Some(entry.integrity_hash.clone());
        drop(guard);

        tracing::debug!(
            entry_id = %entry.entry_id,
            event = %event_type,
            target = %entry.target,
            "audit entry recorded"
        );
        Ok(entry)
    }

    /// Keyed hash over the entry's canonical fields, excluding the stored
    /// integrity hash itself.
    pub(crate) fn compute_entry_hash(&self, entry: &AuditEntry) -> AuditResult<IntegrityHash> {
        let mut canonical = entry.clone();
        canonical.integrity_hash = IntegrityHash([0u8; 32]);
        let bytes = serde_json::to_vec(&canonical)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;
        Ok(crypto::keyed_hash(&self.key, &bytes)?)
    }

    /// Record a version transition: compute the structural diff, derive the
    /// changeset, and persist the immutable change record.
    pub fn record_policy_change(
        &self,
        before: Option<&PolicyVersion>,
        after: &PolicyVersion,
        request: &ChangeRequest,
        audit_entry_ids: Vec<AuditEntryId>,
    ) -> AuditResult<PolicyChange> {
        // First versions diff against an empty object so every top-level
        // key records as an addition.
        let base = before
            .map(|v| v.content.clone())
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        let diff = compute_diff(&base, &after.content);
        let changeset = changeset_from_diff(&diff);

        let change = PolicyChange {
            change_id: ChangeId::new(uuid::Uuid::new_v4().to_string()),
            policy_id: after.policy_id.clone(),
            from_version: before.map(|v| v.version.clone()),
            to_version: after.version.clone(),
            metadata: ChangeMetadata {
                reason: request.reason.clone(),
                urgency: request.urgency,
                impact: impact_for(&diff.complexity, after.metadata.impact),
                affected_systems: request.affected_systems.clone(),
                affected_users: request.affected_users.clone(),
                rollback_complexity: diff.complexity,
            },
            diff,
            changeset,
            audit_entry_ids,
            recorded_at: Timestamp::now(),
        };
        self.store.save_change(&change)?;
        Ok(change)
    }

    /// Walk the chain in timestamp order and verify both invariants:
    /// each entry's `previous_hash` must equal its predecessor's stored
    /// hash, and each stored hash must equal the recomputed keyed hash.
    pub fn verify_integrity(&self, filter: &AuditFilter) -> AuditResult<IntegrityReport> {
        let entries = self.store.get_audit_trail(None, filter)?;
        let mut first_broken_index = None;
        let mut tampered_entries = Vec::new();

        let mut expected_prev = entries.first().and_then(|e| e.previous_hash.clone());
        for (index, entry) in entries.iter().enumerate() {
            if entry.previous_hash != expected_prev {
                // Broken chain link
                first_broken_index.get_or_insert(index);
            }
            let recomputed = self.compute_entry_hash(entry)?;
            if recomputed != entry.integrity_hash {
                first_broken_index.get_or_insert(index);
                tampered_entries.push(entry.entry_id.clone());
            }
            expected_prev = Some(entry.integrity_hash.clone());
        }

        let valid = first_broken_index.is_none() && tampered_entries.is_empty();
        if !valid {
            tracing::warn!(
                first_broken_index = ?first_broken_index,
                tampered = tampered_entries.len(),
                "audit chain verification failed"
            );
        }
        Ok(IntegrityReport {
            valid,
            entries_checked: entries.len(),
            first_broken_index,
            tampered_entries,
        })
    }

    /// Query the stored audit trail for one target, or all targets.
    pub fn audit_trail(
        &self,
        target: Option<&str>,
        filter: &AuditFilter,
    ) -> AuditResult<Vec<AuditEntry>> {
        Ok(self.store.get_audit_trail(target, filter)?)
    }
}

/// Declared impact can only grow with observed change complexity.
fn impact_for(complexity: &covenant_core::ChangeComplexity, declared: RiskLevel) -> RiskLevel {
    use covenant_core::ChangeComplexity;
    let floor = match complexity {
        ChangeComplexity::Trivial | ChangeComplexity::Simple => RiskLevel::Low,
        ChangeComplexity::Moderate => RiskLevel::Medium,
        ChangeComplexity::Complex => RiskLevel::High,
        ChangeComplexity::Major => RiskLevel::Critical,
    };
    declared.max(floor)
}
