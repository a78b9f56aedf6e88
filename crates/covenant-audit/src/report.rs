//! Compliance reporting and retention policy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use covenant_core::{AuditEventType, AuditFilter, DataClassification, Timestamp};

use crate::chain::AuditTrailService;
use crate::error::AuditResult;

const SECONDS_PER_YEAR: u64 = 31_557_600;

/// Retention period for audit entries, by data classification.
///
/// Culturally sensitive and financial material is retained longest.
pub fn retention_secs(classification: DataClassification) -> u64 {
    let years = match classification {
        DataClassification::Public => 1,
        DataClassification::Internal => 2,
        DataClassification::Sensitive => 5,
        DataClassification::Financial => 7,
        DataClassification::Cultural => 7,
    };
    years * SECONDS_PER_YEAR
}

/// Aggregated compliance report over a date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub from: Timestamp,
    pub to: Timestamp,
    pub total_entries: usize,
    pub change_count: usize,
    pub approval_count: usize,
    pub rollback_count: usize,
    /// Percentage of entries carrying user, session, and request ids and
    /// passing integrity recomputation.
    pub completeness_pct: f64,
    pub entries_by_classification: BTreeMap<String, usize>,
}

impl AuditTrailService {
    /// Aggregate change, approval, and rollback activity over a date range,
    /// plus an audit-completeness percentage.
    pub fn generate_compliance_report(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> AuditResult<ComplianceReport> {
        let filter = AuditFilter {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        };
        let entries = self.store.get_audit_trail(None, &filter)?;

        let mut change_count = 0;
        let mut approval_count = 0;
        let mut rollback_count = 0;
        let mut complete = 0usize;
        let mut entries_by_classification: BTreeMap<String, usize> = BTreeMap::new();

        for entry in &entries {
            match entry.event_type {
                AuditEventType::VersionCreated
                | AuditEventType::VersionUpdated
                | AuditEventType::VersionDeployed
                | AuditEventType::VersionBranched
                | AuditEventType::VersionsMerged => change_count += 1,
                AuditEventType::VersionApproved => approval_count += 1,
                AuditEventType::RollbackExecuted => rollback_count += 1,
                _ => {}
            }

            *entries_by_classification
                .entry(entry.classification.to_string())
                .or_insert(0) += 1;

            let identified = !entry.user_id.as_str().is_empty()
                && entry.session_id.is_some()
                && !entry.request_id.as_str().is_empty();
            let intact = self.compute_entry_hash(entry)? == entry.integrity_hash;
            if identified && intact {
                complete += 1;
            }
        }

        let completeness_pct = if entries.is_empty() {
            100.0
        } else {
            complete as f64 / entries.len() as f64 * 100.0
        };

        Ok(ComplianceReport {
            from,
            to,
            total_entries: entries.len(),
            change_count,
            approval_count,
            rollback_count,
            completeness_pct,
            entries_by_classification,
        })
    }
}
