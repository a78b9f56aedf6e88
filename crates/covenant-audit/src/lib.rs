//! Covenant Audit Trail
//!
//! Records every policy state transition as a tamper-evident, hash-chained
//! audit entry. Each entry carries a keyed integrity hash over its canonical
//! fields and a link to the previous entry's hash; verification walks the
//! chain and localizes the first break and every tampered entry.
//!
//! Also home to the structural diff engine (policy content is a tagged
//! scalar/array/object tree, diffed by a pure recursive function) and the
//! compliance reporting surface.

pub mod chain;
pub mod diff;
pub mod error;
pub mod report;
pub mod sanitize;

pub use chain::{AuditConfig, AuditTrailService, ChangeRequest, IntegrityReport};
pub use diff::{apply_diff, changeset_from_diff, compute_diff};
pub use error::{AuditError, AuditResult};
pub use report::{retention_secs, ComplianceReport};
pub use sanitize::sanitize_details;
