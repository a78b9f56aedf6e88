//! Rollback plan validation and execution.
//!
//! A rollback plan names an abstract target (version, tag, timestamp,
//! or changeset) and a scope of policy ids. Validation resolves the
//! target per policy, analyzes the dependency graph, detects conflicts,
//! and gates execution; execution creates fresh versions rather than
//! rewriting history.

pub mod conflict;
pub mod error;
pub mod execute;
pub mod graph;
pub mod resolve;
pub mod types;
pub mod validate;

pub use conflict::{ComplianceChecker, NoopComplianceChecker};
pub use error::{RollbackError, RollbackResult};
pub use graph::DependencyGraph;
pub use types::{
    Conflict, ConflictKind, ExecutionStatus, PolicyOutcome, ResolutionKind, ResolutionOption,
    ResolvedTarget, RollbackExecution, ValidationCheck, ValidationReport,
};
pub use validate::{RollbackConfig, RollbackService};
