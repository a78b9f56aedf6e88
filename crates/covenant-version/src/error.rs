use covenant_core::{CoreError, VersionStatus};
use thiserror::Error;

use crate::merge::MergeConflict;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("version {version} of policy {policy_id} not found")]
    VersionNotFound { policy_id: String, version: String },

    #[error("version {version} of policy {policy_id} already exists")]
    DuplicateVersion { policy_id: String, version: String },

    #[error(
        "invalid state transition: cannot {attempted} version {version} of policy {policy_id} \
         while {from}"
    )]
    InvalidStateTransition {
        policy_id: String,
        version: String,
        from: VersionStatus,
        attempted: &'static str,
    },

    #[error("merge produced {} unresolved conflict(s)", .0.len())]
    MergeConflicts(Vec<MergeConflict>),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store error: {0}")]
    Store(#[from] CoreError),

    #[error("audit error: {0}")]
    Audit(#[from] covenant_audit::AuditError),
}

pub type VersionResult<T> = Result<T, VersionError>;
