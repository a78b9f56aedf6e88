use thiserror::Error;

#[derive(Debug, Error)]
pub enum CovenantError {
    #[error(transparent)]
    Core(#[from] covenant_core::CoreError),

    #[error(transparent)]
    Version(#[from] covenant_version::VersionError),

    #[error(transparent)]
    Audit(#[from] covenant_audit::AuditError),

    #[error(transparent)]
    Rollback(#[from] covenant_rollback::RollbackError),

    #[error(transparent)]
    Cache(#[from] covenant_cache::CacheError),

    #[error("no active version for policy {0}")]
    NoActiveVersion(String),
}

pub type CovenantResult<T> = Result<T, CovenantError>;
