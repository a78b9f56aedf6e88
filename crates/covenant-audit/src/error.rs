use covenant_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("chain lock poisoned: {0}")]
    ChainLock(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AuditResult<T> = Result<T, AuditError>;
