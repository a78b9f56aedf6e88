use covenant_core::{CoreError, PlanState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("rollback plan not found: {0}")]
    PlanNotFound(String),

    #[error("plan {plan_id} is {state:?}, cannot {attempted}")]
    InvalidPlanState {
        plan_id: String,
        state: PlanState,
        attempted: &'static str,
    },

    #[error("store error: {0}")]
    Store(#[from] CoreError),

    #[error("audit error: {0}")]
    Audit(#[from] covenant_audit::AuditError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type RollbackResult<T> = Result<T, RollbackError>;
