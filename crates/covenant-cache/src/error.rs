use covenant_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

pub type CacheResult<T> = Result<T, CacheError>;
