//! Policy decision cache.
//!
//! A derived, disposable view over decision results: the store stays
//! authoritative and the whole cache may be dropped at any time. Keys
//! are deterministic over normalized input; entries carry invalidation
//! triggers evaluated against live state on every read.

pub mod backend;
pub mod cache;
pub mod error;
pub mod key;
pub mod types;

pub use backend::{CacheBackend, InMemoryCacheBackend};
pub use cache::{ttl_for, CacheConfig, DecisionCache};
pub use error::{CacheError, CacheResult};
pub use key::decision_key;
pub use types::{
    CacheStats, CachedDecision, DecisionEvaluator, DecisionInput, DecisionMetadata,
    InvalidationRecord, InvalidationTrigger, TriggerState,
};
