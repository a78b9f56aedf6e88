//! Storage seam for the decision cache.
//!
//! The cache is a derived, disposable view; a backend may drop entries
//! at any time without correctness loss. Implementations must be
//! atomic per key.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{CacheError, CacheResult};
use crate::types::CachedDecision;

pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> CacheResult<Option<CachedDecision>>;
    fn set(&self, entry: CachedDecision) -> CacheResult<()>;
    /// Returns true when the key existed.
    fn delete(&self, key: &str) -> CacheResult<bool>;
    fn keys(&self) -> CacheResult<Vec<String>>;
    fn len(&self) -> CacheResult<usize>;
    fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }
    fn clear(&self) -> CacheResult<usize>;
}

// ---------------------------------------------------------------------------
// InMemoryCacheBackend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: Mutex<HashMap<String, CachedDecision>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, HashMap<String, CachedDecision>>> {
        self.entries
            .lock()
            .map_err(|e| CacheError::Backend(format!("cache lock poisoned: {e}")))
    }
}

impl CacheBackend for InMemoryCacheBackend {
    fn get(&self, key: &str) -> CacheResult<Option<CachedDecision>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, entry: CachedDecision) -> CacheResult<()> {
        self.lock()?.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn len(&self) -> CacheResult<usize> {
        Ok(self.lock()?.len())
    }

    fn clear(&self) -> CacheResult<usize> {
        let mut entries = self.lock()?;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}
