//! Read-through cache invalidation target.
//!
//! The pipeline only ever lists keys by pattern and deletes them, so
//! the port stays that small. API nodes own filling the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use redis::RedisCacheStore;

#[derive(Debug, thiserror::Error)]
pub enum CacheStoreError {
    #[error("cache connection error: {0}")]
    Connection(String),
    #[error("cache command error: {0}")]
    Command(String),
}

pub trait CacheStore: Send + Sync {
    /// Keys matching a `*` glob pattern.
    fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheStoreError>;

    /// Deletes the given keys, returning how many existed.
    fn del(&self, keys: &[String]) -> Result<u64, CacheStoreError>;
}

impl<C: CacheStore + ?Sized> CacheStore for Arc<C> {
    fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheStoreError> {
        (**self).keys(pattern)
    }

    fn del(&self, keys: &[String]) -> Result<u64, CacheStoreError> {
        (**self).del(keys)
    }
}

/// Map-backed store for tests and local runs.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), CacheStoreError> {
        let mut entries = self.locked()?;
        entries.insert(key.into(), value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn locked(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, CacheStoreError> {
        self.entries
            .lock()
            .map_err(|_| CacheStoreError::Connection("cache lock poisoned".to_string()))
    }
}

impl CacheStore for InMemoryCacheStore {
    fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheStoreError> {
        let entries = self.locked()?;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn del(&self, keys: &[String]) -> Result<u64, CacheStoreError> {
        let mut entries = self.locked()?;
        let mut removed = 0;
        for key in keys {
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// `*` wildcards only; the invalidator never uses the rest of the
/// Redis glob syntax.
fn glob_match(pattern: &str, key: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}
