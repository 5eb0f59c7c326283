//! Tenant-wide cache invalidation.
//!
//! Derived views (listings, subtree counts, hierarchy projections)
//! depend transitively on any single unit, so point invalidation
//! cannot enumerate the affected keys cheaply. Every change clears the
//! tenant's whole namespace and readers repopulate on the next miss.

use tracing::{debug, info};

use orgledger_capture::{Applier, ApplyError, ChangeEvent};

use crate::cache::{CacheStore, CacheStoreError};
use crate::config::DEFAULT_CACHE_PREFIX;

pub struct CacheInvalidator<C> {
    store: C,
    prefix: String,
}

impl<C: CacheStore> CacheInvalidator<C> {
    pub fn new(store: C) -> Self {
        Self::with_prefix(store, DEFAULT_CACHE_PREFIX)
    }

    pub fn with_prefix(store: C, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn pattern_for(&self, change: &ChangeEvent) -> String {
        format!("{}:{}:*", self.prefix, change.tenant_id)
    }
}

impl<C: CacheStore> Applier for CacheInvalidator<C> {
    fn name(&self) -> &'static str {
        "cache_invalidator"
    }

    // Deleting keys is idempotent, so redelivery and overlapping
    // invalidations converge on the same empty namespace.
    fn apply(&self, change: &ChangeEvent) -> Result<(), ApplyError> {
        let pattern = self.pattern_for(change);
        let keys = self.store.keys(&pattern).map_err(map_store_error)?;
        if keys.is_empty() {
            debug!(tenant_id = %change.tenant_id, "no cached entries to invalidate");
            return Ok(());
        }
        let removed = self.store.del(&keys).map_err(map_store_error)?;
        info!(
            tenant_id = %change.tenant_id,
            code = %change.code,
            removed,
            "cache entries invalidated"
        );
        Ok(())
    }
}

fn map_store_error(err: CacheStoreError) -> ApplyError {
    match err {
        CacheStoreError::Connection(message) => ApplyError::transient(message),
        CacheStoreError::Command(message) => ApplyError::fatal(message),
    }
}
