//! Read-through cache in front of a code index.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::index::{CodeDomainIndex, CodeKey};
use crate::error::CohortResult;
use crate::types::DomainType;

/// Hit and miss counters for a [`CachedCodeDomainIndex`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups forwarded to the wrapped index.
    pub misses: u64,
    /// Codes currently cached.
    pub entries: usize,
}

/// Caches lookups by `(type, subtype, code)`.
///
/// Entries never expire on their own; call
/// [`invalidate_all`](Self::invalidate_all) when the code index is rebuilt.
/// Failed lookups are not cached.
pub struct CachedCodeDomainIndex {
    inner: Arc<dyn CodeDomainIndex>,
    entries: RwLock<HashMap<CodeKey, Vec<DomainType>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedCodeDomainIndex {
    /// Wraps an index.
    pub fn new(inner: Arc<dyn CodeDomainIndex>) -> Self {
        Self {
            inner,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Drops every cached entry.
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.write();
        debug!(entries = entries.len(), "Invalidating code index cache");
        entries.clear();
    }

    /// Returns the current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().len(),
        }
    }
}

#[async_trait]
impl CodeDomainIndex for CachedCodeDomainIndex {
    async fn find_domains_for_code(&self, key: &CodeKey) -> CohortResult<Vec<DomainType>> {
        let cached = self.entries.read().get(key).cloned();
        if let Some(domains) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(domains);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let domains = self.inner.find_domains_for_code(key).await?;
        self.entries.write().insert(key.clone(), domains.clone());
        Ok(domains)
    }
}
