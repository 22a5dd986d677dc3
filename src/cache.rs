//! Expansion cache for the query rewriting gateway.
//!
//! Entries are keyed on the exact query text and expire after the configured
//! TTL. A disabled cache never stores anything, so callers can hold one
//! unconditionally.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::config::CacheConfig;
use crate::metrics::get_metrics;
use crate::search::ExpandedQuery;

/// TTL cache of expansion results.
#[derive(Clone)]
pub struct ExpansionCache {
    cache: Cache<String, Arc<ExpandedQuery>>,
    enabled: bool,
}

impl ExpansionCache {
    /// Create a new expansion cache from configuration.
    pub fn new(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();

        Self {
            cache,
            enabled: true,
        }
    }

    /// Create a disabled cache.
    pub fn disabled() -> Self {
        Self {
            cache: Cache::builder().max_capacity(0).build(),
            enabled: false,
        }
    }

    /// Check if caching is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get a cached expansion for the exact query text.
    pub async fn get(&self, query: &str) -> Option<Arc<ExpandedQuery>> {
        if !self.enabled {
            return None;
        }

        let result = self.cache.get(query).await;
        let metrics = get_metrics();
        if result.is_some() {
            metrics.expansion_cache_hits_total.inc();
        } else {
            metrics.expansion_cache_misses_total.inc();
        }
        result
    }

    /// Store an expansion.
    pub async fn insert(&self, query: &str, expanded: ExpandedQuery) {
        if !self.enabled {
            return;
        }
        self.cache.insert(query.to_string(), Arc::new(expanded)).await;
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl std::fmt::Debug for ExpansionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpansionCache")
            .field("enabled", &self.enabled)
            .finish()
    }
}
