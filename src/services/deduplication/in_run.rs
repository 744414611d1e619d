//! Bounded set of hashes accepted during the current run.

use crate::models::RecordId;
use lru::LruCache;
use std::num::NonZeroUsize;

/// LRU map from content hash to the record id it was accepted as.
///
/// Only the most recent `capacity` hashes are kept; older ones fall back to
/// the store lookup, which sees them once their batch is committed.
pub struct InRunSet {
    cache: LruCache<String, RecordId>,
}

impl InRunSet {
    /// Creates a set holding at most `capacity` hashes.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: LruCache::new(capacity),
        }
    }

    /// Returns the record a hash was accepted as, refreshing its recency.
    pub fn get(&mut self, content_hash: &str) -> Option<RecordId> {
        self.cache.get(content_hash).cloned()
    }

    /// Remembers an accepted hash.
    #[allow(clippy::cast_precision_loss)]
    pub fn insert(&mut self, content_hash: String, id: RecordId) {
        self.cache.put(content_hash, id);
        metrics::gauge!("dedup_in_run_cache_size").set(self.cache.len() as f64);
    }

    /// Number of remembered hashes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns `true` when nothing has been remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
