//! Store lookup for previously committed content.

use super::hasher::ContentHasher;
use crate::Result;
use crate::models::RecordId;
use crate::storage::{MemoryStore, RecordFilter, RecordQuery};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Finds committed records with the same content hash.
///
/// Candidates are narrowed by the indexed hash column within the construct
/// and source. Each candidate must also share the leading characters of its
/// normalized content with the message, so raw whitespace differences never
/// hide a stored copy.
pub struct StoreMatchChecker {
    store: Arc<dyn MemoryStore>,
    prefix_len: usize,
}

impl StoreMatchChecker {
    /// Creates a checker over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn MemoryStore>, prefix_len: usize) -> Self {
        Self { store, prefix_len }
    }

    /// Returns the id of a stored record with this hash, if any.
    ///
    /// # Errors
    ///
    /// Returns the store error unchanged.
    #[instrument(
        skip(self, content, content_hash),
        fields(operation = "dedup_store_lookup", content_length = content.len())
    )]
    pub fn check(
        &self,
        construct_id: &str,
        source: &str,
        content: &str,
        content_hash: &str,
    ) -> Result<Option<RecordId>> {
        let start = Instant::now();
        let query = RecordQuery::new(
            RecordFilter::new()
                .with_construct(construct_id)
                .with_source(source)
                .with_content_hash(content_hash),
        );

        let normalized = ContentHasher::normalize(content);
        let prefix = ContentHasher::prefix(&normalized, self.prefix_len);
        let matched = self
            .store
            .find(&query)?
            .into_iter()
            .find(|record| {
                record.metadata.content_hash == content_hash
                    && ContentHasher::normalize(&record.content).starts_with(prefix)
            })
            .map(|record| record.id);

        metrics::histogram!(
            "dedup_check_duration_ms",
            "found" => if matched.is_some() { "true" } else { "false" }
        )
        .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(matched)
    }
}
