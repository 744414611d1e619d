//! Duplicate detection for imported messages.
//!
//! Two tiers, checked in order:
//! 1. **In-run**: bounded LRU of hashes accepted earlier in this run
//! 2. **Stored**: hash lookup in the store, confirmed by normalized prefix
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                   Deduplicator                   │
//! │  ┌──────────────────┐   ┌──────────────────────┐ │
//! │  │ InRunSet         │   │ StoreMatchChecker    │ │
//! │  │ LRU hash -> id   │   │ hash + prefix check  │ │
//! │  └──────────────────┘   └──────────────────────┘ │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! A failed store lookup never blocks an import: the message is treated as
//! fresh and the failure is counted in `dedup_check_failures_total`.

mod hasher;
mod in_run;
mod store_match;
mod types;

pub use hasher::ContentHasher;
pub use in_run::InRunSet;
pub use store_match::StoreMatchChecker;
pub use types::{DedupOutcome, DuplicateReason};

use crate::models::RecordId;
use crate::storage::MemoryStore;
use crate::{Error, Result};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Per-run duplicate detector scoped to one construct and source.
pub struct Deduplicator {
    construct_id: String,
    source: String,
    store: StoreMatchChecker,
    seen: InRunSet,
}

impl Deduplicator {
    /// Creates a deduplicator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `cache_capacity` or `prefix_len`
    /// is zero.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        construct_id: impl Into<String>,
        source: impl Into<String>,
        prefix_len: usize,
        cache_capacity: usize,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(cache_capacity).ok_or_else(|| {
            Error::InvalidInput("dedup cache capacity must be positive".to_string())
        })?;
        if prefix_len == 0 {
            return Err(Error::InvalidInput(
                "dedup prefix length must be positive".to_string(),
            ));
        }
        Ok(Self {
            construct_id: construct_id.into(),
            source: source.into(),
            store: StoreMatchChecker::new(store, prefix_len),
            seen: InRunSet::new(capacity),
        })
    }

    /// Classifies a message by its content and precomputed hash.
    pub fn check(&mut self, content: &str, content_hash: &str) -> DedupOutcome {
        let outcome = if let Some(matched_id) = self.seen.get(content_hash) {
            DedupOutcome::Duplicate {
                matched_id,
                reason: DuplicateReason::SeenInRun,
            }
        } else {
            match self
                .store
                .check(&self.construct_id, &self.source, content, content_hash)
            {
                Ok(Some(matched_id)) => {
                    // Later repeats in this run can skip the store round trip.
                    self.seen.insert(content_hash.to_string(), matched_id.clone());
                    DedupOutcome::Duplicate {
                        matched_id,
                        reason: DuplicateReason::Stored,
                    }
                },
                Ok(None) => DedupOutcome::Fresh,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        construct_id = %self.construct_id,
                        source = %self.source,
                        "Duplicate check failed, treating message as fresh"
                    );
                    metrics::counter!("dedup_check_failures_total").increment(1);
                    DedupOutcome::Fresh
                },
            }
        };

        if let DedupOutcome::Duplicate { reason, .. } = &outcome {
            metrics::counter!("ingest_duplicates_total", "reason" => reason.as_str()).increment(1);
        }
        outcome
    }

    /// Records that a fresh message was accepted under `id`.
    pub fn remember(&mut self, content_hash: String, id: RecordId) {
        self.seen.insert(content_hash, id);
    }
}
