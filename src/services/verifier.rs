//! Advisory post-commit verification.

use crate::storage::{MemoryStore, RecordFilter};
use std::sync::Arc;

/// Outcome of a verification pass. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The store holds what was expected.
    Confirmed {
        /// Records found.
        found: u64,
    },
    /// Fewer records than expected.
    Undercount {
        /// Records found.
        found: u64,
        /// Records expected.
        expected: u64,
    },
    /// The store could not be queried.
    Unavailable,
}

impl Verification {
    /// Returns `true` unless the store reported an undercount.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        !matches!(self, Self::Undercount { .. })
    }
}

/// Counts committed records for one construct and source.
pub struct Verifier {
    store: Arc<dyn MemoryStore>,
    construct_id: String,
    source: String,
    min_ratio: f64,
}

impl Verifier {
    /// Creates a verifier; `min_ratio` is clamped to `0.0..=1.0`.
    #[must_use]
    pub fn new(
        store: Arc<dyn MemoryStore>,
        construct_id: impl Into<String>,
        source: impl Into<String>,
        min_ratio: f64,
    ) -> Self {
        Self {
            store,
            construct_id: construct_id.into(),
            source: source.into(),
            min_ratio: min_ratio.clamp(0.0, 1.0),
        }
    }

    fn filter(&self) -> RecordFilter {
        RecordFilter::new()
            .with_construct(self.construct_id.as_str())
            .with_source(self.source.as_str())
    }

    fn count(&self, filter: &RecordFilter) -> Option<u64> {
        match self.store.count(filter) {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(error = %e, "Verification count failed");
                None
            },
        }
    }

    /// Checks that at least one record carries `batch_index`.
    pub fn verify_batch(&self, batch_index: u64) -> Verification {
        let Some(found) = self.count(&self.filter().with_batch_index(batch_index)) else {
            return Verification::Unavailable;
        };
        if found == 0 {
            tracing::warn!(
                construct_id = %self.construct_id,
                source = %self.source,
                batch_index,
                "Committed batch not visible in store"
            );
            metrics::counter!("verification_warnings_total", "scope" => "batch").increment(1);
            return Verification::Undercount { found, expected: 1 };
        }
        Verification::Confirmed { found }
    }

    /// Compares the stored total with `messages_committed`.
    #[allow(clippy::cast_precision_loss)]
    pub fn verify_final(&self, messages_committed: u64) -> Verification {
        let Some(found) = self.count(&self.filter()) else {
            return Verification::Unavailable;
        };
        if messages_committed > 0 && (found as f64) < (messages_committed as f64) * self.min_ratio {
            tracing::warn!(
                construct_id = %self.construct_id,
                source = %self.source,
                found,
                expected = messages_committed,
                min_ratio = self.min_ratio,
                "Stored record count below expected ratio"
            );
            metrics::counter!("verification_warnings_total", "scope" => "final").increment(1);
            return Verification::Undercount {
                found,
                expected: messages_committed,
            };
        }
        tracing::debug!(found, expected = messages_committed, "Final verification passed");
        Verification::Confirmed { found }
    }
}
