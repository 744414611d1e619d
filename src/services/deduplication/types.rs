//! Deduplication outcome types.

use crate::models::RecordId;
use serde::{Deserialize, Serialize};

/// Result of checking one message against the store and the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DedupOutcome {
    /// No matching record; the message should be committed.
    Fresh,
    /// The content already exists.
    Duplicate {
        /// Record the message matched.
        matched_id: RecordId,
        /// Where the match was found.
        reason: DuplicateReason,
    },
}

impl DedupOutcome {
    /// Returns `true` for [`DedupOutcome::Duplicate`].
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Why a message was classified as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    /// A committed record with the same hash exists for this construct and source.
    Stored,
    /// An earlier message of this run had the same hash.
    SeenInRun,
}

impl DuplicateReason {
    /// Returns the metrics label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::SeenInRun => "seen_in_run",
        }
    }
}

impl std::fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
