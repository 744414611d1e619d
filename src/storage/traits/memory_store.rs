//! Memory store trait.
//!
//! The store persists [`MemoryRecord`]s and answers the equality and prefix
//! queries the import pipeline needs for deduplication and verification.
//!
//! # Available Implementations
//!
//! | Backend | Use Case |
//! |---------|----------|
//! | `SqliteMemoryStore` | Local file or in-memory database |

use crate::Result;
use crate::models::MemoryRecord;

/// Equality filter over record metadata.
///
/// Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Construct owning the records.
    pub construct_id: Option<String>,
    /// Source name.
    pub source: Option<String>,
    /// Batch that committed the records.
    pub batch_index: Option<u64>,
    /// Content hash.
    pub content_hash: Option<String>,
}

impl RecordFilter {
    /// Creates an empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            construct_id: None,
            source: None,
            batch_index: None,
            content_hash: None,
        }
    }

    /// Restricts to one construct.
    #[must_use]
    pub fn with_construct(mut self, construct_id: impl Into<String>) -> Self {
        self.construct_id = Some(construct_id.into());
        self
    }

    /// Restricts to one source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Restricts to one batch.
    #[must_use]
    pub const fn with_batch_index(mut self, batch_index: u64) -> Self {
        self.batch_index = Some(batch_index);
        self
    }

    /// Restricts to one content hash.
    #[must_use]
    pub fn with_content_hash(mut self, content_hash: impl Into<String>) -> Self {
        self.content_hash = Some(content_hash.into());
        self
    }
}

/// Record lookup: a metadata filter plus an optional content prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    /// Metadata filter.
    pub filter: RecordFilter,
    /// Records must start with this text.
    pub content_prefix: Option<String>,
    /// Maximum records returned.
    pub limit: usize,
}

impl RecordQuery {
    /// Default cap on returned records.
    pub const DEFAULT_LIMIT: usize = 32;

    /// Creates a query over `filter`.
    #[must_use]
    pub const fn new(filter: RecordFilter) -> Self {
        Self {
            filter,
            content_prefix: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    /// Requires records to start with `prefix`.
    #[must_use]
    pub fn with_content_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.content_prefix = Some(prefix.into());
        self
    }

    /// Sets the result cap.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Trait for memory record stores.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait MemoryStore: Send + Sync {
    /// Returns records matching `query`, up to `query.limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn find(&self, query: &RecordQuery) -> Result<Vec<MemoryRecord>>;

    /// Writes `records` as one unit. Records whose id already exists are
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; nothing is written in that case.
    fn commit(&self, records: &[MemoryRecord]) -> Result<()>;

    /// Forces committed records to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> Result<()>;

    /// Counts records matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    fn count(&self, filter: &RecordFilter) -> Result<u64>;
}
