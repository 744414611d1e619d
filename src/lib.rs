//! # Mnemos
//!
//! Resumable ingestion of conversation exports into a per-construct memory store.
//!
//! Mnemos reads large conversational exports (structured message-tree exports and
//! free-form chat transcripts), turns every turn into a deduplicated, embedded
//! memory record, and commits them batch by batch so an interrupted import can
//! resume without committing anything twice.
//!
//! ## Pipeline
//!
//! ```text
//! file ─► detect ─► parse (lazy) ─► chunk ─► dedup ─► embed ─► commit+flush
//!                                                                  │
//!          final verify ◄── loop until exhausted ◄── checkpoint ◄── verify
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use mnemos::{ImportRequest, ImportService, PipelineConfig};
//!
//! let service = ImportService::new(store, embedder, checkpoints, PipelineConfig::default())?;
//! let result = service.import_conversation(
//!     ImportRequest::new("export.json", "construct-7").with_source_name("chat-2024"),
//! )?;
//! println!("{} imported in {} batches", result.imported_messages, result.batches);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod embedding;
pub mod io;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::{MnemosConfig, PipelineConfig};
pub use embedding::Embedder;
pub use models::{
    ImportProgress, ImportResult, ImportResultStatus, ImportStatus, MemoryRecord, Message, RecordId,
    Role,
};
pub use services::{CancellationFlag, ImportRequest, ImportService};
pub use storage::{CheckpointStore, MemoryStore};

/// Error type for mnemos operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Zero batch size, empty construct id, unknown format names |
/// | `OperationFailed` | I/O errors, store queries fail, embedding requests fail |
/// | `Parse` | Malformed export JSON, transcript bytes undecodable after fallback |
/// | `ImportFailed` | Any fatal error inside an import run (carries the partial result) |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements or transactions fail
    /// - Filesystem I/O errors occur (checkpoints, source files)
    /// - The embedding endpoint is unreachable or returns a malformed body
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A source file could not be parsed.
    #[error("failed to parse '{source_name}' near line {line}: {cause}")]
    Parse {
        /// Source identity of the file being parsed.
        source_name: String,
        /// One-based line number; for malformed tree export structure, the
        /// one-based conversation ordinal.
        line: usize,
        /// What went wrong.
        cause: String,
    },

    /// An import run stopped on a fatal error.
    ///
    /// The checkpoint has already been marked failed when this is returned, and
    /// `result` reports everything that was committed before the failure.
    #[error("import failed: {cause}")]
    ImportFailed {
        /// Rendered cause, also persisted as the checkpoint's error message.
        cause: String,
        /// Partial result of the run.
        result: Box<ImportResult>,
    },
}

/// Result type alias for mnemos operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// # Examples
///
/// ```rust
/// use mnemos::current_timestamp;
///
/// assert!(current_timestamp() > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
