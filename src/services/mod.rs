//! Import pipeline services.
//!
//! Each stage is a small service over injected storage and embedding
//! backends; [`ImportService`] drives them batch by batch.

mod checkpoint;
mod chunker;
pub mod deduplication;
mod import;
mod verifier;

pub use checkpoint::{CheckpointManager, ResumeDecision};
pub use chunker::{Batch, Chunker, chunk};
pub use deduplication::{ContentHasher, DedupOutcome, Deduplicator, DuplicateReason};
pub use import::{CancellationFlag, ImportRequest, ImportService};
pub use verifier::{Verification, Verifier};
