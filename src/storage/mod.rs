//! Storage layer.
//!
//! Two boundaries:
//! - [`MemoryStore`]: durable memory records (reference adapter: [`SqliteMemoryStore`])
//! - [`CheckpointStore`]: import progress (reference adapters:
//!   [`FileCheckpointStore`], [`InMemoryCheckpointStore`])

// Dropping the connection guard early gains nothing in single-statement bodies.
#![allow(clippy::significant_drop_tightening)]

pub mod checkpoint;
pub mod sqlite;
pub mod traits;

pub use checkpoint::{FileCheckpointStore, InMemoryCheckpointStore};
pub use sqlite::SqliteMemoryStore;
pub use traits::{CheckpointStore, MemoryStore, RecordFilter, RecordQuery};

use crate::{Error, Result};
use std::path::PathBuf;

/// Returns the per-user data directory (`<data_local_dir>/mnemos`).
///
/// # Errors
///
/// Returns an error if the platform has no home directory.
pub fn get_user_data_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .map(|b| b.data_local_dir().join("mnemos"))
        .ok_or_else(|| Error::OperationFailed {
            operation: "get_user_data_dir".to_string(),
            cause: "Could not determine user data directory".to_string(),
        })
}
