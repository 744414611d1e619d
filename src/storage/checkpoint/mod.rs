//! Checkpoint store adapters.

mod file;
mod memory;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

use sha2::{Digest, Sha256};
use std::path::Path;

/// Length of the hex key naming one checkpoint.
const KEY_LEN: usize = 24;

/// Derives the storage key for a `(construct_id, file_path)` pair.
pub(crate) fn checkpoint_key(construct_id: &str, file_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(construct_id.as_bytes());
    hasher.update([0]);
    hasher.update(file_path.to_string_lossy().as_bytes());
    let mut key = hex::encode(hasher.finalize());
    key.truncate(KEY_LEN);
    key
}
