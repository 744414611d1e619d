//! In-process checkpoint store.

use crate::Result;
use crate::models::ImportProgress;
use crate::storage::sqlite::acquire_lock;
use crate::storage::traits::CheckpointStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Keeps checkpoints in a map; nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: Mutex<HashMap<(String, PathBuf), ImportProgress>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, construct_id: &str, file_path: &Path) -> Result<Option<ImportProgress>> {
        let entries = acquire_lock(&self.entries);
        Ok(entries
            .get(&(construct_id.to_string(), file_path.to_path_buf()))
            .cloned())
    }

    fn save(&self, progress: &ImportProgress) -> Result<()> {
        acquire_lock(&self.entries).insert(
            (progress.construct_id.clone(), progress.file_path.clone()),
            progress.clone(),
        );
        Ok(())
    }

    fn clear(&self, construct_id: &str, file_path: &Path) -> Result<bool> {
        Ok(acquire_lock(&self.entries)
            .remove(&(construct_id.to_string(), file_path.to_path_buf()))
            .is_some())
    }

    fn list(&self) -> Result<Vec<ImportProgress>> {
        Ok(acquire_lock(&self.entries).values().cloned().collect())
    }
}
