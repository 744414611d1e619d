//! Checkpoint store trait.

use crate::Result;
use crate::models::ImportProgress;
use std::path::Path;

/// Durable storage for [`ImportProgress`], one document per
/// `(construct_id, file_path)`.
pub trait CheckpointStore: Send + Sync {
    /// Loads the checkpoint for a construct and file.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint exists but cannot be read.
    fn load(&self, construct_id: &str, file_path: &Path) -> Result<Option<ImportProgress>>;

    /// Replaces the checkpoint atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be written.
    fn save(&self, progress: &ImportProgress) -> Result<()>;

    /// Removes the checkpoint, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be removed.
    fn clear(&self, construct_id: &str, file_path: &Path) -> Result<bool>;

    /// Lists every stored checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoints cannot be enumerated.
    fn list(&self) -> Result<Vec<ImportProgress>>;
}
