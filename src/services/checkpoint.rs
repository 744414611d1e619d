//! Checkpoint lifecycle for import runs.

use crate::models::{ImportProgress, ImportStatus};
use crate::Result;
use crate::storage::CheckpointStore;
use std::path::Path;
use std::sync::Arc;

/// What a new run should do, given the stored checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDecision {
    /// The file was already imported; nothing to do.
    AlreadyCompleted(ImportProgress),
    /// Continue after `processed_lines` messages.
    Resume(ImportProgress),
    /// Start from the first message.
    Fresh(ImportProgress),
}

impl ResumeDecision {
    /// The checkpoint the run continues with.
    #[must_use]
    pub const fn progress(&self) -> &ImportProgress {
        match self {
            Self::AlreadyCompleted(p) | Self::Resume(p) | Self::Fresh(p) => p,
        }
    }
}

/// Loads, decides on and persists [`ImportProgress`].
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    /// Creates a manager over a checkpoint store.
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Loads the checkpoint for a construct and file.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored checkpoint cannot be read.
    pub fn load(&self, construct_id: &str, file_path: &Path) -> Result<Option<ImportProgress>> {
        self.store.load(construct_id, file_path)
    }

    /// Persists a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be written.
    pub fn save(&self, progress: &ImportProgress) -> Result<()> {
        self.store.save(progress)
    }

    /// Removes a checkpoint, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be removed.
    pub fn clear(&self, construct_id: &str, file_path: &Path) -> Result<bool> {
        self.store.clear(construct_id, file_path)
    }

    /// Lists all checkpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoints cannot be enumerated.
    pub fn list(&self) -> Result<Vec<ImportProgress>> {
        self.store.list()
    }

    /// Decides how a run starts and persists the resulting checkpoint.
    ///
    /// `count_messages` runs only when a fresh checkpoint is created. With
    /// `resume` false any existing checkpoint, completed or not, is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, counting or saving fails.
    pub fn begin(
        &self,
        construct_id: &str,
        file_path: &Path,
        source_name: &str,
        resume: bool,
        run_id: &str,
        count_messages: impl FnOnce() -> Result<u64>,
    ) -> Result<ResumeDecision> {
        let existing = self.load(construct_id, file_path)?;

        let decision = match existing {
            Some(progress) if resume && progress.status == ImportStatus::Completed => {
                tracing::info!(
                    construct_id,
                    path = %file_path.display(),
                    "File already imported"
                );
                return Ok(ResumeDecision::AlreadyCompleted(progress));
            },
            Some(mut progress) if resume => {
                tracing::info!(
                    construct_id,
                    path = %file_path.display(),
                    previous_status = %progress.status,
                    processed = progress.processed_lines,
                    "Resuming import"
                );
                progress.resume(run_id);
                ResumeDecision::Resume(progress)
            },
            previous => {
                if previous.is_some() {
                    tracing::info!(construct_id, path = %file_path.display(), "Replacing checkpoint");
                }
                let total = count_messages()?;
                let mut progress = ImportProgress::new(construct_id, file_path, source_name, total);
                progress.resume(run_id);
                ResumeDecision::Fresh(progress)
            },
        };

        self.save(decision.progress())?;
        Ok(decision)
    }
}
