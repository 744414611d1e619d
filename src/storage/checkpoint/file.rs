//! JSON-file checkpoint store.

use super::checkpoint_key;
use crate::models::ImportProgress;
use crate::storage::traits::CheckpointStore;
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Checkpoints larger than this are rejected as corrupt.
const MAX_CHECKPOINT_SIZE: u64 = 1024 * 1024;

/// Stores each checkpoint as `<dir>/<key>.json`.
///
/// Saves write a temporary sibling, fsync it and rename it over the target,
/// so a crash leaves either the old or the new checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `dir`; the directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the checkpoint directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, construct_id: &str, file_path: &Path) -> PathBuf {
        self.dir
            .join(format!("{}.json", checkpoint_key(construct_id, file_path)))
    }

    fn read(path: &Path) -> Result<ImportProgress> {
        let metadata = fs::metadata(path).map_err(|e| Error::OperationFailed {
            operation: "read_checkpoint_metadata".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        if metadata.len() > MAX_CHECKPOINT_SIZE {
            return Err(Error::InvalidInput(format!(
                "Checkpoint exceeds maximum size of {MAX_CHECKPOINT_SIZE} bytes: {}",
                path.display()
            )));
        }
        let bytes = fs::read(path).map_err(|e| Error::OperationFailed {
            operation: "read_checkpoint".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| Error::OperationFailed {
            operation: "deserialize_checkpoint".to_string(),
            cause: format!("{}: {e}", path.display()),
        })
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, construct_id: &str, file_path: &Path) -> Result<Option<ImportProgress>> {
        let path = self.path_for(construct_id, file_path);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn save(&self, progress: &ImportProgress) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::OperationFailed {
            operation: "create_checkpoint_dir".to_string(),
            cause: format!("{}: {e}", self.dir.display()),
        })?;

        let target = self.path_for(&progress.construct_id, &progress.file_path);
        let tmp = target.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(progress).map_err(|e| Error::OperationFailed {
            operation: "serialize_checkpoint".to_string(),
            cause: e.to_string(),
        })?;

        let write_err = |e: std::io::Error| Error::OperationFailed {
            operation: "write_checkpoint".to_string(),
            cause: format!("{}: {e}", tmp.display()),
        };
        let mut file = File::create(&tmp).map_err(write_err)?;
        file.write_all(&json).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        fs::rename(&tmp, &target).map_err(|e| Error::OperationFailed {
            operation: "replace_checkpoint".to_string(),
            cause: format!("{}: {e}", target.display()),
        })?;
        tracing::trace!(path = %target.display(), status = %progress.status, "Checkpoint saved");
        Ok(())
    }

    fn clear(&self, construct_id: &str, file_path: &Path) -> Result<bool> {
        let path = self.path_for(construct_id, file_path);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::OperationFailed {
                operation: "remove_checkpoint".to_string(),
                cause: format!("{}: {e}", path.display()),
            }),
        }
    }

    fn list(&self) -> Result<Vec<ImportProgress>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::OperationFailed {
                    operation: "list_checkpoints".to_string(),
                    cause: format!("{}: {e}", self.dir.display()),
                });
            },
        };

        let mut checkpoints = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::read(&path) {
                Ok(progress) => checkpoints.push(progress),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
            }
        }
        checkpoints.sort_by(|a, b| b.last_update_time.cmp(&a.last_update_time));
        Ok(checkpoints)
    }
}
