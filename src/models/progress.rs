//! Import checkpoints and run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Lifecycle state of an import checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// A run is committing batches (or crashed while doing so).
    #[default]
    InProgress,
    /// All batches committed and the final verification ran.
    Completed,
    /// A run stopped on a fatal error.
    Failed,
    /// A run was cancelled between batches.
    Paused,
}

impl ImportStatus {
    /// Returns the status as a snake-case string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable progress of importing one file into one construct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProgress {
    /// Construct being populated.
    pub construct_id: String,
    /// File being imported.
    pub file_path: PathBuf,
    /// Source name recorded on every record.
    pub source_name: String,
    /// Messages in the file, counted once on the first attempt.
    pub total_lines: u64,
    /// Messages consumed so far, committed or skipped.
    pub processed_lines: u64,
    /// Batches fully handled so far.
    pub batches_completed: u64,
    /// Records committed across all runs.
    #[serde(default)]
    pub messages_committed: u64,
    /// Duplicates skipped across all runs.
    #[serde(default)]
    pub duplicates_skipped: u64,
    /// Content hash of the last message of the last handled batch.
    pub last_batch_content_hash: Option<String>,
    /// When the first attempt started.
    pub start_time: DateTime<Utc>,
    /// When the checkpoint was last written.
    pub last_update_time: DateTime<Utc>,
    /// Lifecycle state.
    pub status: ImportStatus,
    /// Cause of the last failure.
    pub error_message: Option<String>,
    /// Identifier of the latest run (diagnostics only).
    #[serde(default)]
    pub run_id: Option<String>,
}

impl ImportProgress {
    /// Creates a fresh in-progress checkpoint.
    #[must_use]
    pub fn new(
        construct_id: impl Into<String>,
        file_path: impl AsRef<Path>,
        source_name: impl Into<String>,
        total_lines: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            construct_id: construct_id.into(),
            file_path: file_path.as_ref().to_path_buf(),
            source_name: source_name.into(),
            total_lines,
            processed_lines: 0,
            batches_completed: 0,
            messages_committed: 0,
            duplicates_skipped: 0,
            last_batch_content_hash: None,
            start_time: now,
            last_update_time: now,
            status: ImportStatus::InProgress,
            error_message: None,
            run_id: None,
        }
    }

    /// Records one handled batch.
    ///
    /// `processed_lines` only ever moves forward.
    pub fn record_batch(
        &mut self,
        processed_through: u64,
        committed: u64,
        duplicates: u64,
        last_content_hash: Option<String>,
    ) {
        self.processed_lines = self.processed_lines.max(processed_through);
        self.batches_completed += 1;
        self.messages_committed += committed;
        self.duplicates_skipped += duplicates;
        if last_content_hash.is_some() {
            self.last_batch_content_hash = last_content_hash;
        }
        self.touch();
    }

    /// Moves the checkpoint back into `in_progress` for a new run.
    pub fn resume(&mut self, run_id: impl Into<String>) {
        self.status = ImportStatus::InProgress;
        self.error_message = None;
        self.run_id = Some(run_id.into());
        self.touch();
    }

    /// Marks the import completed.
    pub fn mark_completed(&mut self) {
        self.status = ImportStatus::Completed;
        self.error_message = None;
        self.touch();
    }

    /// Marks the import failed with a cause.
    pub fn mark_failed(&mut self, cause: impl Into<String>) {
        self.status = ImportStatus::Failed;
        self.error_message = Some(cause.into());
        self.touch();
    }

    /// Marks the import paused.
    pub fn mark_paused(&mut self) {
        self.status = ImportStatus::Paused;
        self.touch();
    }

    /// Fraction of the file processed, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction_done(&self) -> f64 {
        if self.total_lines == 0 {
            return 1.0;
        }
        (self.processed_lines as f64 / self.total_lines as f64).min(1.0)
    }

    fn touch(&mut self) {
        self.last_update_time = Utc::now();
    }
}

/// Outcome reported by an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportResultStatus {
    /// Every batch committed and the final verification ran.
    #[default]
    Completed,
    /// The checkpoint was already completed; nothing was done.
    AlreadyCompleted,
    /// The run was cancelled between batches.
    Paused,
    /// The run stopped on a fatal error.
    Failed,
}

impl ImportResultStatus {
    /// Returns the status as a snake-case string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::AlreadyCompleted => "already_completed",
            Self::Paused => "paused",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ImportResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary of one import run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    /// How the run ended.
    pub status: ImportResultStatus,
    /// Messages in the file.
    pub total_messages: u64,
    /// Records committed by this run.
    pub imported_messages: u64,
    /// Duplicates skipped by this run.
    pub skipped_duplicates: u64,
    /// Batches handled by this run.
    pub batches: u64,
    /// Wall-clock duration of this run.
    pub elapsed_seconds: f64,
    /// Messages consumed per second by this run.
    pub rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_progress_is_in_progress() {
        let progress = ImportProgress::new("c1", "/tmp/a.json", "a.json", 10);
        assert_eq!(progress.status, ImportStatus::InProgress);
        assert_eq!(progress.processed_lines, 0);
        assert!(progress.error_message.is_none());
    }

    #[test]
    fn test_record_batch_is_monotonic() {
        let mut progress = ImportProgress::new("c1", "a", "a", 10);
        progress.record_batch(5, 4, 1, Some("h1".to_string()));
        progress.record_batch(3, 0, 0, None);

        assert_eq!(progress.processed_lines, 5);
        assert_eq!(progress.batches_completed, 2);
        assert_eq!(progress.messages_committed, 4);
        assert_eq!(progress.duplicates_skipped, 1);
        assert_eq!(progress.last_batch_content_hash.as_deref(), Some("h1"));
    }

    #[test]
    fn test_failure_then_resume_clears_error() {
        let mut progress = ImportProgress::new("c1", "a", "a", 10);
        progress.mark_failed("boom");
        assert_eq!(progress.status, ImportStatus::Failed);
        assert_eq!(progress.error_message.as_deref(), Some("boom"));

        progress.resume("run-2");
        assert_eq!(progress.status, ImportStatus::InProgress);
        assert!(progress.error_message.is_none());
        assert_eq!(progress.run_id.as_deref(), Some("run-2"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ImportStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let json = serde_json::to_string(&ImportResultStatus::AlreadyCompleted).unwrap();
        assert_eq!(json, "\"already_completed\"");
    }

    #[test]
    fn test_fraction_done() {
        let mut progress = ImportProgress::new("c1", "a", "a", 4);
        progress.record_batch(1, 1, 0, None);
        assert!((progress.fraction_done() - 0.25).abs() < f64::EPSILON);

        let empty = ImportProgress::new("c1", "a", "a", 0);
        assert!((empty.fraction_done() - 1.0).abs() < f64::EPSILON);
    }
}
