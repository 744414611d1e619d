//! Import orchestration.
//!
//! Drives one file through parse → chunk → dedup → embed → commit → verify
//! → checkpoint, one batch at a time.

use super::checkpoint::{CheckpointManager, ResumeDecision};
use super::chunker::{Batch, chunk};
use super::deduplication::{ContentHasher, DedupOutcome, Deduplicator};
use super::verifier::Verifier;
use crate::config::PipelineConfig;
use crate::embedding::{Embedder, EmbeddingBatcher};
use crate::io::{Messages, ParseOptions, SourceFormat, count_messages, open_message_source};
use crate::models::{
    BatchPosition, ImportProgress, ImportResult, ImportResultStatus, MemoryRecord,
};
use crate::storage::{CheckpointStore, MemoryStore};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::instrument;

/// Shared flag that asks a running import to pause between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the flag was raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Lowers the flag.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One file to import into one construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    /// File to import.
    pub file_path: PathBuf,
    /// Construct whose memory is populated.
    pub construct_id: String,
    /// Source recorded on every record; defaults to the file name.
    pub source_name: Option<String>,
    /// Continue from an existing checkpoint.
    pub resume: bool,
    /// Count each committed batch in the store.
    pub verify_after_batch: bool,
    /// Skip format detection.
    pub format: Option<SourceFormat>,
}

impl ImportRequest {
    /// Creates a request that resumes and verifies.
    #[must_use]
    pub fn new(file_path: impl Into<PathBuf>, construct_id: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            construct_id: construct_id.into(),
            source_name: None,
            resume: true,
            verify_after_batch: true,
            format: None,
        }
    }

    /// Sets the source name.
    #[must_use]
    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }

    /// Enables or disables resuming.
    #[must_use]
    pub const fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Enables or disables per-batch verification.
    #[must_use]
    pub const fn with_verify_after_batch(mut self, verify: bool) -> Self {
        self.verify_after_batch = verify;
        self
    }

    /// Forces a source format.
    #[must_use]
    pub const fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = Some(format);
        self
    }
}

type ProgressCallback = Box<dyn Fn(&ImportProgress) + Send + Sync>;

/// Counters for the current run only.
struct RunStats {
    start: Instant,
    imported: u64,
    duplicates: u64,
    batches: u64,
    consumed: u64,
}

impl RunStats {
    fn new(start: Instant) -> Self {
        Self {
            start,
            imported: 0,
            duplicates: 0,
            batches: 0,
            consumed: 0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn result(&self, status: ImportResultStatus, total_messages: u64) -> ImportResult {
        let elapsed_seconds = self.start.elapsed().as_secs_f64();
        let rate = if elapsed_seconds > 0.0 {
            self.consumed as f64 / elapsed_seconds
        } else {
            0.0
        };
        ImportResult {
            status,
            total_messages,
            imported_messages: self.imported,
            skipped_duplicates: self.duplicates,
            batches: self.batches,
            elapsed_seconds,
            rate,
        }
    }
}

/// How the batch loop ended without an error.
enum RunEnd {
    Exhausted,
    Cancelled,
}

/// Per-run collaborators scoped to one construct and source.
struct RunContext<'a> {
    construct_id: &'a str,
    source_name: &'a str,
    verify_after_batch: bool,
    dedup: Deduplicator,
    verifier: Verifier,
    batcher: EmbeddingBatcher,
}

/// Imports conversation files into a memory store.
///
/// Collaborators are injected at construction; the service holds no global
/// state and can run imports for different constructs one after another.
///
/// # Example
///
/// ```rust,no_run
/// use mnemos::embedding::HashEmbedder;
/// use mnemos::storage::{FileCheckpointStore, SqliteMemoryStore};
/// use mnemos::{ImportRequest, ImportService, PipelineConfig};
/// use std::sync::Arc;
///
/// let service = ImportService::new(
///     Arc::new(SqliteMemoryStore::new("memory.db")?),
///     Arc::new(HashEmbedder::new()),
///     Arc::new(FileCheckpointStore::new("checkpoints")),
///     PipelineConfig::default(),
/// )?;
/// let result = service.import_conversation(ImportRequest::new("chat.json", "assistant-1"))?;
/// println!("{} imported", result.imported_messages);
/// # Ok::<(), mnemos::Error>(())
/// ```
pub struct ImportService {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn Embedder>,
    checkpoints: CheckpointManager,
    config: PipelineConfig,
    cancel: CancellationFlag,
    on_progress: Option<ProgressCallback>,
}

impl ImportService {
    /// Creates an import service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `config` is invalid.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn Embedder>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            embedder,
            checkpoints: CheckpointManager::new(checkpoints),
            config,
            cancel: CancellationFlag::new(),
            on_progress: None,
        })
    }

    /// Uses `flag` to pause imports between batches.
    #[must_use]
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Calls `callback` after every saved checkpoint.
    #[must_use]
    pub fn with_progress_callback(
        mut self,
        callback: impl Fn(&ImportProgress) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// The cancellation flag checked between batches.
    #[must_use]
    pub const fn cancellation_flag(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// The pipeline configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Checkpoint operations for the service's checkpoint store.
    #[must_use]
    pub const fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Imports one file into one construct.
    ///
    /// Returns `already_completed` for a completed checkpoint and `paused`
    /// when the cancellation flag was raised between batches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty construct id,
    /// [`Error::OperationFailed`] if the file cannot be resolved, and
    /// [`Error::ImportFailed`] carrying the partial result for any failure
    /// once the run has started.
    #[instrument(
        skip(self, request),
        fields(construct_id = %request.construct_id, path = %request.file_path.display())
    )]
    pub fn import_conversation(&self, request: ImportRequest) -> Result<ImportResult> {
        let mut stats = RunStats::new(Instant::now());
        if request.construct_id.trim().is_empty() {
            return Err(Error::InvalidInput("construct id cannot be empty".to_string()));
        }
        let file_path = request
            .file_path
            .canonicalize()
            .map_err(|e| Error::OperationFailed {
                operation: "resolve_source_file".to_string(),
                cause: format!("{}: {e}", request.file_path.display()),
            })?;
        let source_name = request
            .source_name
            .clone()
            .unwrap_or_else(|| default_source_name(&file_path));
        let options = ParseOptions {
            format: request.format,
            reverse_detection: self.config.reverse_detection,
        };
        let run_id = uuid::Uuid::now_v7().to_string();

        let decision = self.checkpoints.begin(
            &request.construct_id,
            &file_path,
            &source_name,
            request.resume,
            &run_id,
            || count_messages(open_message_source(&file_path, &source_name, options)?),
        );
        let mut progress = match decision {
            Ok(ResumeDecision::AlreadyCompleted(progress)) => {
                metrics::counter!("imports_total", "status" => "already_completed").increment(1);
                return Ok(stats.result(ImportResultStatus::AlreadyCompleted, progress.total_lines));
            },
            Ok(ResumeDecision::Resume(progress) | ResumeDecision::Fresh(progress)) => progress,
            Err(e) => {
                return Err(self.fail_before_start(&request.construct_id, &file_path, &source_name, e, &stats));
            },
        };

        tracing::info!(
            run_id = %run_id,
            source = %source_name,
            total = progress.total_lines,
            skip = progress.processed_lines,
            "Starting import"
        );
        self.notify(&progress);

        let outcome = self.run_batches(&request, &file_path, &source_name, options, &mut progress, &mut stats);
        match outcome {
            Ok(RunEnd::Cancelled) => {
                progress.mark_paused();
                if let Err(e) = self.checkpoints.save(&progress) {
                    return Err(self.fail(&mut progress, &stats, e));
                }
                self.notify(&progress);
                tracing::info!(processed = progress.processed_lines, "Import paused");
                metrics::counter!("imports_total", "status" => "paused").increment(1);
                Ok(stats.result(ImportResultStatus::Paused, progress.total_lines))
            },
            Ok(RunEnd::Exhausted) => {
                Verifier::new(
                    Arc::clone(&self.store),
                    request.construct_id.as_str(),
                    source_name.as_str(),
                    self.config.verify_min_ratio,
                )
                .verify_final(progress.messages_committed);

                progress.mark_completed();
                if let Err(e) = self.checkpoints.save(&progress) {
                    return Err(self.fail(&mut progress, &stats, e));
                }
                self.notify(&progress);

                let result = stats.result(ImportResultStatus::Completed, progress.total_lines);
                tracing::info!(
                    imported = result.imported_messages,
                    duplicates = result.skipped_duplicates,
                    batches = result.batches,
                    elapsed_seconds = result.elapsed_seconds,
                    "Import completed"
                );
                metrics::counter!("imports_total", "status" => "completed").increment(1);
                Ok(result)
            },
            Err(e) => Err(self.fail(&mut progress, &stats, e)),
        }
    }

    fn run_batches(
        &self,
        request: &ImportRequest,
        file_path: &Path,
        source_name: &str,
        options: ParseOptions,
        progress: &mut ImportProgress,
        stats: &mut RunStats,
    ) -> Result<RunEnd> {
        let mut ctx = RunContext {
            construct_id: &request.construct_id,
            source_name,
            verify_after_batch: request.verify_after_batch,
            dedup: Deduplicator::new(
                Arc::clone(&self.store),
                request.construct_id.as_str(),
                source_name,
                self.config.dedup_prefix_len,
                self.config.dedup_cache_capacity,
            )?,
            verifier: Verifier::new(
                Arc::clone(&self.store),
                request.construct_id.as_str(),
                source_name,
                self.config.verify_min_ratio,
            ),
            batcher: EmbeddingBatcher::new(Arc::clone(&self.embedder), self.config.embed_workers)?,
        };

        let mut messages = Messages::new(open_message_source(file_path, source_name, options)?);
        let mut skipped = 0;
        while skipped < progress.processed_lines {
            match messages.next() {
                Some(Ok(_)) => skipped += 1,
                Some(Err(e)) => return Err(e),
                None => {
                    tracing::warn!(
                        expected = progress.processed_lines,
                        found = skipped,
                        "File holds fewer messages than the checkpoint recorded"
                    );
                    break;
                },
            }
        }

        let mut batches = chunk(messages, self.config.batch_size, progress.batches_completed)?;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            let Some(batch) = batches.next() else {
                return Ok(RunEnd::Exhausted);
            };
            self.process_batch(&mut ctx, &batch?, progress, stats)?;
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn process_batch(
        &self,
        ctx: &mut RunContext<'_>,
        batch: &Batch,
        progress: &mut ImportProgress,
        stats: &mut RunStats,
    ) -> Result<()> {
        let start = Instant::now();
        let position = BatchPosition {
            construct_id: ctx.construct_id,
            source_name: ctx.source_name,
            batch_index: batch.index,
            batch_offset: batch.start_offset,
        };

        let mut records: Vec<MemoryRecord> = Vec::with_capacity(batch.len());
        let mut duplicates = 0_u64;
        let mut last_hash = None;
        for message in &batch.messages {
            let hash = ContentHasher::hash(&message.content);
            match ctx.dedup.check(&message.content, &hash) {
                DedupOutcome::Fresh => {
                    let record = MemoryRecord::from_message(message, hash.clone(), None, position);
                    ctx.dedup.remember(hash.clone(), record.id.clone());
                    records.push(record);
                },
                DedupOutcome::Duplicate { matched_id, reason } => {
                    tracing::debug!(offset = message.offset, matched_id = %matched_id, reason = %reason, "Skipping duplicate");
                    duplicates += 1;
                },
            }
            last_hash = Some(hash);
        }

        if !records.is_empty() {
            let vectors = {
                let texts: Vec<&str> = records.iter().map(|r| r.content.as_str()).collect();
                ctx.batcher.embed(&texts)?
            };
            for (record, vector) in records.iter_mut().zip(vectors) {
                record.embedding = Some(vector);
            }
            self.store.commit(&records)?;
            self.store.flush()?;
            if ctx.verify_after_batch {
                ctx.verifier.verify_batch(batch.index);
            }
        }

        let committed = records.len() as u64;
        progress.record_batch(batch.end_offset(), committed, duplicates, last_hash);
        self.checkpoints.save(progress)?;

        stats.imported += committed;
        stats.duplicates += duplicates;
        stats.batches += 1;
        stats.consumed += batch.len() as u64;

        metrics::counter!("ingest_messages_parsed_total").increment(batch.len() as u64);
        metrics::counter!("ingest_messages_committed_total").increment(committed);
        metrics::histogram!("ingest_batch_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::debug!(
            batch_index = batch.index,
            conversation_id = %batch.conversation_id(),
            messages = batch.len(),
            committed,
            duplicates,
            processed = progress.processed_lines,
            "Batch committed"
        );
        self.notify(progress);
        Ok(())
    }

    /// Marks the checkpoint failed and wraps the cause with the partial result.
    fn fail(&self, progress: &mut ImportProgress, stats: &RunStats, cause: Error) -> Error {
        let message = cause.to_string();
        progress.mark_failed(message.as_str());
        if let Err(e) = self.checkpoints.save(progress) {
            tracing::warn!(error = %e, "Could not persist failed checkpoint");
        }
        self.notify(progress);
        tracing::error!(error = %message, processed = progress.processed_lines, "Import failed");
        metrics::counter!("imports_total", "status" => "failed").increment(1);
        Error::ImportFailed {
            cause: message,
            result: Box::new(stats.result(ImportResultStatus::Failed, progress.total_lines)),
        }
    }

    /// Handles a failure before any checkpoint was opened for this run.
    ///
    /// A failed checkpoint is persisted only when none exists yet.
    fn fail_before_start(
        &self,
        construct_id: &str,
        file_path: &Path,
        source_name: &str,
        cause: Error,
        stats: &RunStats,
    ) -> Error {
        match self.checkpoints.load(construct_id, file_path) {
            Ok(None) => {
                let mut progress = ImportProgress::new(construct_id, file_path, source_name, 0);
                self.fail(&mut progress, stats, cause)
            },
            _ => {
                let message = cause.to_string();
                tracing::error!(error = %message, "Import could not start");
                metrics::counter!("imports_total", "status" => "failed").increment(1);
                Error::ImportFailed {
                    cause: message,
                    result: Box::new(stats.result(ImportResultStatus::Failed, 0)),
                }
            },
        }
    }

    fn notify(&self, progress: &ImportProgress) {
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }
}

fn default_source_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::ImportStatus;
    use crate::storage::{InMemoryCheckpointStore, RecordFilter, SqliteMemoryStore};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TREE: &str = r#"[{"id":"conv-1","mapping":{
        "a":{"message":{"id":"a","author":{"role":"user"},"content":{"parts":["hi"]},"create_time":1}},
        "b":{"parent":"a","message":{"id":"b","author":{"role":"assistant"},"content":{"parts":["hello"]},"create_time":2}},
        "c":{"parent":"b","message":{"id":"c","author":{"role":"user"},"content":{"parts":["bye"]},"create_time":3}}
    }}]"#;

    fn file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn service(store: Arc<SqliteMemoryStore>, batch_size: usize) -> ImportService {
        ImportService::new(
            store,
            Arc::new(HashEmbedder::with_dimensions(16).unwrap()),
            Arc::new(InMemoryCheckpointStore::new()),
            PipelineConfig::default().with_batch_size(batch_size),
        )
        .unwrap()
    }

    #[test]
    fn test_tree_export_then_already_completed() {
        let store = Arc::new(SqliteMemoryStore::in_memory().unwrap());
        let service = service(Arc::clone(&store), 10);
        let input = file(TREE);

        let result = service
            .import_conversation(ImportRequest::new(input.path(), "c1"))
            .unwrap();
        assert_eq!(result.status, ImportResultStatus::Completed);
        assert_eq!(result.imported_messages, 3);
        assert_eq!(result.batches, 1);
        assert_eq!(result.total_messages, 3);

        let again = service
            .import_conversation(ImportRequest::new(input.path(), "c1"))
            .unwrap();
        assert_eq!(again.status, ImportResultStatus::AlreadyCompleted);
        assert_eq!(again.imported_messages, 0);
        assert_eq!(store.count(&RecordFilter::new()).unwrap(), 3);
    }

    #[test]
    fn test_duplicates_inside_one_batch() {
        let store = Arc::new(SqliteMemoryStore::in_memory().unwrap());
        let service = service(Arc::clone(&store), 10);
        let input = file("User: same\n\nUser: same\n\nUser: other\n");

        let result = service
            .import_conversation(ImportRequest::new(input.path(), "c1"))
            .unwrap();
        assert_eq!(result.imported_messages, 2);
        assert_eq!(result.skipped_duplicates, 1);
    }

    #[test]
    fn test_cancelled_before_first_batch_pauses() {
        let store = Arc::new(SqliteMemoryStore::in_memory().unwrap());
        let flag = CancellationFlag::new();
        let service = service(Arc::clone(&store), 1).with_cancellation(flag.clone());
        let input = file("User: a\nAssistant: b\n");

        flag.cancel();
        let paused = service
            .import_conversation(ImportRequest::new(input.path(), "c1"))
            .unwrap();
        assert_eq!(paused.status, ImportResultStatus::Paused);
        assert_eq!(paused.imported_messages, 0);

        flag.reset();
        let resumed = service
            .import_conversation(ImportRequest::new(input.path(), "c1"))
            .unwrap();
        assert_eq!(resumed.status, ImportResultStatus::Completed);
        assert_eq!(resumed.imported_messages, 2);
        assert_eq!(resumed.batches, 2);
    }

    #[test]
    fn test_malformed_export_fails_with_checkpoint() {
        let store = Arc::new(SqliteMemoryStore::in_memory().unwrap());
        let service = service(store, 10);
        let input = file("[{\"mapping\": ");

        let err = service
            .import_conversation(ImportRequest::new(input.path(), "c1"))
            .unwrap_err();
        let Error::ImportFailed { result, .. } = err else {
            panic!("expected ImportFailed, got {err:?}");
        };
        assert_eq!(result.status, ImportResultStatus::Failed);

        let path = input.path().canonicalize().unwrap();
        let checkpoint = service.checkpoints().load("c1", &path).unwrap().unwrap();
        assert_eq!(checkpoint.status, ImportStatus::Failed);
        assert!(checkpoint.error_message.is_some());
    }

    #[test]
    fn test_empty_construct_rejected() {
        let store = Arc::new(SqliteMemoryStore::in_memory().unwrap());
        let service = service(store, 10);
        let input = file("User: hi\n");
        assert!(matches!(
            service.import_conversation(ImportRequest::new(input.path(), "  ")),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_progress_callback_sees_every_checkpoint() {
        let store = Arc::new(SqliteMemoryStore::in_memory().unwrap());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let service = service(store, 1).with_progress_callback(move |p| {
            sink.lock().unwrap().push((p.processed_lines, p.status));
        });
        let input = file("User: a\nAssistant: b\n");

        service
            .import_conversation(ImportRequest::new(input.path(), "c1"))
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&(0, ImportStatus::InProgress)));
        assert_eq!(seen.last(), Some(&(2, ImportStatus::Completed)));
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_default_source_name() {
        assert_eq!(default_source_name(Path::new("/a/b/chat.json")), "chat.json");
    }
}
