//! End-to-end import scenarios over an in-memory store.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::too_many_lines,
    clippy::cast_possible_truncation
)]

use mnemos::embedding::{HashEmbedder, NullEmbedder};
use mnemos::models::{MemoryRecord, Role};
use mnemos::services::deduplication::ContentHasher;
use mnemos::storage::{InMemoryCheckpointStore, RecordFilter, RecordQuery, SqliteMemoryStore};
use mnemos::{
    CancellationFlag, CheckpointStore, Embedder, Error, ImportRequest, ImportResultStatus,
    ImportService, ImportStatus, MemoryStore, PipelineConfig, Result,
};
use serde_json::{Value, json};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::NamedTempFile;

const DIMENSIONS: usize = 32;

fn write_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn node(id: &str, parent: Option<&str>, role: &str, text: &str, time: f64) -> Value {
    json!({
        "id": id,
        "parent": parent,
        "message": {
            "id": id,
            "author": {"role": role},
            "content": {"content_type": "text", "parts": [text]},
            "create_time": time
        }
    })
}

fn conversation(id: &str, turns: &[(&str, &str)]) -> Value {
    let mut mapping = serde_json::Map::new();
    let mut parent: Option<String> = None;
    for (i, (role, text)) in turns.iter().enumerate() {
        let node_id = format!("{id}-{i}");
        mapping.insert(
            node_id.clone(),
            node(&node_id, parent.as_deref(), role, text, f64::from(i as u32) + 1.0),
        );
        parent = Some(node_id);
    }
    json!({"conversation_id": id, "title": id, "mapping": Value::Object(mapping)})
}

fn tree_export(conversations: &[Value]) -> NamedTempFile {
    write_file(&serde_json::to_string(conversations).unwrap())
}

struct Harness {
    store: Arc<SqliteMemoryStore>,
    checkpoints: Arc<InMemoryCheckpointStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(SqliteMemoryStore::in_memory().unwrap()),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
        }
    }

    fn service(&self, config: PipelineConfig) -> ImportService {
        self.service_over(Arc::clone(&self.store) as Arc<dyn MemoryStore>, config)
    }

    fn service_over(&self, store: Arc<dyn MemoryStore>, config: PipelineConfig) -> ImportService {
        ImportService::new(
            store,
            Arc::new(HashEmbedder::with_dimensions(DIMENSIONS).unwrap()),
            Arc::clone(&self.checkpoints) as Arc<dyn CheckpointStore>,
            config,
        )
        .unwrap()
    }

    fn count(&self, filter: &RecordFilter) -> u64 {
        self.store.count(filter).unwrap()
    }

    fn records(&self, construct: &str) -> Vec<MemoryRecord> {
        self.store
            .find(&RecordQuery::new(RecordFilter::new().with_construct(construct)).with_limit(1000))
            .unwrap()
    }
}

fn config(batch_size: usize) -> PipelineConfig {
    PipelineConfig::default().with_batch_size(batch_size)
}

#[test]
fn test_three_message_export_then_already_completed() {
    let harness = Harness::new();
    let service = harness.service(config(10));
    let file = tree_export(&[conversation(
        "conv-1",
        &[("user", "hi"), ("assistant", "hello"), ("user", "bye")],
    )]);

    let first = service
        .import_conversation(ImportRequest::new(file.path(), "construct-1"))
        .unwrap();
    assert_eq!(first.status, ImportResultStatus::Completed);
    assert_eq!(first.imported_messages, 3);
    assert_eq!(first.batches, 1);

    let second = service
        .import_conversation(ImportRequest::new(file.path(), "construct-1"))
        .unwrap();
    assert_eq!(second.status, ImportResultStatus::AlreadyCompleted);
    assert_eq!(second.imported_messages, 0);

    let mut records = harness.records("construct-1");
    records.sort_by_key(|r| r.metadata.timestamp.clone());
    let contents: Vec<_> = records.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(contents, ["hi", "hello", "bye"]);
    assert!(records.iter().all(|r| r.metadata.conversation_id == "conv-1"));
    assert!(records.iter().all(|r| r.embedding.as_ref().is_some_and(|e| e.len() == DIMENSIONS)));
}

#[test]
fn test_transcript_roles_and_conversation_identity() {
    let harness = Harness::new();
    let service = harness.service(config(10));
    let file = write_file("User: hi\nAssistant: hello\n");

    let result = service
        .import_conversation(ImportRequest::new(file.path(), "c").with_source_name("chat.txt"))
        .unwrap();
    assert_eq!(result.imported_messages, 2);

    let records = harness.records("c");
    let hi = records.iter().find(|r| r.content == "hi").unwrap();
    let hello = records.iter().find(|r| r.content == "hello").unwrap();
    assert_eq!(hi.metadata.role, Role::User);
    assert_eq!(hello.metadata.role, Role::Assistant);
    assert!(records.iter().all(|r| r.metadata.conversation_id == "chat.txt"));
    assert!(records.iter().all(|r| r.metadata.source == "chat.txt"));
}

#[test]
fn test_reimport_commits_nothing() {
    let harness = Harness::new();
    let service = harness.service(config(2));
    let file = write_file("User: a\nAssistant: b\nUser: c\nAssistant: d\nUser: e\n");
    let path = file.path().canonicalize().unwrap();

    let first = service
        .import_conversation(ImportRequest::new(&path, "c"))
        .unwrap();
    assert_eq!(first.imported_messages, 5);

    assert!(service.checkpoints().clear("c", &path).unwrap());
    let cleared = service
        .import_conversation(ImportRequest::new(&path, "c"))
        .unwrap();
    assert_eq!(cleared.status, ImportResultStatus::Completed);
    assert_eq!(cleared.imported_messages, 0);
    assert_eq!(cleared.skipped_duplicates, 5);

    let fresh = service
        .import_conversation(ImportRequest::new(&path, "c").with_resume(false))
        .unwrap();
    assert_eq!(fresh.imported_messages, 0);
    assert_eq!(fresh.skipped_duplicates, 5);

    assert_eq!(harness.count(&RecordFilter::new().with_construct("c")), 5);
}

#[test]
fn test_same_file_into_two_constructs() {
    let harness = Harness::new();
    let service = harness.service(config(10));
    let file = write_file("User: shared\n");

    for construct in ["left", "right"] {
        let result = service
            .import_conversation(ImportRequest::new(file.path(), construct))
            .unwrap();
        assert_eq!(result.imported_messages, 1);
    }
    assert_eq!(harness.count(&RecordFilter::new()), 2);
}

#[test]
fn test_pause_and_resume_matches_uninterrupted_run() {
    let transcript: String = (0..7).map(|i| format!("User: message {i}\n")).collect();

    let baseline = Harness::new();
    let file = write_file(&transcript);
    let uninterrupted = baseline
        .service(config(2))
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap();
    assert_eq!(uninterrupted.imported_messages, 7);

    let harness = Harness::new();
    let flag = CancellationFlag::new();
    let trigger = flag.clone();
    let paused = harness
        .service(config(2))
        .with_cancellation(flag)
        .with_progress_callback(move |progress| {
            if progress.processed_lines >= 4 {
                trigger.cancel();
            }
        })
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap();
    assert_eq!(paused.status, ImportResultStatus::Paused);
    assert_eq!(paused.imported_messages, 4);
    assert_eq!(paused.batches, 2);

    let path = file.path().canonicalize().unwrap();
    let checkpoint = harness.checkpoints.load("c", &path).unwrap().unwrap();
    assert_eq!(checkpoint.status, ImportStatus::Paused);
    assert_eq!(checkpoint.processed_lines, 4);

    let resumed = harness
        .service(config(2))
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap();
    assert_eq!(resumed.status, ImportResultStatus::Completed);
    assert_eq!(resumed.imported_messages, 3);
    assert_eq!(resumed.skipped_duplicates, 0);
    assert_eq!(harness.count(&RecordFilter::new()), baseline.count(&RecordFilter::new()));
}

#[test]
fn test_resume_skips_whitespace_variant_of_committed_message() {
    let harness = Harness::new();
    let file = write_file("User: hello\nworld\n\nUser: hello world\n");

    let flag = CancellationFlag::new();
    let trigger = flag.clone();
    let paused = harness
        .service(config(1))
        .with_cancellation(flag)
        .with_progress_callback(move |progress| {
            if progress.processed_lines >= 1 {
                trigger.cancel();
            }
        })
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap();
    assert_eq!(paused.status, ImportResultStatus::Paused);
    assert_eq!(paused.imported_messages, 1);

    let resumed = harness
        .service(config(1))
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap();
    assert_eq!(resumed.status, ImportResultStatus::Completed);
    assert_eq!(resumed.imported_messages, 0);
    assert_eq!(resumed.skipped_duplicates, 1);

    let hash = ContentHasher::hash("hello world");
    assert_eq!(
        harness.count(&RecordFilter::new().with_construct("c").with_content_hash(hash)),
        1
    );
}

#[test]
fn test_windows_1252_tree_export_imports() {
    let harness = Harness::new();
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[{\"id\":\"c\",\"messages\":[{\"role\":\"user\",\"content\":\"caf\xE9\"}]}]")
        .unwrap();

    let result = harness
        .service(config(10))
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap();
    assert_eq!(result.status, ImportResultStatus::Completed);
    assert_eq!(result.imported_messages, 1);
    assert_eq!(harness.records("c")[0].content, "caf\u{e9}");
}

/// Store whose commits fail once a budget runs out.
struct FlakyStore {
    inner: Arc<SqliteMemoryStore>,
    commits_left: AtomicUsize,
}

impl MemoryStore for FlakyStore {
    fn find(&self, query: &RecordQuery) -> Result<Vec<MemoryRecord>> {
        self.inner.find(query)
    }

    fn commit(&self, records: &[MemoryRecord]) -> Result<()> {
        let left = self.commits_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(Error::OperationFailed {
                operation: "commit".to_string(),
                cause: "store offline".to_string(),
            });
        }
        self.commits_left.store(left - 1, Ordering::SeqCst);
        self.inner.commit(records)
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    fn count(&self, filter: &RecordFilter) -> Result<u64> {
        self.inner.count(filter)
    }
}

#[test]
fn test_commit_failure_then_resume() {
    let harness = Harness::new();
    let flaky = Arc::new(FlakyStore {
        inner: Arc::clone(&harness.store),
        commits_left: AtomicUsize::new(1),
    });
    let file = write_file("User: a\nUser: b\nUser: c\nUser: d\nUser: e\nUser: f\n");

    let err = harness
        .service_over(flaky, config(2))
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap_err();
    let Error::ImportFailed { cause, result } = err else {
        panic!("expected ImportFailed, got {err:?}");
    };
    assert!(cause.contains("store offline"));
    assert_eq!(result.status, ImportResultStatus::Failed);
    assert_eq!(result.imported_messages, 2);
    assert_eq!(result.batches, 1);

    let path = file.path().canonicalize().unwrap();
    let checkpoint = harness.checkpoints.load("c", &path).unwrap().unwrap();
    assert_eq!(checkpoint.status, ImportStatus::Failed);
    assert_eq!(checkpoint.processed_lines, 2);
    assert!(checkpoint.error_message.unwrap().contains("store offline"));

    let resumed = harness
        .service(config(2))
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap();
    assert_eq!(resumed.status, ImportResultStatus::Completed);
    assert_eq!(resumed.imported_messages, 4);
    assert_eq!(harness.count(&RecordFilter::new()), 6);
}

#[test]
fn test_embeddings_stay_aligned_across_workers() {
    let harness = Harness::new();
    let service = harness.service(config(25).with_embed_workers(4));
    let transcript: String = (0..60).map(|i| format!("User: sentinel-{i:03}\n")).collect();
    let file = write_file(&transcript);

    let result = service
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap();
    assert_eq!(result.imported_messages, 60);
    assert_eq!(result.batches, 3);

    let reference = HashEmbedder::with_dimensions(DIMENSIONS).unwrap();
    let records = harness.records("c");
    assert_eq!(records.len(), 60);
    for record in records {
        assert_eq!(
            record.embedding.unwrap(),
            reference.embed(&record.content).unwrap(),
            "embedding mismatch for {}",
            record.content
        );
    }
}

#[test]
fn test_batches_never_span_conversations() {
    let harness = Harness::new();
    let service = harness.service(config(10));
    let file = tree_export(&[
        conversation("first", &[("user", "q1"), ("assistant", "a1"), ("user", "q2")]),
        conversation("second", &[("user", "q3"), ("assistant", "a3")]),
    ]);

    let result = service
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap();
    assert_eq!(result.imported_messages, 5);
    assert_eq!(result.batches, 2);

    let by_batch = |index| harness.count(&RecordFilter::new().with_construct("c").with_batch_index(index));
    assert_eq!(by_batch(0), 3);
    assert_eq!(by_batch(1), 2);
    for record in harness.records("c") {
        let expected = if record.metadata.batch_index == 0 { "first" } else { "second" };
        assert_eq!(record.metadata.conversation_id, expected);
    }
}

#[test]
fn test_shared_prefix_is_not_a_duplicate() {
    let harness = Harness::new();
    let service = harness.service(config(10));
    let prefix = "x".repeat(100);
    let file = write_file(&format!(
        "User: {prefix} ending one\n\nUser: {prefix} ending two\n\nUser: {prefix} ending one\n"
    ));

    let result = service
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap();
    assert_eq!(result.imported_messages, 2);
    assert_eq!(result.skipped_duplicates, 1);
}

#[test]
fn test_store_side_embedding() {
    let harness = Harness::new();
    let store = Arc::new(
        SqliteMemoryStore::in_memory()
            .unwrap()
            .with_embedder(Arc::new(HashEmbedder::with_dimensions(8).unwrap())),
    );
    let service = ImportService::new(
        Arc::clone(&store) as Arc<dyn MemoryStore>,
        Arc::new(NullEmbedder::new()),
        Arc::clone(&harness.checkpoints) as Arc<dyn CheckpointStore>,
        config(10),
    )
    .unwrap();
    let file = write_file("User: computed by the store\n");

    service
        .import_conversation(ImportRequest::new(file.path(), "c"))
        .unwrap();
    let records = store
        .find(&RecordQuery::new(RecordFilter::new().with_construct("c")))
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].embedding.as_ref().map(Vec::len), Some(8));
}

#[test]
fn test_missing_file_is_operation_failure() {
    let harness = Harness::new();
    let err = harness
        .service(config(10))
        .import_conversation(ImportRequest::new(Path::new("/nonexistent/chat.json"), "c"))
        .unwrap_err();
    assert!(matches!(err, Error::OperationFailed { .. }));
}

#[test]
fn test_invalid_pipeline_config_rejected() {
    let harness = Harness::new();
    let result = ImportService::new(
        Arc::clone(&harness.store) as Arc<dyn MemoryStore>,
        Arc::new(HashEmbedder::new()),
        Arc::clone(&harness.checkpoints) as Arc<dyn CheckpointStore>,
        config(0),
    );
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}
