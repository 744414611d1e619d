//! `SQLite`-backed memory store.

use super::connection::{Synchronous, acquire_lock, configure_connection, with_transaction};
use super::metrics::{record_operation_metrics, status_label};
use super::record_row::{RECORD_COLUMNS, RecordRow, encode_embedding};
use super::sql::{build_query_clause, build_where_clause};
use crate::embedding::Embedder;
use crate::models::MemoryRecord;
use crate::storage::traits::{MemoryStore, RecordFilter, RecordQuery};
use crate::{Error, Result};
use rusqlite::{Connection, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::instrument;

/// Memory store over a single `SQLite` file.
///
/// # Concurrency Model
///
/// One `Mutex<Connection>`; WAL mode lets other processes read while an
/// import writes. Every `commit` is one `BEGIN IMMEDIATE` transaction, so a
/// batch is either fully visible or not at all.
///
/// # Embeddings
///
/// Records arriving without an embedding are embedded here when the store
/// was built [`with_embedder`](Self::with_embedder); otherwise the
/// `embedding` column stays `NULL`.
pub struct SqliteMemoryStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl SqliteMemoryStore {
    /// Opens (or creates) a store at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(db_path, Synchronous::default())
    }

    /// Opens a store with an explicit `synchronous` level.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl Into<PathBuf>, synchronous: Synchronous) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_store_dir".to_string(),
                cause: format!("{}: {e}", parent.display()),
            })?;
        }
        let conn = Connection::open(&db_path).map_err(|e| Error::OperationFailed {
            operation: "open_sqlite".to_string(),
            cause: e.to_string(),
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
            embedder: None,
        };
        store.initialize(synchronous)?;
        Ok(store)
    }

    /// Creates an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_sqlite_in_memory".to_string(),
            cause: e.to_string(),
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
            embedder: None,
        };
        store.initialize(Synchronous::default())?;
        Ok(store)
    }

    /// Embeds records that arrive without a vector.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        if embedder.dimensions() > 0 {
            self.embedder = Some(embedder);
        }
        self
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self, synchronous: Synchronous) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        configure_connection(&conn, synchronous)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_records (
                id TEXT PRIMARY KEY,
                construct_id TEXT NOT NULL,
                source TEXT NOT NULL,
                role TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                message_id TEXT,
                timestamp TEXT,
                batch_index INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB
            );
            CREATE INDEX IF NOT EXISTS idx_records_construct_source
                ON memory_records(construct_id, source);
            CREATE INDEX IF NOT EXISTS idx_records_batch
                ON memory_records(construct_id, source, batch_index);
            CREATE INDEX IF NOT EXISTS idx_records_hash
                ON memory_records(construct_id, content_hash);",
        )
        .map_err(|e| Error::OperationFailed {
            operation: "create_memory_records_table".to_string(),
            cause: e.to_string(),
        })
    }

    /// Fills in missing embeddings, returning one blob slot per record.
    fn embedding_blobs(&self, records: &[MemoryRecord]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut blobs: Vec<Option<Vec<u8>>> = records
            .iter()
            .map(|r| r.embedding.as_deref().map(encode_embedding))
            .collect();

        let Some(embedder) = &self.embedder else {
            return Ok(blobs);
        };
        let missing: Vec<usize> = (0..records.len()).filter(|&i| blobs[i].is_none()).collect();
        if missing.is_empty() {
            return Ok(blobs);
        }

        let texts: Vec<&str> = missing.iter().map(|&i| records[i].content.as_str()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != texts.len() {
            return Err(Error::OperationFailed {
                operation: "store_embed".to_string(),
                cause: format!(
                    "embedder returned {} vectors for {} records",
                    vectors.len(),
                    texts.len()
                ),
            });
        }
        for (i, vector) in missing.into_iter().zip(vectors) {
            blobs[i] = Some(encode_embedding(&vector));
        }
        Ok(blobs)
    }
}

impl MemoryStore for SqliteMemoryStore {
    #[instrument(skip(self, query), fields(operation = "find", backend = "sqlite"))]
    fn find(&self, query: &RecordQuery) -> Result<Vec<MemoryRecord>> {
        let start = Instant::now();
        let result = (|| {
            let (clause, mut values) = build_query_clause(query);
            #[allow(clippy::cast_possible_wrap)]
            values.push(rusqlite::types::Value::Integer(query.limit as i64));
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM memory_records{clause} ORDER BY batch_index, id LIMIT ?{}",
                values.len()
            );

            let conn = acquire_lock(&self.conn);
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
                operation: "prepare_find".to_string(),
                cause: e.to_string(),
            })?;
            let rows = stmt
                .query_map(params_from_iter(values), RecordRow::from_row)
                .map_err(|e| Error::OperationFailed {
                    operation: "find_records".to_string(),
                    cause: e.to_string(),
                })?;

            let mut records = Vec::new();
            for row in rows {
                let row = row.map_err(|e| Error::OperationFailed {
                    operation: "read_record_row".to_string(),
                    cause: e.to_string(),
                })?;
                records.push(row.into_record()?);
            }
            Ok(records)
        })();

        record_operation_metrics("find", start, status_label(&result));
        result
    }

    #[instrument(skip(self, records), fields(operation = "commit", backend = "sqlite", records = records.len()))]
    fn commit(&self, records: &[MemoryRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let result = (|| {
            let blobs = self.embedding_blobs(records)?;
            let conn = acquire_lock(&self.conn);
            with_transaction(&conn, |conn| {
                let mut stmt = conn
                    .prepare_cached(
                        "INSERT OR REPLACE INTO memory_records (id, construct_id, source, role, \
                         conversation_id, message_id, timestamp, batch_index, content_hash, content, embedding)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    )
                    .map_err(|e| Error::OperationFailed {
                        operation: "prepare_commit".to_string(),
                        cause: e.to_string(),
                    })?;

                for (record, blob) in records.iter().zip(&blobs) {
                    let meta = &record.metadata;
                    #[allow(clippy::cast_possible_wrap)]
                    let batch_index = meta.batch_index as i64;
                    stmt.execute(params![
                        record.id.as_str(),
                        meta.construct_id,
                        meta.source,
                        meta.role.as_str(),
                        meta.conversation_id,
                        meta.message_id,
                        meta.timestamp,
                        batch_index,
                        meta.content_hash,
                        record.content,
                        blob,
                    ])
                    .map_err(|e| Error::OperationFailed {
                        operation: "insert_record".to_string(),
                        cause: e.to_string(),
                    })?;
                }
                Ok(())
            })
        })();

        record_operation_metrics("commit", start, status_label(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "flush", backend = "sqlite"))]
    fn flush(&self) -> Result<()> {
        let start = Instant::now();
        let result = {
            let conn = acquire_lock(&self.conn);
            // Returns (busy, log frames, checkpointed frames).
            conn.query_row("PRAGMA wal_checkpoint(FULL)", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(|e| Error::OperationFailed {
                    operation: "wal_checkpoint".to_string(),
                    cause: e.to_string(),
                })
        };

        record_operation_metrics("flush", start, status_label(&result));
        result
    }

    #[instrument(skip(self, filter), fields(operation = "count", backend = "sqlite"))]
    fn count(&self, filter: &RecordFilter) -> Result<u64> {
        let start = Instant::now();
        let result = (|| {
            let (clause, values) = build_where_clause(filter, None);
            let sql = format!("SELECT COUNT(*) FROM memory_records{clause}");
            let conn = acquire_lock(&self.conn);
            let count: i64 = conn
                .query_row(&sql, params_from_iter(values), |row| row.get(0))
                .map_err(|e| Error::OperationFailed {
                    operation: "count_records".to_string(),
                    cause: e.to_string(),
                })?;
            Ok(u64::try_from(count).unwrap_or(0))
        })();

        record_operation_metrics("count", start, status_label(&result));
        result
    }
}
