//! Typed codec between [`MemoryRecord`] and `memory_records` rows.

use crate::models::{MemoryRecord, RecordId, RecordMetadata, Role};
use crate::{Error, Result};
use rusqlite::Row;

/// Columns selected by [`RecordRow::from_row`], in order.
pub const RECORD_COLUMNS: &str = "id, construct_id, source, role, conversation_id, message_id, \
     timestamp, batch_index, content_hash, content, embedding";

/// Raw row as stored.
#[derive(Debug)]
pub struct RecordRow {
    pub id: String,
    pub construct_id: String,
    pub source: String,
    pub role: String,
    pub conversation_id: String,
    pub message_id: Option<String>,
    pub timestamp: Option<String>,
    pub batch_index: i64,
    pub content_hash: String,
    pub content: String,
    pub embedding: Option<Vec<u8>>,
}

impl RecordRow {
    /// Reads a row selected with [`RECORD_COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            construct_id: row.get(1)?,
            source: row.get(2)?,
            role: row.get(3)?,
            conversation_id: row.get(4)?,
            message_id: row.get(5)?,
            timestamp: row.get(6)?,
            batch_index: row.get(7)?,
            content_hash: row.get(8)?,
            content: row.get(9)?,
            embedding: row.get(10)?,
        })
    }

    /// Converts the row into a record.
    pub fn into_record(self) -> Result<MemoryRecord> {
        let embedding = self.embedding.as_deref().map(decode_embedding).transpose()?;
        let batch_index = u64::try_from(self.batch_index).map_err(|_| Error::OperationFailed {
            operation: "decode_record".to_string(),
            cause: format!("negative batch index {} for {}", self.batch_index, self.id),
        })?;
        Ok(MemoryRecord {
            id: RecordId::new(self.id),
            content: self.content,
            embedding,
            metadata: RecordMetadata {
                role: Role::parse(&self.role),
                source: self.source,
                timestamp: self.timestamp,
                message_id: self.message_id,
                conversation_id: self.conversation_id,
                batch_index,
                construct_id: self.construct_id,
                content_hash: self.content_hash,
            },
        })
    }
}

/// Encodes a vector as little-endian `f32` bytes.
#[must_use]
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decodes little-endian `f32` bytes.
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::OperationFailed {
            operation: "decode_embedding".to_string(),
            cause: format!("blob length {} is not a multiple of 4", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
