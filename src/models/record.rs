//! Memory records persisted to the store.

use super::{Message, Role};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic identifier of a [`MemoryRecord`].
///
/// Derived from `(construct_id, source_name, batch_offset, content_hash)`, so
/// re-committing the same message from the same batch position overwrites the
/// earlier row instead of creating a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Wraps an existing id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the id of a record.
    ///
    /// `batch_offset` is the stream offset of the first message of the batch
    /// the record is committed in.
    ///
    /// # Example
    ///
    /// ```rust
    /// use mnemos::RecordId;
    ///
    /// let a = RecordId::derive("c1", "chat.json", 0, "abc");
    /// let b = RecordId::derive("c1", "chat.json", 0, "abc");
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 64);
    /// ```
    #[must_use]
    pub fn derive(
        construct_id: &str,
        source_name: &str,
        batch_offset: u64,
        content_hash: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        // Length-prefix the free-form parts so ("ab","c") and ("a","bc") differ.
        for part in [construct_id, source_name] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hasher.update(batch_offset.to_le_bytes());
        hasher.update(content_hash.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata stored alongside each record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Speaker of the original turn.
    pub role: Role,
    /// Source name the record was imported from.
    pub source: String,
    /// Original timestamp rendered as text.
    pub timestamp: Option<String>,
    /// Source-local message id.
    pub message_id: Option<String>,
    /// Conversation the turn belongs to.
    pub conversation_id: String,
    /// Index of the batch that committed the record.
    pub batch_index: u64,
    /// Construct whose memory holds the record.
    pub construct_id: String,
    /// Content hash used for deduplication.
    pub content_hash: String,
}

/// Unit persisted to the memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Deterministic id.
    pub id: RecordId,
    /// Message text.
    pub content: String,
    /// Vector, or `None` when the store computes it.
    pub embedding: Option<Vec<f32>>,
    /// Record metadata.
    pub metadata: RecordMetadata,
}

/// Placement of a batch within an import run.
#[derive(Debug, Clone, Copy)]
pub struct BatchPosition<'a> {
    /// Construct receiving the records.
    pub construct_id: &'a str,
    /// Source name of the file.
    pub source_name: &'a str,
    /// Index of the batch.
    pub batch_index: u64,
    /// Stream offset of the first message in the batch.
    pub batch_offset: u64,
}

impl MemoryRecord {
    /// Builds the record for a message committed at `position`.
    #[must_use]
    pub fn from_message(
        message: &Message,
        content_hash: String,
        embedding: Option<Vec<f32>>,
        position: BatchPosition<'_>,
    ) -> Self {
        let id = RecordId::derive(
            position.construct_id,
            position.source_name,
            position.batch_offset,
            &content_hash,
        );
        Self {
            id,
            content: message.content.clone(),
            embedding,
            metadata: RecordMetadata {
                role: message.role,
                source: position.source_name.to_string(),
                timestamp: message.timestamp.as_ref().map(super::Timestamp::to_rfc3339),
                message_id: message.message_id.clone(),
                conversation_id: message.conversation_id.clone(),
                batch_index: position.batch_index,
                construct_id: position.construct_id.to_string(),
                content_hash,
            },
        }
    }
}
