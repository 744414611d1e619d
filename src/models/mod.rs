//! Data models for mnemos.
//!
//! Messages flow out of the parsers, records flow into the store, and
//! [`ImportProgress`] is the durable checkpoint tying the two together.

mod message;
mod progress;
mod record;

pub use message::{Message, Role, Timestamp};
pub use progress::{ImportProgress, ImportResult, ImportResultStatus, ImportStatus};
pub use record::{BatchPosition, MemoryRecord, RecordId, RecordMetadata};
