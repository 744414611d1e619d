//! `SQLite` memory store.
//!
//! - [`connection`]: lock acquisition, pragmas, transactions
//! - [`sql`]: `WHERE` clause construction and `LIKE` escaping
//! - `record_row`: row codec for [`MemoryRecord`](crate::models::MemoryRecord)
//! - `metrics`: per-operation counters and latency

pub mod connection;
mod metrics;
mod record_row;
pub mod sql;
mod store;

pub use connection::{Synchronous, acquire_lock, configure_connection, with_transaction};
pub use store::SqliteMemoryStore;
