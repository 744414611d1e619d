//! Storage backend traits.

mod checkpoint;
mod memory_store;

pub use checkpoint::CheckpointStore;
pub use memory_store::{MemoryStore, RecordFilter, RecordQuery};
