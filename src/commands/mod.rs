//! Command handlers module.
//!
//! - `import.rs`: the import command and its progress output
//! - `checkpoints.rs`: checkpoint status, listing and clearing
//! - `detect.rs`: format detection

mod checkpoints;
mod detect;
mod import;

use mnemos::config::{EmbeddingProvider, MnemosConfig};
use mnemos::embedding::HashEmbedder;
use mnemos::storage::{FileCheckpointStore, SqliteMemoryStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Re-export command functions
pub use checkpoints::{cmd_clear_checkpoint, cmd_list_checkpoints, cmd_status};
pub use detect::cmd_detect;
pub use import::{ImportArgs, cmd_import};

/// Opens the record store under the data directory.
///
/// With the `none` embedding provider the store computes vectors itself.
fn open_store(config: &MnemosConfig) -> mnemos::Result<SqliteMemoryStore> {
    let store = SqliteMemoryStore::new(config.database_path())?;
    if config.embedding.provider == EmbeddingProvider::None {
        let embedder = HashEmbedder::with_dimensions(config.embedding.dimensions)?;
        return Ok(store.with_embedder(Arc::new(embedder)));
    }
    Ok(store)
}

fn checkpoint_store(config: &MnemosConfig) -> FileCheckpointStore {
    FileCheckpointStore::new(config.checkpoint_dir())
}

/// Resolves a file argument the way the importer keys its checkpoints.
fn resolve_file(file: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    file.canonicalize()
        .map_err(|e| format!("{}: {e}", file.display()).into())
}
