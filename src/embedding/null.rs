//! Embedder that defers vector computation to the store.

use super::Embedder;
use crate::Result;

/// Returns empty vectors, meaning "let the store embed".
///
/// Pair it with a store that embeds on commit, or with a store that keeps
/// records without vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmbedder;

impl NullEmbedder {
    /// Creates a null embedder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Embedder for NullEmbedder {
    fn dimensions(&self) -> usize {
        0
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }

    fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(Vec::new())
    }
}
