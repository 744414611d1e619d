//! Deterministic hash-based pseudo-embeddings.
//!
//! Vectors depend only on the words of the text, so identical inputs always
//! produce identical vectors across runs and builds. They carry no semantic
//! similarity and are meant for offline imports and tests.

use super::{Embedder, normalize_in_place};
use crate::{Error, Result};
use sha2::{Digest, Sha256};

/// Words considered per text.
const MAX_WORDS: usize = 1000;

/// Hash-based embedder.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Default embedding dimensions.
    pub const DEFAULT_DIMENSIONS: usize = 384;

    /// Creates an embedder with [`Self::DEFAULT_DIMENSIONS`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dimensions: Self::DEFAULT_DIMENSIONS,
        }
    }

    /// Creates an embedder with custom dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `dimensions` is zero.
    pub fn with_dimensions(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(Error::InvalidInput(
                "embedding dimensions must be positive".to_string(),
            ));
        }
        Ok(Self { dimensions })
    }

    fn word_hash(word: &str) -> u64 {
        let digest = Sha256::digest(word.as_bytes());
        let mut bytes = [0_u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn pseudo_embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimensions];
        for (position, word) in text.split_whitespace().take(MAX_WORDS).enumerate() {
            let hash = Self::word_hash(word);
            for j in 0..8 {
                let idx = ((hash >> (j * 8)) as usize + position) % self.dimensions;
                let value = ((hash >> (j * 4)) & 0xFF) as f32 / 255.0 - 0.5;
                embedding[idx] += value;
            }
        }
        normalize_in_place(&mut embedding);
        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("Cannot embed empty text".to_string()));
        }
        Ok(self.pseudo_embed(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = HashEmbedder::new();
        let a = embedder.embed("the same words").unwrap();
        let b = embedder.embed("the same words").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), HashEmbedder::DEFAULT_DIMENSIONS);
    }

    #[test]
    fn test_normalized() {
        let embedding = HashEmbedder::new().embed("normalize me please").unwrap();
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_distinct_texts_differ() {
        let embedder = HashEmbedder::new();
        let a = embedder.embed("sentinel alpha").unwrap();
        let b = embedder.embed("sentinel beta").unwrap();
        assert!(cosine_similarity(&a, &b) < 0.999);
    }

    #[test]
    fn test_empty_text_rejected() {
        assert!(HashEmbedder::new().embed("   ").is_err());
        assert!(HashEmbedder::with_dimensions(0).is_err());
    }

    #[test]
    fn test_custom_dimensions() {
        let embedder = HashEmbedder::with_dimensions(16).unwrap();
        assert_eq!(embedder.embed("short").unwrap().len(), 16);
        assert_eq!(embedder.dimensions(), 16);
    }
}
