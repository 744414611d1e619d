//! Embedding generation.
//!
//! The [`Embedder`] trait is the boundary to the embedding service. An
//! embedder may return an empty result to signal that the store computes
//! vectors itself. [`EmbeddingBatcher`] calls an embedder once per import
//! batch with order-preserving parallelism.

mod batcher;
mod hash;
mod http;
mod null;

pub use batcher::EmbeddingBatcher;
pub use hash::HashEmbedder;
pub use http::{HttpEmbedder, HttpEmbedderConfig};
pub use null::NullEmbedder;

use crate::Result;
use crate::config::{EmbeddingConfig, EmbeddingProvider};
use std::sync::Arc;

/// Trait for embedding generators.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions (0 when vectors are deferred).
    fn dimensions(&self) -> usize;

    /// Generates an embedding for a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts, in input order.
    ///
    /// An empty result means "let the store embed".
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Builds the embedder selected by configuration.
///
/// # Errors
///
/// Returns an error if the selected embedder cannot be constructed.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider {
        EmbeddingProvider::Hash => Arc::new(HashEmbedder::with_dimensions(config.dimensions)?),
        EmbeddingProvider::Http => Arc::new(HttpEmbedder::new(HttpEmbedderConfig {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            timeout_secs: config.timeout_secs,
            max_batch_size: config.max_request_size,
        })?),
        EmbeddingProvider::None => Arc::new(NullEmbedder::new()),
    };
    Ok(embedder)
}

/// Scales a vector to unit length in place; zero vectors are left alone.
pub(crate) fn normalize_in_place(embedding: &mut [f32]) {
    let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
    if norm_sq <= 0.0 {
        return;
    }
    let inv_norm = norm_sq.sqrt().recip();
    for v in embedding.iter_mut() {
        *v *= inv_norm;
    }
}

/// Computes cosine similarity between two embedding vectors.
///
/// Returns 0.0 for empty, mismatched, or zero-length vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[], &[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_normalize_leaves_zero_vector() {
        let mut zero = vec![0.0, 0.0];
        normalize_in_place(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);

        let mut v = vec![3.0, 4.0];
        normalize_in_place(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_create_embedder_per_provider() {
        let mut config = EmbeddingConfig::default();
        config.provider = EmbeddingProvider::None;
        assert_eq!(create_embedder(&config).unwrap().dimensions(), 0);

        config.provider = EmbeddingProvider::Hash;
        config.dimensions = 32;
        assert_eq!(create_embedder(&config).unwrap().dimensions(), 32);
    }
}
