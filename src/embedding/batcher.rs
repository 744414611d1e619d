//! Ordered, parallel batch embedding.

use super::Embedder;
use crate::{Error, Result};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Embeds one batch of texts per call, fanning contiguous slices out to at
/// most `workers` scoped threads.
///
/// Output order always matches input order. An empty output means every
/// slice deferred to the store; a mix of empty and non-empty slices is an
/// error.
#[derive(Clone)]
pub struct EmbeddingBatcher {
    embedder: Arc<dyn Embedder>,
    workers: usize,
}

impl EmbeddingBatcher {
    /// Creates a batcher.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `workers` is zero.
    pub fn new(embedder: Arc<dyn Embedder>, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::InvalidInput(
                "embedding workers must be positive".to_string(),
            ));
        }
        Ok(Self { embedder, workers })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Embeds `texts`, returning one vector per text or an empty vector.
    ///
    /// # Errors
    ///
    /// Returns the first embedder error, or [`Error::OperationFailed`] if the
    /// embedder returns a vector count that matches neither zero nor the
    /// slice size.
    pub fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();

        let slices = self.workers.min(texts.len());
        let chunk_len = texts.len().div_ceil(slices);
        let results: Vec<Result<Vec<Vec<f32>>>> = if slices == 1 {
            vec![self.embedder.embed_batch(texts)]
        } else {
            thread::scope(|scope| {
                let handles: Vec<_> = texts
                    .chunks(chunk_len)
                    .map(|chunk| scope.spawn(move || self.embedder.embed_batch(chunk)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(Error::OperationFailed {
                                operation: "embed_batch".to_string(),
                                cause: "embedding worker panicked".to_string(),
                            })
                        })
                    })
                    .collect()
            })
        };

        let mut out = Vec::with_capacity(texts.len());
        let mut deferred = 0;
        for (result, chunk) in results.into_iter().zip(texts.chunks(chunk_len)) {
            let vectors = result?;
            if vectors.is_empty() {
                deferred += 1;
            } else if vectors.len() == chunk.len() {
                out.extend(vectors);
            } else {
                return Err(Error::OperationFailed {
                    operation: "embed_batch".to_string(),
                    cause: format!(
                        "embedder returned {} vectors for {} texts",
                        vectors.len(),
                        chunk.len()
                    ),
                });
            }
        }

        if deferred > 0 && !out.is_empty() {
            return Err(Error::OperationFailed {
                operation: "embed_batch".to_string(),
                cause: "embedder returned vectors for only part of the batch".to_string(),
            });
        }

        metrics::histogram!("embedding_batch_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::debug!(
            texts = texts.len(),
            slices,
            deferred = out.is_empty(),
            "Embedded batch"
        );
        Ok(out)
    }
}
