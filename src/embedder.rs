//! Text embedding behind a swappable `EmbeddingModel` trait. Generalizes
//! the hash-based placeholder embedding into a dimension-configurable,
//! mean-pooled, L2-normalized vector, with single-flight initialization
//! so concurrent first calls don't each pay model load cost.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::error::{IngestionError, Result};

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn load(dimension: usize) -> Result<Self>
    where
        Self: Sized;

    fn dimension(&self) -> usize;

    /// Token/byte-level feature vectors for `text`, one per token, each
    /// of length `dimension()`, before pooling.
    fn features(&self, text: &str) -> Vec<Vec<f32>>;
}

/// A deterministic hash-derived model, standing in for a real embedding
/// model client the way the original placeholder did, but shaped and
/// normalized the way a real one would be.
pub struct HashFeatureModel {
    dimension: usize,
}

#[async_trait]
impl EmbeddingModel for HashFeatureModel {
    async fn load(dimension: usize) -> Result<Self> {
        Ok(Self { dimension })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn features(&self, text: &str) -> Vec<Vec<f32>> {
        text.split_whitespace()
            .map(|token| {
                let hash = Sha256::digest(token.as_bytes());
                (0..self.dimension)
                    .map(|i| {
                        let byte = hash[i % hash.len()];
                        (byte as f32 / 255.0) * 2.0 - 1.0
                    })
                    .collect()
            })
            .collect()
    }
}

fn mean_pool_normalize(features: &[Vec<f32>], dimension: usize) -> Vec<f32> {
    if features.is_empty() {
        return vec![0.0; dimension];
    }

    let mut sums = vec![0.0f32; dimension];
    for vector in features {
        for (i, value) in vector.iter().enumerate().take(dimension) {
            sums[i] += value;
        }
    }

    let count = features.len() as f32;
    for value in sums.iter_mut() {
        *value /= count;
    }

    let norm = sums.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in sums.iter_mut() {
            *value /= norm;
        }
    }

    sums
}

pub struct Embedder<M: EmbeddingModel> {
    model: OnceCell<Arc<M>>,
    dimension: usize,
}

impl<M: EmbeddingModel + 'static> Embedder<M> {
    pub fn new(dimension: usize) -> Self {
        Self { model: OnceCell::new(), dimension }
    }

    async fn model(&self) -> Result<Arc<M>> {
        let dimension = self.dimension;
        self.model
            .get_or_try_init(|| async move { M::load(dimension).await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }

    #[instrument(skip(self, text))]
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            debug!("empty input, returning zero vector");
            return Ok(vec![0.0; self.dimension]);
        }

        let model = self.model().await?;
        let features = model.features(text);
        let embedding = mean_pool_normalize(&features, model.dimension());

        if embedding.len() != self.dimension {
            return Err(IngestionError::InvalidData(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_pool_of_empty_features_is_zero_vector() {
        let pooled = mean_pool_normalize(&[], 4);
        assert_eq!(pooled, vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn mean_pool_output_is_unit_length() {
        let features = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let pooled = mean_pool_normalize(&features, 3);
        let norm = pooled.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn embed_empty_text_yields_zero_vector_of_configured_dimension() {
        let embedder: Embedder<HashFeatureModel> = Embedder::new(256);
        let embedding = embedder.embed("   ").await.unwrap();
        assert_eq!(embedding.len(), 256);
        assert!(embedding.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn embed_nonempty_text_is_normalized_and_sized() {
        let embedder: Embedder<HashFeatureModel> = Embedder::new(256);
        let embedding = embedder.embed("hello world").await.unwrap();
        assert_eq!(embedding.len(), 256);
        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
