//! Hashed-projection fallback embedder
//!
//! A deterministic bag-of-words embedding: each token hashes to a handful of
//! dimensions, vectors are L2-normalised. No model download, loads warm, and
//! close enough for lexical-overlap similarity that development and tests
//! behave sensibly. Production deployments register a real embedding adapter
//! alongside it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use voxbridge_core::{EmbeddingProvider, ProviderError};

const DEFAULT_DIMENSION: usize = 384;
/// Each token contributes to this many dimensions.
const PROJECTIONS_PER_TOKEN: usize = 3;

pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(DEFAULT_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            for projection in 0..PROJECTIONS_PER_TOKEN {
                let mut hasher = DefaultHasher::new();
                (projection as u64).hash(&mut hasher);
                token.hash(&mut hasher);
                let hashed = hasher.finish();

                let index = (hashed % self.dimension as u64) as usize;
                // Sign bit from a higher hash bit keeps the projection balanced
                let sign = if hashed & (1 << 63) == 0 { 1.0 } else { -1.0 };
                vector[index] += sign;
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash-embedder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_deterministic() {
        let embedder = HashEmbedder::new();
        let a = embedder.embed("gold loan interest rate").await.unwrap();
        let b = embedder.embed("gold loan interest rate").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_normalised() {
        let embedder = HashEmbedder::new();
        let v = embedder.embed("some words to embed").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_overlap_scores_higher_than_disjoint() {
        let embedder = HashEmbedder::new();
        let query = embedder.embed("capital of france").await.unwrap();
        let related = embedder.embed("paris is the capital of france").await.unwrap();
        let unrelated = embedder.embed("tokyo weather tomorrow").await.unwrap();

        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_empty_text_yields_zero_vector() {
        let embedder = HashEmbedder::new();
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(v.len(), embedder.dimension());
    }
}
