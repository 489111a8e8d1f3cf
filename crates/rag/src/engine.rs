//! Retrieval engine
//!
//! Query flow: embed (warm model) -> dense top-N from the vector store ->
//! optional lexical top-N from tantivy -> merge by source, rank by score
//! descending with lexicographic tie-break -> top_k. The time budget is
//! enforced by the caller; ultra-low-latency mode answers repeats from the
//! TTL cache before any of that happens.

use std::sync::Arc;

use voxbridge_core::{
    turn::rank_chunks, EmbeddingProvider, ProviderError, RetrievedChunk, VectorStoreProvider,
};

use crate::{QueryCache, RagError, SparseIndex};

/// Per-agent retrieval parameters.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub dense_candidates: usize,
    /// Zero disables the lexical leg.
    pub lexical_candidates: usize,
    pub ultra_low_latency: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            dense_candidates: 24,
            lexical_candidates: 24,
            ultra_low_latency: false,
        }
    }
}

pub struct RetrievalEngine {
    vector: Arc<dyn VectorStoreProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    lexical: Option<Arc<SparseIndex>>,
    cache: QueryCache,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        vector: Arc<dyn VectorStoreProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            vector,
            embedder,
            lexical: None,
            cache: QueryCache::new(),
            config,
        }
    }

    pub fn with_lexical_index(mut self, index: Arc<SparseIndex>) -> Self {
        self.lexical = Some(index);
        self
    }

    #[cfg(test)]
    fn with_cache_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.cache = QueryCache::with_ttl(ttl);
        self
    }

    /// Retrieve the top chunks for a query.
    ///
    /// The caller wraps this in its latency budget; a timeout there means
    /// the turn proceeds with zero chunks.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, RagError> {
        if self.config.ultra_low_latency {
            if let Some(cached) = self.cache.get(query) {
                tracing::debug!(query, "retrieval served from query cache");
                return Ok(cached);
            }
        }

        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let dense = match self
            .vector
            .query(&embedding, self.config.dense_candidates, &[])
            .await
        {
            Ok(chunks) => chunks,
            Err(ProviderError::Transient(msg)) => {
                // One retry inside the budget, then give up on the dense leg
                tracing::warn!(error = %msg, "dense query failed, retrying once");
                self.vector
                    .query(&embedding, self.config.dense_candidates, &[])
                    .await
                    .map_err(|e| RagError::VectorStore(e.to_string()))?
            }
            Err(e) => return Err(RagError::VectorStore(e.to_string())),
        };

        let lexical = match (&self.lexical, self.config.lexical_candidates) {
            (Some(index), n) if n > 0 => {
                // Blocking tantivy search off the async executor
                let index = Arc::clone(index);
                let query_owned = query.to_string();
                tokio::task::spawn_blocking(move || index.search(&query_owned, n))
                    .await
                    .map_err(|e| RagError::Sparse(format!("lexical search task: {e}")))??
            }
            _ => Vec::new(),
        };

        let merged = merge_candidates(dense, lexical);
        let mut ranked = rank_chunks(merged);
        ranked.truncate(self.config.top_k);

        if self.config.ultra_low_latency {
            self.cache.put(query, ranked.clone());
        }
        Ok(ranked)
    }

    pub fn top_k(&self) -> usize {
        self.config.top_k
    }
}

/// Merge dense and lexical candidate sets by source, keeping the higher
/// score when a source appears in both legs.
fn merge_candidates(
    dense: Vec<RetrievedChunk>,
    lexical: Vec<RetrievedChunk>,
) -> Vec<RetrievedChunk> {
    let mut merged: Vec<RetrievedChunk> = dense;
    for candidate in lexical {
        match merged
            .iter_mut()
            .find(|c| c.source_id == candidate.source_id)
        {
            Some(existing) => existing.score = existing.score.max(candidate.score),
            None => merged.push(candidate),
        }
    }
    merged
}

/// Convenience: drop chunks from the bottom of a ranked list until the
/// estimated token count fits the budget.
pub fn trim_to_token_budget(
    mut chunks: Vec<RetrievedChunk>,
    token_budget: usize,
) -> Vec<RetrievedChunk> {
    use voxbridge_core::estimate_tokens;

    loop {
        let total: usize = chunks.iter().map(|c| estimate_tokens(&c.text)).sum();
        if total <= token_budget || chunks.is_empty() {
            return chunks;
        }
        chunks.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HashEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use voxbridge_core::MetadataFilter;

    /// Vector store with fixed results and a query counter.
    struct FixedStore {
        chunks: Vec<RetrievedChunk>,
        queries: AtomicUsize,
    }

    impl FixedStore {
        fn new(chunks: Vec<RetrievedChunk>) -> Self {
            Self {
                chunks,
                queries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VectorStoreProvider for FixedStore {
        async fn query(
            &self,
            _embedding: &[f32],
            top_k: usize,
            _filters: &[MetadataFilter],
        ) -> Result<Vec<RetrievedChunk>, ProviderError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.chunks.iter().take(top_k).cloned().collect())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn chunk(source_id: &str, score: f32, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            text: text.to_string(),
            source_id: source_id.to_string(),
            score,
            rank: 0,
        }
    }

    fn engine_with(
        chunks: Vec<RetrievedChunk>,
        config: RetrievalConfig,
    ) -> (RetrievalEngine, Arc<FixedStore>) {
        let store = Arc::new(FixedStore::new(chunks));
        let engine = RetrievalEngine::new(
            store.clone() as Arc<dyn VectorStoreProvider>,
            Arc::new(HashEmbedder::new()),
            config,
        );
        (engine, store)
    }

    #[tokio::test]
    async fn test_ranked_and_truncated_to_top_k() {
        let (engine, _) = engine_with(
            vec![
                chunk("low", 0.2, "low relevance"),
                chunk("high", 0.9, "high relevance"),
                chunk("mid", 0.5, "mid relevance"),
            ],
            RetrievalConfig {
                top_k: 2,
                ..Default::default()
            },
        );

        let results = engine.retrieve("anything").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_id, "high");
        assert_eq!(results[1].source_id, "mid");
        assert_eq!(results[0].rank, 0);
    }

    #[tokio::test]
    async fn test_lexical_leg_merges_by_source() {
        let index = Arc::new(SparseIndex::in_memory().unwrap());
        index
            .add_document("doc-paris", "Paris is the capital of France")
            .unwrap();
        index.commit().unwrap();

        let (engine, _) = engine_with(
            vec![chunk("doc-paris", 0.3, "Paris is the capital of France")],
            RetrievalConfig::default(),
        );
        let engine = engine.with_lexical_index(index);

        let results = engine.retrieve("capital of France").await.unwrap();
        // Same source from both legs collapses to one entry with the
        // higher of the two scores (lexical top hit normalises to 1.0)
        assert_eq!(results.len(), 1);
        assert!(results[0].score > 0.3);
    }

    #[tokio::test]
    async fn test_ultra_low_latency_cache_short_circuits() {
        let (engine, store) = engine_with(
            vec![chunk("doc", 0.8, "content")],
            RetrievalConfig {
                ultra_low_latency: true,
                ..Default::default()
            },
        );

        engine.retrieve("What is the rate?").await.unwrap();
        engine.retrieve("what is THE rate?").await.unwrap();
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_expiry_requeries() {
        let store = Arc::new(FixedStore::new(vec![chunk("doc", 0.8, "content")]));
        let engine = RetrievalEngine::new(
            store.clone() as Arc<dyn VectorStoreProvider>,
            Arc::new(HashEmbedder::new()),
            RetrievalConfig {
                ultra_low_latency: true,
                ..Default::default()
            },
        )
        .with_cache_ttl(Duration::ZERO);

        engine.retrieve("query").await.unwrap();
        engine.retrieve("query").await.unwrap();
        assert_eq!(store.queries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_trim_to_token_budget_drops_from_bottom() {
        let chunks = vec![
            chunk("a", 0.9, &"word ".repeat(40)),
            chunk("b", 0.5, &"word ".repeat(40)),
            chunk("c", 0.2, &"word ".repeat(40)),
        ];
        // Each chunk is ~51 estimated tokens; a 110-token budget keeps two
        let trimmed = trim_to_token_budget(chunks, 110);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed.last().unwrap().source_id, "b");
    }
}
