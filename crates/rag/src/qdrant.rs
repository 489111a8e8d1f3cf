//! Qdrant vector store adapter

use async_trait::async_trait;
use qdrant_client::qdrant::{value::Kind, Condition, Filter, SearchPointsBuilder, Value};
use qdrant_client::Qdrant;

use voxbridge_core::{MetadataFilter, ProviderError, RetrievedChunk, VectorStoreProvider};

/// Connection settings for a qdrant-backed store.
#[derive(Debug, Clone)]
pub struct QdrantStoreConfig {
    pub endpoint: String,
    pub collection: String,
    pub api_key: Option<String>,
}

impl Default for QdrantStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:6334".to_string(),
            collection: "knowledge".to_string(),
            api_key: None,
        }
    }
}

/// Dense store over a qdrant collection. One client per process.
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
}

impl QdrantStore {
    pub fn connect(config: QdrantStoreConfig) -> Result<Self, ProviderError> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| ProviderError::Config(format!("qdrant connection: {e}")))?;

        Ok(Self {
            client,
            collection: config.collection,
        })
    }
}

#[async_trait]
impl VectorStoreProvider for QdrantStore {
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filters: &[MetadataFilter],
    ) -> Result<Vec<RetrievedChunk>, ProviderError> {
        let mut search =
            SearchPointsBuilder::new(&self.collection, embedding.to_vec(), top_k as u64)
                .with_payload(true);

        if !filters.is_empty() {
            let conditions: Vec<Condition> = filters
                .iter()
                .map(|f| Condition::matches(f.field.clone(), f.value.clone()))
                .collect();
            search = search.filter(Filter::must(conditions));
        }

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(|e| ProviderError::Transient(format!("qdrant search: {e}")))?;

        let chunks = response
            .result
            .into_iter()
            .map(|point| {
                let text = point
                    .payload
                    .get("content")
                    .or_else(|| point.payload.get("text"))
                    .and_then(value_string)
                    .unwrap_or_default();
                let source_id = point
                    .payload
                    .get("source_id")
                    .and_then(value_string)
                    .unwrap_or_else(|| point_id_string(&point.id));

                RetrievedChunk {
                    text,
                    source_id,
                    score: point.score.clamp(0.0, 1.0),
                    rank: 0,
                }
            })
            .collect();

        Ok(chunks)
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

fn value_string(value: &Value) -> Option<String> {
    match &value.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn point_id_string(id: &Option<qdrant_client::qdrant::PointId>) -> String {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match id.as_ref().and_then(|p| p.point_id_options.as_ref()) {
        Some(PointIdOptions::Uuid(uuid)) => uuid.clone(),
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}
