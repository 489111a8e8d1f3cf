//! Process-wide provider registry
//!
//! Maps provider id strings to adapter instances. Adapters are constructed
//! once at process start (clients are connection-pooled); sessions resolve
//! their bindings here at create time and keep the Arcs for their lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent_config::AgentConfig;
use crate::error::ProviderError;
use crate::providers::{
    EmbeddingProvider, LlmProvider, SttProvider, TtsProvider, VectorStoreProvider,
};

/// Registry of adapter instances keyed by id.
#[derive(Default)]
pub struct ProviderRegistry {
    stt: HashMap<String, Arc<dyn SttProvider>>,
    llm: HashMap<String, Arc<dyn LlmProvider>>,
    tts: HashMap<String, Arc<dyn TtsProvider>>,
    vector: HashMap<String, Arc<dyn VectorStoreProvider>>,
    embedding: HashMap<String, Arc<dyn EmbeddingProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_stt(&mut self, id: impl Into<String>, provider: Arc<dyn SttProvider>) {
        self.stt.insert(id.into(), provider);
    }

    pub fn register_llm(&mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.llm.insert(id.into(), provider);
    }

    pub fn register_tts(&mut self, id: impl Into<String>, provider: Arc<dyn TtsProvider>) {
        self.tts.insert(id.into(), provider);
    }

    pub fn register_vector_store(
        &mut self,
        id: impl Into<String>,
        provider: Arc<dyn VectorStoreProvider>,
    ) {
        self.vector.insert(id.into(), provider);
    }

    pub fn register_embedding(
        &mut self,
        id: impl Into<String>,
        provider: Arc<dyn EmbeddingProvider>,
    ) {
        self.embedding.insert(id.into(), provider);
    }

    /// Resolve an agent configuration into concrete adapters.
    ///
    /// Fails with a config error when any bound id is unknown; retrieval
    /// bindings are optional but must resolve fully when present.
    pub fn resolve(&self, config: &AgentConfig) -> Result<ResolvedProviders, ProviderError> {
        let stt = self
            .stt
            .get(&config.stt.provider)
            .cloned()
            .ok_or_else(|| unknown("stt", &config.stt.provider))?;
        let llm = self
            .llm
            .get(&config.llm.provider)
            .cloned()
            .ok_or_else(|| unknown("llm", &config.llm.provider))?;
        let tts = self
            .tts
            .get(&config.tts.provider)
            .cloned()
            .ok_or_else(|| unknown("tts", &config.tts.provider))?;

        let retrieval = match &config.rag {
            Some(binding) => {
                let vector = self
                    .vector
                    .get(&binding.vector_store)
                    .cloned()
                    .ok_or_else(|| unknown("vector_store", &binding.vector_store))?;
                let embedding = self
                    .embedding
                    .get(&binding.embedding)
                    .cloned()
                    .ok_or_else(|| unknown("embedding", &binding.embedding))?;
                Some((vector, embedding))
            }
            None => None,
        };

        Ok(ResolvedProviders {
            stt,
            llm,
            tts,
            retrieval,
        })
    }
}

fn unknown(kind: &str, id: &str) -> ProviderError {
    ProviderError::Config(format!("unknown {kind} provider id: {id}"))
}

/// Adapters resolved for one session. Immutable for the session's lifetime.
#[derive(Clone)]
pub struct ResolvedProviders {
    pub stt: Arc<dyn SttProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub tts: Arc<dyn TtsProvider>,
    pub retrieval: Option<(Arc<dyn VectorStoreProvider>, Arc<dyn EmbeddingProvider>)>,
}
