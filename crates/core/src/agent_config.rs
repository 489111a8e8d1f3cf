//! Agent configuration record
//!
//! The record an operator stores per agent: system prompt plus provider
//! bindings. Resolved once at session create against the process registry
//! and never re-read during the session.

use serde::{Deserialize, Serialize};

/// What the session does when the LLM misses its first-token deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Abort the turn silently.
    #[default]
    Abort,
    /// Speak a short holding phrase through TTS.
    FallbackPhrase,
}

/// LLM binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmBinding {
    /// Registry id of the adapter.
    pub provider: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> usize {
    512
}

/// STT binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttBinding {
    pub provider: String,
    #[serde(default = "default_language")]
    pub language: String,
}

/// TTS binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsBinding {
    pub provider: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}
fn default_voice() -> String {
    "default".to_string()
}

/// Optional retrieval binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagBinding {
    /// Registry id of the vector store adapter.
    pub vector_store: String,
    /// Registry id of the embedding adapter.
    pub embedding: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_candidates")]
    pub dense_candidates: usize,
    /// Zero disables the lexical leg.
    #[serde(default = "default_candidates")]
    pub lexical_candidates: usize,
    #[serde(default)]
    pub ultra_low_latency: bool,
}

fn default_top_k() -> usize {
    5
}
fn default_candidates() -> usize {
    24
}

/// Full per-agent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub llm: LlmBinding,
    pub stt: SttBinding,
    pub tts: TtsBinding,
    #[serde(default)]
    pub rag: Option<RagBinding>,
    #[serde(default)]
    pub fallback: FallbackMode,
    /// Optional opening line spoken when the session starts.
    #[serde(default)]
    pub greeting: Option<String>,
    /// Phrase used by `FallbackMode::FallbackPhrase`.
    #[serde(default = "default_fallback_phrase")]
    pub fallback_phrase: String,
}

fn default_fallback_phrase() -> String {
    "One moment, please.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_deserializes_with_defaults() {
        let json = r#"{
            "system_prompt": "You are a concise assistant.",
            "llm": { "provider": "ollama" },
            "stt": { "provider": "sim" },
            "tts": { "provider": "sim" }
        }"#;
        let config: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.llm.max_tokens, 512);
        assert_eq!(config.stt.language, "en");
        assert!(config.rag.is_none());
        assert_eq!(config.fallback, FallbackMode::Abort);
    }

    #[test]
    fn test_rag_binding_defaults() {
        let json = r#"{ "vector_store": "qdrant", "embedding": "hash" }"#;
        let binding: RagBinding = serde_json::from_str(json).unwrap();
        assert_eq!(binding.top_k, 5);
        assert_eq!(binding.dense_candidates, 24);
        assert_eq!(binding.lexical_candidates, 24);
        assert!(!binding.ultra_low_latency);
    }
}
