//! Core types and provider contracts for the voice orchestration platform
//!
//! This crate provides the foundational pieces used across all other crates:
//! - Audio frame types in the canonical internal format (16 kHz mono S16LE)
//! - Transcript, turn, and conversation history types
//! - The per-session cancel signal
//! - Control sidechannel event shapes
//! - Provider contracts (STT, LLM, TTS, vector store, embedding) and the
//!   process-wide registry that resolves agent configuration into adapters

pub mod agent_config;
pub mod audio;
pub mod cancel;
pub mod error;
pub mod events;
pub mod history;
pub mod metrics;
pub mod providers;
pub mod registry;
pub mod state;
pub mod transcript;
pub mod turn;

pub use agent_config::{AgentConfig, FallbackMode, LlmBinding, RagBinding, SttBinding, TtsBinding};
pub use audio::{AudioFrame, PcmChunk, CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE, VAD_FRAME_SAMPLES};
pub use cancel::CancelSignal;
pub use error::ProviderError;
pub use events::{ControlEvent, VadEvent};
pub use history::{estimate_tokens, ConversationHistory, HistoryLimits, Role};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use providers::{
    ChatMessage, EmbeddingProvider, GenerationParams, LlmProvider, MetadataFilter, SttEvent,
    SttProvider, SttTurnStream, TokenStream, TtsProvider, TtsStream, VectorStoreProvider,
    STT_INPUT_CAPACITY, TTS_OUTPUT_CAPACITY,
};
pub use registry::{ProviderRegistry, ResolvedProviders};
pub use state::SessionState;
pub use transcript::TranscriptFragment;
pub use turn::{RetrievedChunk, TurnContext};
