//! Provider contracts
//!
//! The four capability surfaces the pipeline depends on. Adapters are values
//! implementing these traits; wire specifics live entirely inside the
//! adapter. Streaming surfaces are channel pairs so that adapters never hold
//! a reference back into the session: they see a sender and nothing else.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;

use crate::audio::{AudioFrame, PcmChunk};
use crate::cancel::CancelSignal;
use crate::error::ProviderError;
use crate::history::Role;
use crate::turn::RetrievedChunk;

/// Bounded capacity for a turn's audio push channel.
pub const STT_INPUT_CAPACITY: usize = 50;
/// Bounded capacity for a stream's TTS output channel (~20 ms chunks).
pub const TTS_OUTPUT_CAPACITY: usize = 40;

/// Events emitted by an open STT turn.
#[derive(Debug, Clone)]
pub enum SttEvent {
    Interim { text: String, confidence: f32 },
    /// Exactly one per turn, after the audio sender closes.
    Final {
        text: String,
        confidence: f32,
        degraded: bool,
    },
}

/// One open transcription turn.
///
/// Closing `audio_tx` asks the provider to finalize; the `Final` event then
/// arrives on `events_rx`. Dropping `events_rx` aborts the turn.
pub struct SttTurnStream {
    pub audio_tx: mpsc::Sender<AudioFrame>,
    pub events_rx: mpsc::Receiver<SttEvent>,
}

/// Streaming speech-to-text adapter. Pooled per process; each session opens
/// its own turns.
#[async_trait]
pub trait SttProvider: Send + Sync + 'static {
    async fn open_turn(
        &self,
        sample_rate: u32,
        language: &str,
    ) -> Result<SttTurnStream, ProviderError>;

    /// Adapter name for logging.
    fn name(&self) -> &str;
}

/// Chat message handed to the LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one generation.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

/// Ordered token stream from the LLM.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Streaming language model adapter.
///
/// The returned stream must observe the cancel signal: after it fires, the
/// stream stops yielding at its next suspension.
#[async_trait]
pub trait LlmProvider: Send + Sync + 'static {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        cancel: CancelSignal,
    ) -> Result<TokenStream, ProviderError>;

    fn name(&self) -> &str;
}

/// One open synthesis stream.
///
/// PCM chunks arrive in exactly the order fragments were pushed. Firing
/// `cancel` stops production promptly (<= 200 ms) and discards chunks still
/// buffered inside the adapter. Closing `text_tx` drains: remaining audio is
/// produced, then `pcm_rx` ends.
pub struct TtsStream {
    pub text_tx: mpsc::Sender<String>,
    pub pcm_rx: mpsc::Receiver<PcmChunk>,
    pub cancel: CancelSignal,
    /// Declared at open; invariant for the session.
    pub sample_rate: u32,
}

/// Streaming text-to-speech adapter.
#[async_trait]
pub trait TtsProvider: Send + Sync + 'static {
    async fn open_stream(&self, voice: &str, language: &str) -> Result<TtsStream, ProviderError>;

    /// Output sample rate the adapter declares at open.
    fn sample_rate(&self) -> u32;

    fn name(&self) -> &str;
}

/// Metadata filter for vector store queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    pub field: String,
    pub value: String,
}

/// Dense vector store adapter.
#[async_trait]
pub trait VectorStoreProvider: Send + Sync + 'static {
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filters: &[MetadataFilter],
    ) -> Result<Vec<RetrievedChunk>, ProviderError>;

    fn name(&self) -> &str;
}

/// Text embedding adapter. Kept warm for the life of the process.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + 'static {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}
