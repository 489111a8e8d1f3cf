//! Real-time audio pipeline stages
//!
//! This crate provides the per-session pipeline pieces that sit between
//! MediaIO and the provider adapters:
//! - The VAD gate with hysteresis and pre-speech ring buffer
//! - The persistent STT stream wrapper (turn lifecycle, reconnect policy)
//! - The TTS turn wrapper (ordered chunks, prompt cancellation)
//! - Pre-TTS text aggregation (buffering levels)
//! - Simulated STT/TTS adapters for tests and model-free development

pub mod sim;
pub mod stt;
pub mod text;
pub mod tts;
pub mod vad;

pub use stt::{await_final, PushOutcome, SttStream};
pub use text::TextAggregator;
pub use tts::TtsTurn;
pub use vad::{EnergyVad, GateConfig, GateOutput, VadEngine, VadGate, VadModelHandle};

#[cfg(feature = "onnx")]
pub use vad::silero::{SileroModel, SileroVad};

use thiserror::Error;

/// Pipeline errors.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("VAD error: {0}")]
    Vad(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("timeout")]
    Timeout,
}
