//! LLM adapters and prompt assembly
//!
//! Implementations of the streaming language-model contract: an
//! Ollama-compatible HTTP backend for real inference and a scripted
//! simulator for tests and model-free development, plus the prompt builder
//! that lays out system message, retrieval block, history, and user turn.

pub mod ollama;
pub mod prompt;
pub mod sim;

pub use ollama::{OllamaBackend, OllamaConfig};
pub use prompt::build_messages;
pub use sim::{SimLlm, SimResponse};
