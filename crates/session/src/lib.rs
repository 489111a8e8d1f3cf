//! Per-session conversational event loop and multi-session lifecycle
//!
//! The session crate ties the pipeline together: the state machine that
//! coordinates VAD, STT, LLM, and TTS for one participant, the chat engine
//! that drives a single turn, and the manager that owns every session in
//! the process.

pub mod chat;
pub mod manager;
pub mod session;

pub use chat::{ChatEngine, TurnOutcome};
pub use manager::SessionManager;
pub use session::{Session, SessionParams};

use thiserror::Error;

/// Session lifecycle errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("room {room_id} already has a live session")]
    AlreadyExists { room_id: String },

    #[error("agent configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session capacity reached")]
    Capacity,
}
