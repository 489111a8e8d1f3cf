//! Session state machine states

use serde::{Deserialize, Serialize};

/// Per-session state. Transitions are driven exclusively by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, pipelines not yet opened.
    Idle,
    /// Waiting for speech; every frame feeds the pre-speech ring.
    Listening,
    /// Speech confirmed; frames flow to STT.
    Capturing,
    /// Awaiting final transcript / LLM first token.
    Thinking,
    /// Streaming assistant audio outbound.
    Speaking,
    /// Barge-in fired; draining cancelled tasks.
    Interrupted,
    /// Cooperative shutdown in progress.
    Closing,
    /// All resources released.
    Closed,
}

impl SessionState {
    /// States in which a new speech_start triggers the barge-in protocol.
    pub fn is_interruptible(&self) -> bool {
        matches!(self, SessionState::Thinking | SessionState::Speaking)
    }

    /// Whether the session still processes inbound audio.
    pub fn is_live(&self) -> bool {
        !matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Capturing => "capturing",
            SessionState::Thinking => "thinking",
            SessionState::Speaking => "speaking",
            SessionState::Interrupted => "interrupted",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interruptible_states() {
        assert!(SessionState::Thinking.is_interruptible());
        assert!(SessionState::Speaking.is_interruptible());
        assert!(!SessionState::Listening.is_interruptible());
        assert!(!SessionState::Capturing.is_interruptible());
    }

    #[test]
    fn test_liveness() {
        assert!(SessionState::Idle.is_live());
        assert!(!SessionState::Closing.is_live());
        assert!(!SessionState::Closed.is_live());
    }
}
