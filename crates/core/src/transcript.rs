//! Transcript types

use serde::{Deserialize, Serialize};

/// A transcript fragment emitted by the STT stream.
///
/// Interim fragments may be superseded by later ones; exactly one final
/// fragment is produced per detected utterance. Interims are forwarded to
/// the control sidechannel but never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptFragment {
    pub text: String,
    pub is_final: bool,
    /// Recognition confidence in [0, 1].
    pub confidence: f32,
    /// The session turn this fragment belongs to.
    pub turn_id: u64,
    /// Set when the provider degraded (model error, reconnect failure) and
    /// the final is synthetic.
    #[serde(default)]
    pub degraded: bool,
}

impl TranscriptFragment {
    pub fn interim(text: impl Into<String>, confidence: f32, turn_id: u64) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence,
            turn_id,
            degraded: false,
        }
    }

    pub fn final_result(text: impl Into<String>, confidence: f32, turn_id: u64) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence,
            turn_id,
            degraded: false,
        }
    }

    /// Synthetic empty final used when the provider failed mid-turn.
    pub fn degraded_final(turn_id: u64) -> Self {
        Self {
            text: String::new(),
            is_final: true,
            confidence: 0.0,
            turn_id,
            degraded: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_final_is_empty() {
        let fragment = TranscriptFragment::degraded_final(3);
        assert!(fragment.is_final);
        assert!(fragment.degraded);
        assert!(fragment.is_empty());
        assert_eq!(fragment.turn_id, 3);
    }

    #[test]
    fn test_whitespace_only_counts_as_empty() {
        let fragment = TranscriptFragment::final_result("   ", 0.9, 1);
        assert!(fragment.is_empty());
    }
}
