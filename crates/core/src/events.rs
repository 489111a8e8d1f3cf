//! Event types: VAD gate output and control sidechannel messages

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;

/// Events emitted by the VAD gate toward the session event loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadEvent {
    /// Speech confirmed. Timestamp is the capture onset: the first frame in
    /// the pre-speech ring, not the frame that tipped the hysteresis.
    SpeechStart { timestamp_ns: u64 },
    /// Silence confirmed. Timestamp is the last voiced frame.
    SpeechEnd { timestamp_ns: u64 },
    /// Per-frame model probability, for observers.
    Probability { value: f32, timestamp_ns: u64 },
}

/// Control sidechannel messages published toward the client UI.
///
/// Delivery is best-effort, at-most-once; clients resync from subsequent
/// authoritative events. Never carries error internals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    SpeechStart {
        ts: u64,
    },
    SpeechEnd {
        ts: u64,
    },
    TranscriptUpdate {
        text: String,
        is_final: bool,
    },
    AssistantResponse {
        text: String,
        is_complete: bool,
        is_first_token: bool,
    },
    BotResponseInterrupted {},
    MetricsUpdate(MetricsSnapshot),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_event_wire_shape() {
        let event = ControlEvent::TranscriptUpdate {
            text: "hello".to_string(),
            is_final: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"transcript_update""#));
        assert!(json.contains(r#""is_final":true"#));

        let back: ControlEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_interrupted_event_is_empty_object() {
        let json = serde_json::to_string(&ControlEvent::BotResponseInterrupted {}).unwrap();
        assert_eq!(json, r#"{"type":"bot_response_interrupted"}"#);
    }
}
