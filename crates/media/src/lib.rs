//! MediaIO: the bridge between the real-time transport and canonical PCM
//!
//! Inbound: native-codec frames are resampled/downmixed to 16 kHz mono
//! S16LE and re-chunked to the VAD frame size. Outbound: synthesized PCM is
//! resampled to the transport rate and paced to the wall clock. A best-effort
//! control sidechannel carries UI events alongside the audio.

pub mod control;
pub mod inbound;
pub mod outbound;

pub use control::ControlChannel;
pub use inbound::InboundConditioner;
pub use outbound::{OutboundSink, OutboundTrack};

use thiserror::Error;

/// Media layer errors.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("transport write failed: {0}")]
    Transport(String),

    #[error("outbound track closed")]
    TrackClosed,
}
