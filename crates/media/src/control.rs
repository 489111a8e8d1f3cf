//! Control sidechannel
//!
//! Unidirectional, best-effort publish channel for UI/client events.
//! Delivery is at-most-once: publishing never blocks a pipeline worker, and
//! a full queue drops the event. Clients resync from later authoritative
//! events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use voxbridge_core::ControlEvent;

const DEFAULT_CAPACITY: usize = 64;

/// Publisher half of the sidechannel.
#[derive(Clone)]
pub struct ControlChannel {
    tx: mpsc::Sender<ControlEvent>,
    muted: Arc<AtomicBool>,
}

impl ControlChannel {
    /// Create a channel pair; the receiver goes to the transport binding.
    pub fn new() -> (Self, mpsc::Receiver<ControlEvent>) {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<ControlEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                muted: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Publish without blocking. Drops on full, closed, or muted.
    pub fn publish(&self, event: ControlEvent) {
        if self.muted.load(Ordering::Relaxed) {
            return;
        }
        if let Err(e) = self.tx.try_send(event) {
            metrics::counter!("control_events_dropped").increment(1);
            tracing::debug!("control event dropped: {}", drop_reason(&e));
        }
    }

    /// Permanently silence the channel. Used when the session begins
    /// closing: nothing may be emitted for a destroyed session.
    pub fn mute(&self) {
        self.muted.store(true, Ordering::Relaxed);
    }
}

fn drop_reason<T>(err: &mpsc::error::TrySendError<T>) -> &'static str {
    match err {
        mpsc::error::TrySendError::Full(_) => "queue full",
        mpsc::error::TrySendError::Closed(_) => "subscriber gone",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_is_nonblocking_when_full() {
        let (channel, _rx) = ControlChannel::with_capacity(1);

        channel.publish(ControlEvent::SpeechStart { ts: 1 });
        // Queue is now full: this must return immediately and drop
        channel.publish(ControlEvent::SpeechStart { ts: 2 });
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (channel, mut rx) = ControlChannel::new();

        channel.publish(ControlEvent::SpeechStart { ts: 1 });
        channel.publish(ControlEvent::SpeechEnd { ts: 2 });

        assert_eq!(rx.recv().await, Some(ControlEvent::SpeechStart { ts: 1 }));
        assert_eq!(rx.recv().await, Some(ControlEvent::SpeechEnd { ts: 2 }));
    }

    #[tokio::test]
    async fn test_publish_after_subscriber_gone() {
        let (channel, rx) = ControlChannel::new();
        drop(rx);
        // Must not panic or block
        channel.publish(ControlEvent::BotResponseInterrupted {});
    }

    #[tokio::test]
    async fn test_muted_channel_emits_nothing() {
        let (channel, mut rx) = ControlChannel::new();
        channel.mute();
        channel.publish(ControlEvent::SpeechStart { ts: 1 });
        drop(channel);
        assert_eq!(rx.recv().await, None);
    }
}
