//! Per-session cancel signal
//!
//! One signal per session, shared by every pipeline worker. Level-triggered:
//! once set it stays set until the next turn resets it, and every suspended
//! worker observes it. Setting an already-set signal is a no-op.

use tokio::sync::watch;

/// Cloneable cancellation handle backed by a watch channel.
#[derive(Clone)]
pub struct CancelSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Fire the signal. Idempotent.
    pub fn set(&self) {
        // send_if_modified avoids waking watchers on repeated sets
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
    }

    /// Re-arm for the next turn.
    pub fn reset(&self) {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                *cancelled = false;
                true
            } else {
                false
            }
        });
    }

    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal fires. Returns immediately if already set.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Sender dropped: the session is tearing down, treat as cancelled
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("set", &self.is_set())
            .finish()
    }
}
