//! Provider error taxonomy
//!
//! Providers classify their failures so callers can apply the retry/degrade
//! policy without inspecting vendor-specific detail.

use thiserror::Error;

/// Errors surfaced by provider adapters.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Network blip, 5xx, stream reset. Retried once within the stage
    /// deadline before the stage degrades.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Unknown provider id, missing credentials, malformed binding.
    /// Surfaced at session create; the session is not created.
    #[error("provider configuration error: {0}")]
    Config(String),

    /// Stage deadline expired.
    #[error("provider timed out")]
    Timeout,

    /// Clean unwind after barge-in or session stop. Not a failure.
    #[error("cancelled")]
    Cancelled,

    /// Model produced garbage or the adapter hit an unrecoverable state.
    #[error("provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// Whether the subsystem should attempt its single retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Transient("reset".into()).is_transient());
        assert!(!ProviderError::Timeout.is_transient());
        assert!(!ProviderError::Cancelled.is_transient());
    }
}
