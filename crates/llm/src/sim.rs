//! Scripted language model
//!
//! Streams pre-written responses token by token with a configurable delay,
//! observing cancellation between tokens. Used by the session integration
//! tests and model-free development runs.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use voxbridge_core::{
    CancelSignal, ChatMessage, GenerationParams, LlmProvider, ProviderError, TokenStream,
};

/// Behaviour of one scripted generation.
#[derive(Debug, Clone)]
pub struct SimResponse {
    pub text: String,
    /// Delay before the first token (exercises the first-token timeout).
    pub first_token_delay: Duration,
    /// Delay between subsequent tokens.
    pub token_delay: Duration,
}

impl SimResponse {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            first_token_delay: Duration::ZERO,
            token_delay: Duration::ZERO,
        }
    }

    pub fn with_first_token_delay(mut self, delay: Duration) -> Self {
        self.first_token_delay = delay;
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }
}

pub struct SimLlm {
    script: Mutex<VecDeque<SimResponse>>,
    /// Message sequences seen by each generation, for assertions on prompt
    /// assembly and history commits.
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl SimLlm {
    /// Answers every request with a fixed canned line.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn scripted(responses: impl IntoIterator<Item = SimResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Message sequences passed to `stream`, oldest first.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }
}

impl Default for SimLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for SimLlm {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
        cancel: CancelSignal,
    ) -> Result<TokenStream, ProviderError> {
        self.calls.lock().push(messages.to_vec());
        let response = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| SimResponse::replying("I do not have an answer scripted."));

        // Token per word, whitespace reattached so concatenation reproduces
        // the original text.
        let words: Vec<String> = response
            .text
            .split_inclusive(' ')
            .map(|w| w.to_string())
            .collect();

        let stream = async_stream::stream! {
            if !response.first_token_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(response.first_token_delay) => {}
                    _ = cancel.cancelled() => return,
                }
            }

            for word in words {
                if cancel.is_set() {
                    return;
                }
                yield Ok(word);
                if !response.token_delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(response.token_delay) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "sim-llm"
    }
}
