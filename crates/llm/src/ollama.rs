//! Ollama-compatible streaming backend
//!
//! Speaks the `/api/chat` NDJSON streaming protocol. One HTTP client per
//! process; each generation is its own request. The token stream observes
//! the session cancel signal between chunks, so an in-flight request is
//! abandoned at its next suspension.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use voxbridge_core::{
    CancelSignal, ChatMessage, GenerationParams, LlmProvider, ProviderError, TokenStream,
};

/// Backend configuration.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
    /// Keep the model loaded between calls ("5m", "1h", "-1").
    pub keep_alive: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model: "qwen3:4b-instruct".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            timeout: Duration::from_secs(30),
            keep_alive: "5m".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    options: ChatOptions,
    keep_alive: String,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: i64,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

pub struct OllamaBackend {
    client: Client,
    config: OllamaConfig,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn send_request(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/chat", self.config.endpoint);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::Transient(format!("upstream {status}")));
        }
        if !status.is_success() {
            return Err(ProviderError::Fatal(format!("upstream {status}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OllamaBackend {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        cancel: CancelSignal,
    ) -> Result<TokenStream, ProviderError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            stream: true,
            options: ChatOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens as i64,
            },
            keep_alive: self.config.keep_alive.clone(),
        };

        // One retry on transient connect failure; the caller's first-token
        // deadline bounds the total wait.
        let response = match self.send_request(&request).await {
            Ok(response) => response,
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "LLM request failed, retrying once");
                self.send_request(&request).await?
            }
            Err(e) => return Err(e),
        };

        let mut body = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut line_buffer = Vec::new();

            loop {
                let bytes = tokio::select! {
                    bytes = body.next() => bytes,
                    _ = cancel.cancelled() => {
                        tracing::debug!("LLM stream cancelled mid-generation");
                        return;
                    }
                };

                let bytes = match bytes {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        yield Err(ProviderError::Transient(format!("stream: {e}")));
                        return;
                    }
                    None => return,
                };

                line_buffer.extend_from_slice(&bytes);
                while let Some(newline) = line_buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = line_buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<ChatChunk>(line) {
                        Ok(chunk) => {
                            if let Some(message) = chunk.message {
                                if !message.content.is_empty() {
                                    yield Ok(message.content);
                                }
                            }
                            if chunk.done {
                                return;
                            }
                        }
                        Err(e) => {
                            yield Err(ProviderError::Fatal(format!("chunk parse: {e}")));
                            return;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_parsing() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"message":{"content":"Hel"},"done":false}"#).unwrap();
        assert_eq!(chunk.message.unwrap().content, "Hel");
        assert!(!chunk.done);

        let done: ChatChunk = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(done.done);
        assert!(done.message.is_none());
    }

    #[test]
    fn test_wire_role_names() {
        use voxbridge_core::Role;
        let message = ChatMessage::new(Role::System, "be brief");
        let wire = WireMessage::from(&message);
        assert_eq!(wire.role, "system");
    }
}
