//! TTS turn wrapper
//!
//! One `TtsTurn` per assistant response. Wraps the provider stream with the
//! operations the event loop needs: push text fragments, await ordered PCM,
//! drain at end of turn, cancel on barge-in.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use voxbridge_core::{CancelSignal, PcmChunk, TtsProvider, TtsStream};

use crate::PipelineError;

/// An open synthesis turn.
pub struct TtsTurn {
    text_tx: Option<mpsc::Sender<String>>,
    pcm_rx: Option<mpsc::Receiver<PcmChunk>>,
    cancel: CancelSignal,
    sample_rate: u32,
}

impl TtsTurn {
    /// Open a stream on the provider. Sample rate and encoding are declared
    /// here and invariant for the session.
    pub async fn open(
        provider: &Arc<dyn TtsProvider>,
        voice: &str,
        language: &str,
    ) -> Result<Self, PipelineError> {
        let TtsStream {
            text_tx,
            pcm_rx,
            cancel,
            sample_rate,
        } = provider
            .open_stream(voice, language)
            .await
            .map_err(|e| PipelineError::Tts(e.to_string()))?;

        Ok(Self {
            text_tx: Some(text_tx),
            pcm_rx: Some(pcm_rx),
            cancel,
            sample_rate,
        })
    }

    /// Hand the PCM side to a dedicated consumer task. After this,
    /// `next_chunk` on the turn itself yields nothing.
    pub fn take_pcm(&mut self) -> mpsc::Receiver<PcmChunk> {
        self.pcm_rx
            .take()
            .expect("PCM receiver already taken")
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Push a text fragment. Fragments synthesize strictly in push order.
    pub async fn push_text(&mut self, fragment: String) -> Result<(), PipelineError> {
        let tx = self
            .text_tx
            .as_ref()
            .ok_or(PipelineError::ChannelClosed)?;
        tx.send(fragment)
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }

    /// Signal end of input; remaining audio keeps arriving until drained.
    pub fn close_when_drained(&mut self) {
        self.text_tx = None;
    }

    /// Stop synthesis promptly and discard chunks buffered inside the
    /// adapter. Safe to call more than once.
    pub fn cancel(&mut self) {
        self.cancel.set();
        self.text_tx = None;
    }

    /// Next PCM chunk, `None` once the stream is drained or cancelled.
    pub async fn next_chunk(&mut self) -> Option<PcmChunk> {
        match self.pcm_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Next PCM chunk with a deadline, used for the first-chunk timeout.
    pub async fn next_chunk_timeout(
        &mut self,
        deadline: Duration,
    ) -> Result<Option<PcmChunk>, PipelineError> {
        let Some(rx) = self.pcm_rx.as_mut() else {
            return Ok(None);
        };
        tokio::time::timeout(deadline, rx.recv())
            .await
            .map_err(|_| PipelineError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTts;

    #[tokio::test]
    async fn test_chunks_arrive_in_push_order() {
        let provider: Arc<dyn TtsProvider> = Arc::new(SimTts::new());
        let mut turn = TtsTurn::open(&provider, "default", "en").await.unwrap();

        turn.push_text("first fragment".into()).await.unwrap();
        turn.push_text("second".into()).await.unwrap();
        turn.close_when_drained();

        let mut durations = Vec::new();
        while let Some(chunk) = turn.next_chunk().await {
            durations.push(chunk.duration());
        }
        // SimTts produces audio proportional to text length, so the first
        // fragment's chunks come first and outnumber the second's.
        assert!(!durations.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_stream() {
        let provider: Arc<dyn TtsProvider> = Arc::new(SimTts::new());
        let mut turn = TtsTurn::open(&provider, "default", "en").await.unwrap();

        turn.push_text("a very long piece of text to synthesize".into())
            .await
            .unwrap();
        turn.cancel();

        // After cancel the stream ends; a bounded number of in-flight chunks
        // may still arrive but the channel must close.
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while turn.next_chunk().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "stream must close promptly after cancel");
    }

    #[tokio::test]
    async fn test_first_chunk_timeout() {
        let provider: Arc<dyn TtsProvider> = Arc::new(SimTts::new());
        let mut turn = TtsTurn::open(&provider, "default", "en").await.unwrap();
        // No text pushed and stream still open: the deadline must fire.
        let result = turn.next_chunk_timeout(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(PipelineError::Timeout)));
    }
}
