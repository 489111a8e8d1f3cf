//! Persistent streaming transcription wrapper
//!
//! One `SttStream` per session. It owns turn lifecycle against the provider
//! adapter and applies the reconnect policy: a connection error mid-turn gets
//! one reopen attempt within 500 ms, after which the turn degrades to a
//! synthetic empty final.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use voxbridge_core::{AudioFrame, SttEvent, SttProvider};

use crate::PipelineError;

const RECONNECT_WINDOW: Duration = Duration::from_millis(500);

/// Result of pushing one frame into the open turn.
pub enum PushOutcome {
    /// Frame accepted.
    Accepted,
    /// The provider stream died and was reopened; audio pushed before the
    /// reconnect is lost. The new event receiver replaces the old one.
    Reconnected(mpsc::Receiver<SttEvent>),
    /// Reconnect also failed; the caller emits a synthetic empty final.
    Degraded,
}

/// Per-session STT stream.
pub struct SttStream {
    provider: Arc<dyn SttProvider>,
    sample_rate: u32,
    language: String,
    audio_tx: Option<mpsc::Sender<AudioFrame>>,
}

impl SttStream {
    pub fn new(provider: Arc<dyn SttProvider>, sample_rate: u32, language: &str) -> Self {
        Self {
            provider,
            sample_rate,
            language: language.to_string(),
            audio_tx: None,
        }
    }

    /// Open a transcription turn. Returns the event receiver the caller
    /// forwards interims from and awaits the final on.
    pub async fn open_turn(&mut self) -> Result<mpsc::Receiver<SttEvent>, PipelineError> {
        let stream = match self
            .provider
            .open_turn(self.sample_rate, &self.language)
            .await
        {
            Ok(stream) => stream,
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "STT open failed, retrying once");
                tokio::time::sleep(RECONNECT_WINDOW).await;
                self.provider
                    .open_turn(self.sample_rate, &self.language)
                    .await
                    .map_err(|e| PipelineError::Stt(e.to_string()))?
            }
            Err(e) => return Err(PipelineError::Stt(e.to_string())),
        };

        self.audio_tx = Some(stream.audio_tx);
        Ok(stream.events_rx)
    }

    /// Push gated audio into the open turn.
    pub async fn push_audio(&mut self, frame: AudioFrame) -> Result<PushOutcome, PipelineError> {
        let tx = match self.audio_tx.as_ref() {
            Some(tx) => tx,
            None => return Err(PipelineError::Stt("no open turn".to_string())),
        };

        if tx.send(frame).await.is_ok() {
            return Ok(PushOutcome::Accepted);
        }

        // Provider side dropped the receiver mid-turn: one reconnect attempt.
        tracing::warn!("STT stream closed mid-turn, attempting reconnect");
        metrics::counter!("stt_reconnects").increment(1);
        self.audio_tx = None;

        match tokio::time::timeout(
            RECONNECT_WINDOW,
            self.provider.open_turn(self.sample_rate, &self.language),
        )
        .await
        {
            Ok(Ok(stream)) => {
                self.audio_tx = Some(stream.audio_tx);
                Ok(PushOutcome::Reconnected(stream.events_rx))
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "STT reconnect failed, degrading turn");
                Ok(PushOutcome::Degraded)
            }
            Err(_) => {
                tracing::warn!("STT reconnect timed out, degrading turn");
                Ok(PushOutcome::Degraded)
            }
        }
    }

    /// Close the open turn: the provider sees the audio channel end and
    /// emits its final on the event receiver. Idempotent.
    pub fn close_turn(&mut self) {
        self.audio_tx = None;
    }

    pub fn has_open_turn(&self) -> bool {
        self.audio_tx.is_some()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}

/// Await the final transcript on an event receiver, forwarding interims to
/// the given callback. Returns `None` when the deadline passes or the
/// channel ends without a final.
pub async fn await_final<F>(
    events_rx: &mut mpsc::Receiver<SttEvent>,
    deadline: Duration,
    mut on_interim: F,
) -> Option<SttEvent>
where
    F: FnMut(String, f32),
{
    let result = tokio::time::timeout(deadline, async {
        while let Some(event) = events_rx.recv().await {
            match event {
                SttEvent::Interim { text, confidence } => on_interim(text, confidence),
                final_event @ SttEvent::Final { .. } => return Some(final_event),
            }
        }
        None
    })
    .await;

    result.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use voxbridge_core::ProviderError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use voxbridge_core::SttTurnStream;

    /// Provider whose first N opens fail with a transient error.
    struct FlakyStt {
        failures: AtomicUsize,
    }

    impl FlakyStt {
        fn failing(n: usize) -> Self {
            Self {
                failures: AtomicUsize::new(n),
            }
        }
    }

    #[async_trait]
    impl SttProvider for FlakyStt {
        async fn open_turn(
            &self,
            _sample_rate: u32,
            _language: &str,
        ) -> Result<SttTurnStream, ProviderError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::Transient("connection reset".into()));
            }
            let (audio_tx, mut audio_rx) = mpsc::channel(50);
            let (events_tx, events_rx) = mpsc::channel(16);
            tokio::spawn(async move {
                let mut frames = 0usize;
                while audio_rx.recv().await.is_some() {
                    frames += 1;
                }
                let _ = events_tx
                    .send(SttEvent::Final {
                        text: if frames > 0 { "ok".into() } else { String::new() },
                        confidence: 0.9,
                        degraded: false,
                    })
                    .await;
            });
            Ok(SttTurnStream {
                audio_tx,
                events_rx,
            })
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn frame() -> AudioFrame {
        AudioFrame::from_f32(&vec![0.1f32; 512], 16_000, 0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_retries_transient_failure_once() {
        let mut stream = SttStream::new(Arc::new(FlakyStt::failing(1)), 16_000, "en");
        let rx = stream.open_turn().await;
        assert!(rx.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_open_failures_surface_error() {
        let mut stream = SttStream::new(Arc::new(FlakyStt::failing(2)), 16_000, "en");
        assert!(stream.open_turn().await.is_err());
    }

    #[tokio::test]
    async fn test_turn_yields_exactly_one_final() {
        let mut stream = SttStream::new(Arc::new(FlakyStt::failing(0)), 16_000, "en");
        let mut rx = stream.open_turn().await.unwrap();

        stream.push_audio(frame()).await.unwrap();
        stream.close_turn();

        let mut interims = 0;
        let final_event = await_final(&mut rx, Duration::from_secs(1), |_, _| interims += 1)
            .await
            .expect("final expected");
        match final_event {
            SttEvent::Final { text, .. } => assert_eq!(text, "ok"),
            _ => panic!("expected final"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_turn_yields_empty_final() {
        let mut stream = SttStream::new(Arc::new(FlakyStt::failing(0)), 16_000, "en");
        let mut rx = stream.open_turn().await.unwrap();
        stream.close_turn();

        let final_event = await_final(&mut rx, Duration::from_secs(1), |_, _| {})
            .await
            .expect("final expected");
        match final_event {
            SttEvent::Final { text, .. } => assert!(text.is_empty()),
            _ => panic!("expected final"),
        }
    }
}
