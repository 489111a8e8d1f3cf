//! Simulated STT/TTS adapters
//!
//! Model-free stand-ins used by tests and development runs, mirroring the
//! contract semantics exactly: scripted transcripts with prefix-compatible
//! interims and one final per turn, and silence synthesis with ordered
//! chunks and prompt cancellation.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use voxbridge_core::{
    CancelSignal, PcmChunk, ProviderError, SttEvent, SttProvider, SttTurnStream, TtsProvider,
    TtsStream, STT_INPUT_CAPACITY, TTS_OUTPUT_CAPACITY,
};

/// Behaviour of one scripted STT turn.
#[derive(Debug, Clone)]
pub struct SimTurn {
    /// Transcript the turn resolves to.
    pub text: String,
    /// When false, the turn never emits a final (exercises the STT-final
    /// timeout path).
    pub emit_final: bool,
    /// Delay between close and the final event.
    pub final_delay: Duration,
}

impl SimTurn {
    pub fn transcribing(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emit_final: true,
            final_delay: Duration::from_millis(0),
        }
    }

    pub fn never_finalizes() -> Self {
        Self {
            text: String::new(),
            emit_final: false,
            final_delay: Duration::ZERO,
        }
    }

    pub fn with_final_delay(mut self, delay: Duration) -> Self {
        self.final_delay = delay;
        self
    }
}

/// Scripted speech-to-text adapter.
///
/// Each opened turn consumes the next script entry; turns beyond the script
/// resolve to empty finals. Interims are word-prefixes of the scripted text,
/// emitted as audio arrives.
pub struct SimStt {
    script: Mutex<VecDeque<SimTurn>>,
}

impl SimStt {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn scripted(turns: impl IntoIterator<Item = SimTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into_iter().collect()),
        }
    }
}

impl Default for SimStt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SttProvider for SimStt {
    async fn open_turn(
        &self,
        _sample_rate: u32,
        _language: &str,
    ) -> Result<SttTurnStream, ProviderError> {
        let turn = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| SimTurn::transcribing(""));

        let (audio_tx, mut audio_rx) = mpsc::channel(STT_INPUT_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let words: Vec<&str> = turn.text.split_whitespace().collect();
            let mut frames_seen = 0usize;
            let mut words_emitted = 0usize;

            while audio_rx.recv().await.is_some() {
                frames_seen += 1;
                // Reveal roughly one word per 4 frames of audio
                let should_reveal = frames_seen / 4;
                if should_reveal > words_emitted && words_emitted < words.len() {
                    words_emitted = should_reveal.min(words.len());
                    let prefix = words[..words_emitted].join(" ");
                    if events_tx
                        .send(SttEvent::Interim {
                            text: prefix,
                            confidence: 0.6,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }

            if !turn.emit_final {
                return;
            }
            if !turn.final_delay.is_zero() {
                tokio::time::sleep(turn.final_delay).await;
            }

            let text = if frames_seen > 0 {
                turn.text.clone()
            } else {
                // No audio between open and close: empty final
                String::new()
            };
            let _ = events_tx
                .send(SttEvent::Final {
                    text,
                    confidence: 0.92,
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
        "sim-stt"
    }
}

/// Output sample rate the silence synthesizer declares.
pub const SIM_TTS_SAMPLE_RATE: u32 = 24_000;

const CHUNK_MS: u64 = 20;
const MS_PER_CHAR: u64 = 50;

/// Silence-producing text-to-speech adapter.
///
/// Synthesis length is proportional to fragment length; chunks are ~20 ms
/// and strictly ordered. Cancellation is observed between chunks.
pub struct SimTts {
    chunk_delay: Duration,
}

impl SimTts {
    pub fn new() -> Self {
        Self {
            chunk_delay: Duration::ZERO,
        }
    }

    /// Delay each produced chunk, approximating a real synthesizer's pace.
    pub fn with_chunk_delay(delay: Duration) -> Self {
        Self { chunk_delay: delay }
    }
}

impl Default for SimTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsProvider for SimTts {
    async fn open_stream(&self, _voice: &str, _language: &str) -> Result<TtsStream, ProviderError> {
        let (text_tx, mut text_rx) = mpsc::channel::<String>(64);
        let (pcm_tx, pcm_rx) = mpsc::channel(TTS_OUTPUT_CAPACITY);
        let cancel = CancelSignal::new();

        let worker_cancel = cancel.clone();
        let chunk_delay = self.chunk_delay;
        tokio::spawn(async move {
            let chunk_samples = (SIM_TTS_SAMPLE_RATE as u64 * CHUNK_MS / 1000) as usize;
            let silence = vec![0u8; chunk_samples * 2];

            'stream: while let Some(fragment) = tokio::select! {
                fragment = text_rx.recv() => fragment,
                _ = worker_cancel.cancelled() => None,
            } {
                let total_ms = fragment.chars().count() as u64 * MS_PER_CHAR;
                let chunks = (total_ms / CHUNK_MS).max(1);

                for _ in 0..chunks {
                    if worker_cancel.is_set() {
                        break 'stream;
                    }
                    if !chunk_delay.is_zero() {
                        tokio::time::sleep(chunk_delay).await;
                    }
                    let chunk = PcmChunk::new(silence.clone(), SIM_TTS_SAMPLE_RATE);
                    let send = tokio::select! {
                        send = pcm_tx.send(chunk) => send,
                        _ = worker_cancel.cancelled() => break 'stream,
                    };
                    if send.is_err() {
                        break 'stream;
                    }
                }
            }
            // Dropping pcm_tx closes the stream: drained or cancelled
        });

        Ok(TtsStream {
            text_tx,
            pcm_rx,
            cancel,
            sample_rate: SIM_TTS_SAMPLE_RATE,
        })
    }

    fn sample_rate(&self) -> u32 {
        SIM_TTS_SAMPLE_RATE
    }

    fn name(&self) -> &str {
        "sim-tts"
    }
}

/// Simulated audio source: canonical frames of synthetic speech or silence,
/// usable as test fixtures anywhere a participant would talk.
pub fn speech_frames(count: usize, start_ts_ns: u64) -> Vec<voxbridge_core::AudioFrame> {
    use voxbridge_core::{AudioFrame, VAD_FRAME_SAMPLES};

    (0..count)
        .map(|i| {
            // Loud pseudo-waveform: enough energy for the fallback VAD
            let samples: Vec<f32> = (0..VAD_FRAME_SAMPLES)
                .map(|n| ((n as f32) * 0.11).sin() * 0.6)
                .collect();
            AudioFrame::from_f32(
                &samples,
                16_000,
                start_ts_ns + (i as u64) * 32_000_000,
            )
        })
        .collect()
}

/// Silent canonical frames.
pub fn silence_frames(count: usize, start_ts_ns: u64) -> Vec<voxbridge_core::AudioFrame> {
    use voxbridge_core::{AudioFrame, VAD_FRAME_SAMPLES};

    (0..count)
        .map(|i| {
            AudioFrame::from_f32(
                &vec![0.0f32; VAD_FRAME_SAMPLES],
                16_000,
                start_ts_ns + (i as u64) * 32_000_000,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_turn_reveals_prefix_interims() {
        let provider = SimStt::scripted([SimTurn::transcribing("what is the capital of france")]);
        let stream = provider.open_turn(16_000, "en").await.unwrap();
        let SttTurnStream {
            audio_tx,
            mut events_rx,
        } = stream;

        for frame in speech_frames(40, 0) {
            audio_tx.send(frame).await.unwrap();
        }
        drop(audio_tx);

        let mut interims: Vec<String> = Vec::new();
        let mut final_text = None;
        while let Some(event) = events_rx.recv().await {
            match event {
                SttEvent::Interim { text, .. } => interims.push(text),
                SttEvent::Final { text, .. } => final_text = Some(text),
            }
        }

        let final_text = final_text.expect("one final per turn");
        assert_eq!(final_text, "what is the capital of france");
        // Each interim is a prefix of the final
        for interim in &interims {
            assert!(final_text.starts_with(interim.as_str()));
        }
        assert!(!interims.is_empty());
    }

    #[tokio::test]
    async fn test_unfinalized_turn_emits_nothing_after_close() {
        let provider = SimStt::scripted([SimTurn::never_finalizes()]);
        let SttTurnStream {
            audio_tx,
            mut events_rx,
        } = provider.open_turn(16_000, "en").await.unwrap();

        audio_tx.send(speech_frames(1, 0).remove(0)).await.unwrap();
        drop(audio_tx);

        let got = tokio::time::timeout(Duration::from_millis(100), events_rx.recv()).await;
        // Channel ends without a final
        assert!(matches!(got, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_sim_tts_duration_tracks_text_length() {
        let provider = SimTts::new();
        let TtsStream {
            text_tx,
            mut pcm_rx,
            ..
        } = provider.open_stream("default", "en").await.unwrap();

        text_tx.send("0123456789".to_string()).await.unwrap(); // 10 chars -> 500 ms
        drop(text_tx);

        let mut total = Duration::ZERO;
        while let Some(chunk) = pcm_rx.recv().await {
            assert_eq!(chunk.sample_rate, SIM_TTS_SAMPLE_RATE);
            total += chunk.duration();
        }
        assert_eq!(total, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_sim_tts_cancel_closes_stream() {
        let provider = SimTts::with_chunk_delay(Duration::from_millis(5));
        let TtsStream {
            text_tx,
            mut pcm_rx,
            cancel,
            ..
        } = provider.open_stream("default", "en").await.unwrap();

        text_tx
            .send("a rather long response that keeps synthesizing".to_string())
            .await
            .unwrap();
        // Let it start, then cancel
        let _ = pcm_rx.recv().await;
        cancel.set();

        let drained = tokio::time::timeout(Duration::from_millis(200), async {
            while pcm_rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "cancel must close the stream within 200ms");
    }
}
