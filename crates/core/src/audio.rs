//! Audio frame types and format conversion
//!
//! Everything inside the pipeline speaks one canonical format: 16 kHz mono
//! signed 16-bit little-endian PCM. MediaIO converts at the edges; nothing
//! past it needs to care what the transport delivered.

use std::sync::Arc;
use std::time::Duration;

/// Canonical internal sample rate (Hz).
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// Canonical internal channel count.
pub const CANONICAL_CHANNELS: u16 = 1;

/// VAD frame size in samples (512 samples = 32 ms at 16 kHz).
pub const VAD_FRAME_SAMPLES: usize = 512;

const PCM16_NORMALIZE: f32 = 32768.0;
const PCM16_SCALE: f32 = 32767.0;

/// Immutable audio frame in S16LE.
///
/// Frames live for one pipeline traversal; the only component that retains
/// them is the pre-speech ring buffer inside the VAD gate.
#[derive(Clone)]
pub struct AudioFrame {
    /// Monotonic capture timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Signed 16-bit little-endian PCM payload.
    pub payload: Arc<[u8]>,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("timestamp_ns", &self.timestamp_ns)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl AudioFrame {
    /// Create a frame from raw S16LE bytes.
    pub fn new(payload: Vec<u8>, sample_rate: u32, channels: u16, timestamp_ns: u64) -> Self {
        Self {
            timestamp_ns,
            sample_rate,
            channels,
            payload: payload.into(),
        }
    }

    /// Create a canonical-format frame from f32 samples in [-1.0, 1.0].
    pub fn from_f32(samples: &[f32], sample_rate: u32, timestamp_ns: u64) -> Self {
        let payload: Vec<u8> = samples
            .iter()
            .flat_map(|&s| {
                let clamped = s.clamp(-1.0, 1.0);
                ((clamped * PCM16_SCALE) as i16).to_le_bytes()
            })
            .collect();
        Self::new(payload, sample_rate, CANONICAL_CHANNELS, timestamp_ns)
    }

    /// Decode the payload to f32 samples normalized to [-1.0, 1.0].
    pub fn to_f32(&self) -> Vec<f32> {
        self.payload
            .chunks_exact(2)
            .map(|chunk| {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                sample as f32 / PCM16_NORMALIZE
            })
            .collect()
    }

    /// Number of samples per channel in this frame.
    pub fn sample_count(&self) -> usize {
        self.payload.len() / 2 / self.channels as usize
    }

    /// Frame duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.sample_count() as f64 / self.sample_rate as f64)
    }

    /// RMS energy in decibels. Empty frames report -96 dB.
    pub fn energy_db(&self) -> f32 {
        let samples = self.to_f32();
        if samples.is_empty() {
            return -96.0;
        }
        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_squares / samples.len() as f32).sqrt();
        if rms > 0.0 {
            20.0 * rms.log10()
        } else {
            -96.0
        }
    }

    /// Average interleaved stereo down to mono.
    pub fn to_mono(&self) -> Self {
        if self.channels == 1 {
            return self.clone();
        }
        let samples = self.to_f32();
        let step = self.channels as usize;
        let mono: Vec<f32> = samples
            .chunks_exact(step)
            .map(|frame| frame.iter().sum::<f32>() / step as f32)
            .collect();
        Self::from_f32(&mono, self.sample_rate, self.timestamp_ns)
    }

    /// Resample to a target rate.
    ///
    /// Uses Rubato's FFT resampler for frames long enough to benefit; short
    /// frames fall back to linear interpolation, as does any Rubato failure.
    pub fn resample(&self, target_rate: u32) -> Self {
        use rubato::{FftFixedIn, Resampler};

        if self.sample_rate == target_rate {
            return self.clone();
        }

        let samples = self.to_f32();
        // The FFT resampler consumes exactly one fixed-size chunk; frames
        // outside its sweet spot go through linear interpolation instead.
        if !(64..=4096).contains(&samples.len()) {
            return self.resample_linear(&samples, target_rate);
        }

        let samples_f64: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        let chunk_size = samples.len();

        match FftFixedIn::<f64>::new(
            self.sample_rate as usize,
            target_rate as usize,
            chunk_size,
            2,
            1,
        ) {
            Ok(mut resampler) => match resampler.process(&[samples_f64], None) {
                Ok(output) => {
                    let resampled: Vec<f32> = output[0].iter().map(|&s| s as f32).collect();
                    Self::from_f32(&resampled, target_rate, self.timestamp_ns)
                }
                Err(e) => {
                    tracing::warn!("resampler processing failed, using linear fallback: {}", e);
                    self.resample_linear(&samples, target_rate)
                }
            },
            Err(e) => {
                tracing::warn!("resampler init failed, using linear fallback: {}", e);
                self.resample_linear(&samples, target_rate)
            }
        }
    }

    fn resample_linear(&self, samples: &[f32], target_rate: u32) -> Self {
        let ratio = target_rate as f64 / self.sample_rate as f64;
        let new_len = (samples.len() as f64 * ratio) as usize;

        let mut resampled = Vec::with_capacity(new_len);
        for i in 0..new_len {
            let src_idx = i as f64 / ratio;
            let idx_floor = src_idx.floor() as usize;
            let idx_ceil = (idx_floor + 1).min(samples.len().saturating_sub(1));
            let frac = (src_idx - idx_floor as f64) as f32;

            let sample = samples[idx_floor] * (1.0 - frac) + samples[idx_ceil] * frac;
            resampled.push(sample);
        }

        Self::from_f32(&resampled, target_rate, self.timestamp_ns)
    }
}

/// A chunk of synthesized PCM produced by a TTS stream.
///
/// Chunks carry the provider's declared sample rate, which may differ from
/// the canonical rate; the outbound track resamples before writing.
#[derive(Clone)]
pub struct PcmChunk {
    /// Sample rate in Hz as declared at stream open.
    pub sample_rate: u32,
    /// S16LE payload.
    pub payload: Arc<[u8]>,
}

impl std::fmt::Debug for PcmChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmChunk")
            .field("sample_rate", &self.sample_rate)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl PcmChunk {
    pub fn new(payload: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            payload: payload.into(),
        }
    }

    /// Playback duration of this chunk (mono S16LE).
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.payload.len() as f64 / 2.0 / self.sample_rate as f64)
    }
}
