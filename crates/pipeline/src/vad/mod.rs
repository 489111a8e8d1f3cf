//! VAD gate: per-frame speech decisions, hysteresis, pre-speech ring
//!
//! Frames that fall outside CAPTURING never reach STT. That gate is the
//! central latency and cost reduction of the whole pipeline, so the logic
//! here is deliberately synchronous and allocation-light: one probability
//! per 512-sample frame, two thresholds, two counters, one ring buffer.

#[cfg(feature = "onnx")]
pub mod silero;

use std::collections::VecDeque;

use voxbridge_config::VadSettings;
use voxbridge_core::{AudioFrame, VadEvent, VAD_FRAME_SAMPLES};

use crate::PipelineError;

/// Frame cadence the gate operates at (512 samples at 16 kHz).
pub const FRAME_MS: u64 = 32;

/// A voice-activity engine: speech probability for one canonical frame.
///
/// Engines carry per-session state (LSTM carry-over, smoothing); the model
/// weights behind them are shared process-wide and read-only.
pub trait VadEngine: Send {
    /// Probability in [0, 1] that the frame contains speech.
    /// Inference is bounded (<= 5 ms) and not cancellable.
    fn probability(&mut self, samples: &[f32]) -> Result<f32, PipelineError>;

    /// Reset per-session state.
    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

/// Energy-based fallback engine used when no ONNX model is available.
pub struct EnergyVad {
    floor_db: f32,
}

impl EnergyVad {
    pub fn new() -> Self {
        Self { floor_db: -50.0 }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new()
    }
}

impl VadEngine for EnergyVad {
    fn probability(&mut self, samples: &[f32]) -> Result<f32, PipelineError> {
        if samples.is_empty() {
            return Ok(0.0);
        }
        let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        let energy_db = 10.0 * energy.max(1e-10).log10();

        let threshold_db = self.floor_db + 10.0;
        if energy_db > threshold_db {
            Ok(((energy_db - threshold_db) / 30.0).clamp(0.0, 1.0))
        } else {
            Ok(0.0)
        }
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "energy"
    }
}

/// Process-wide VAD model handle: Silero when the feature and model file
/// are present, energy fallback otherwise. Loaded once; per-session engines
/// share the weights and keep their own state.
pub enum VadModelHandle {
    #[cfg(feature = "onnx")]
    Silero(std::sync::Arc<silero::SileroModel>),
    Energy,
}

impl VadModelHandle {
    /// Load the configured model at process start.
    pub fn load(settings: &VadSettings) -> Self {
        #[cfg(feature = "onnx")]
        {
            let model_path = std::path::Path::new(&settings.model_path);
            if model_path.exists() {
                match silero::SileroModel::load(model_path) {
                    Ok(model) => {
                        tracing::info!("using Silero VAD for voice activity detection");
                        return VadModelHandle::Silero(std::sync::Arc::new(model));
                    }
                    Err(e) => {
                        tracing::warn!(
                            "failed to load Silero VAD: {}, falling back to energy-based",
                            e
                        );
                    }
                }
            } else {
                tracing::warn!(
                    "Silero VAD model not found at {}, using energy-based VAD",
                    settings.model_path
                );
            }
        }
        #[cfg(not(feature = "onnx"))]
        let _ = settings;

        VadModelHandle::Energy
    }

    /// Build a per-session engine over the shared model.
    pub fn new_engine(&self) -> Box<dyn VadEngine> {
        match self {
            #[cfg(feature = "onnx")]
            VadModelHandle::Silero(model) => {
                Box::new(silero::SileroVad::new(std::sync::Arc::clone(model)))
            }
            VadModelHandle::Energy => Box::new(EnergyVad::new()),
        }
    }
}

/// Gate thresholds and windows, in the gate's own units.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub threshold_on: f32,
    pub threshold_off: f32,
    pub min_speech_frames: usize,
    pub min_silence_frames: usize,
    pub pre_roll_frames: usize,
}

impl GateConfig {
    pub fn from_settings(settings: &VadSettings) -> Self {
        let to_frames = |ms: u64| (ms.div_ceil(FRAME_MS) as usize).max(1);
        Self {
            threshold_on: settings.threshold_on,
            threshold_off: settings.threshold_off,
            min_speech_frames: to_frames(settings.min_speech_ms),
            min_silence_frames: to_frames(settings.min_silence_ms),
            pre_roll_frames: to_frames(settings.pre_roll_ms),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::from_settings(&VadSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Listening,
    Capturing,
}

/// What one frame produced: events for the event loop and frames for STT.
#[derive(Debug, Default)]
pub struct GateOutput {
    pub events: Vec<VadEvent>,
    pub to_stt: Vec<AudioFrame>,
}

/// The VAD-gated audio router.
pub struct VadGate {
    engine: Box<dyn VadEngine>,
    config: GateConfig,
    state: GateState,
    speech_frames: usize,
    silence_frames: usize,
    /// Last `pre_roll_frames` of canonical frames seen while listening.
    ring: VecDeque<AudioFrame>,
    /// Timestamp of the last frame that still counted as voiced.
    last_voice_ts: u64,
}

impl VadGate {
    pub fn new(engine: Box<dyn VadEngine>, config: GateConfig) -> Self {
        Self {
            engine,
            config,
            state: GateState::Listening,
            speech_frames: 0,
            silence_frames: 0,
            ring: VecDeque::new(),
            last_voice_ts: 0,
        }
    }

    /// Feed one canonical 512-sample frame through the gate.
    pub fn push_frame(&mut self, frame: AudioFrame) -> Result<GateOutput, PipelineError> {
        debug_assert_eq!(frame.sample_count(), VAD_FRAME_SAMPLES);

        let samples = frame.to_f32();
        let probability = self.engine.probability(&samples)?;

        let mut output = GateOutput::default();
        output.events.push(VadEvent::Probability {
            value: probability,
            timestamp_ns: frame.timestamp_ns,
        });

        match self.state {
            GateState::Listening => {
                self.push_ring(frame);

                if probability >= self.config.threshold_on {
                    self.speech_frames += 1;
                } else {
                    self.speech_frames = 0;
                }

                if self.speech_frames >= self.config.min_speech_frames {
                    // Capture onset is the first ring frame: the pre-roll is
                    // flushed ahead of the frame that tipped the hysteresis so
                    // the first syllable is never lost.
                    let onset_ts = self
                        .ring
                        .front()
                        .map(|f| f.timestamp_ns)
                        .unwrap_or(self.last_frame_ts());
                    output.events.push(VadEvent::SpeechStart {
                        timestamp_ns: onset_ts,
                    });
                    output.to_stt.extend(self.ring.drain(..));

                    self.state = GateState::Capturing;
                    self.speech_frames = 0;
                    self.silence_frames = 0;
                    self.last_voice_ts = self.last_frame_ts();
                }
            }
            GateState::Capturing => {
                if probability >= self.config.threshold_off {
                    self.silence_frames = 0;
                    self.last_voice_ts = frame.timestamp_ns;
                } else {
                    self.silence_frames += 1;
                }

                output.to_stt.push(frame);

                if self.silence_frames >= self.config.min_silence_frames {
                    output.events.push(VadEvent::SpeechEnd {
                        timestamp_ns: self.last_voice_ts,
                    });
                    self.state = GateState::Listening;
                    self.speech_frames = 0;
                    self.silence_frames = 0;
                }
            }
        }

        Ok(output)
    }

    /// Whether the gate currently routes frames to STT.
    pub fn is_capturing(&self) -> bool {
        self.state == GateState::Capturing
    }

    /// Reset gate and engine state, clearing the ring.
    pub fn reset(&mut self) {
        self.state = GateState::Listening;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.ring.clear();
        self.engine.reset();
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    fn push_ring(&mut self, frame: AudioFrame) {
        self.last_voice_ts = frame.timestamp_ns;
        self.ring.push_back(frame);
        while self.ring.len() > self.config.pre_roll_frames {
            self.ring.pop_front();
        }
    }

    fn last_frame_ts(&self) -> u64 {
        self.ring.back().map(|f| f.timestamp_ns).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Engine with a scripted probability sequence.
    struct ScriptedVad {
        probabilities: Vec<f32>,
        cursor: usize,
    }

    impl ScriptedVad {
        fn new(probabilities: Vec<f32>) -> Self {
            Self {
                probabilities,
                cursor: 0,
            }
        }
    }

    impl VadEngine for ScriptedVad {
        fn probability(&mut self, _samples: &[f32]) -> Result<f32, PipelineError> {
            let p = self
                .probabilities
                .get(self.cursor)
                .copied()
                .unwrap_or(0.0);
            self.cursor += 1;
            Ok(p)
        }

        fn reset(&mut self) {
            self.cursor = 0;
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn frame(index: u64) -> AudioFrame {
        AudioFrame::from_f32(
            &vec![0.1f32; VAD_FRAME_SAMPLES],
            16_000,
            index * FRAME_MS * 1_000_000,
        )
    }

    fn config() -> GateConfig {
        GateConfig {
            threshold_on: 0.5,
            threshold_off: 0.35,
            min_speech_frames: 3,
            min_silence_frames: 4,
            pre_roll_frames: 5,
        }
    }

    fn run(gate: &mut VadGate, count: u64) -> (Vec<VadEvent>, Vec<AudioFrame>) {
        let mut events = Vec::new();
        let mut to_stt = Vec::new();
        for i in 0..count {
            let out = gate.push_frame(frame(i)).unwrap();
            events.extend(out.events);
            to_stt.extend(out.to_stt);
        }
        (events, to_stt)
    }

    fn speech_starts(events: &[VadEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, VadEvent::SpeechStart { .. }))
            .count()
    }

    fn speech_ends(events: &[VadEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, VadEvent::SpeechEnd { .. }))
            .count()
    }

    #[test]
    fn test_single_subthreshold_frame_creates_no_turn() {
        let engine = ScriptedVad::new(vec![0.4]);
        let mut gate = VadGate::new(Box::new(engine), config());
        let (events, to_stt) = run(&mut gate, 1);

        assert_eq!(speech_starts(&events), 0);
        assert!(to_stt.is_empty());
        assert!(!gate.is_capturing());
    }

    #[test]
    fn test_exactly_threshold_utterance_yields_one_turn() {
        // 3 on-frames then 4 off-frames: exactly one start/end pair
        let mut probabilities = vec![0.9, 0.9, 0.9];
        probabilities.extend(vec![0.1; 4]);
        let engine = ScriptedVad::new(probabilities);
        let mut gate = VadGate::new(Box::new(engine), config());

        let (events, _) = run(&mut gate, 7);
        assert_eq!(speech_starts(&events), 1);
        assert_eq!(speech_ends(&events), 1);
        assert!(!gate.is_capturing());
    }

    #[test]
    fn test_pre_roll_flushed_before_trigger_frame() {
        // 4 silent frames, then speech: the ring holds the silent frames and
        // they arrive at STT ahead of the speech frames, in order. The ring
        // is sized so nothing is evicted before the trigger.
        let mut probabilities = vec![0.0; 4];
        probabilities.extend(vec![0.9; 3]);
        let engine = ScriptedVad::new(probabilities);
        let mut gate = VadGate::new(
            Box::new(engine),
            GateConfig {
                pre_roll_frames: 10,
                ..config()
            },
        );

        let (events, to_stt) = run(&mut gate, 7);
        assert_eq!(speech_starts(&events), 1);
        // All 7 frames captured: 4 pre-roll + 3 speech, trigger frame last
        assert_eq!(to_stt.len(), 7);
        let timestamps: Vec<u64> = to_stt.iter().map(|f| f.timestamp_ns).collect();
        let mut sorted = timestamps.clone();
        sorted.sort_unstable();
        assert_eq!(timestamps, sorted);
    }

    #[test]
    fn test_short_pre_roll_flushes_without_padding() {
        // Only 1 frame before trigger and a 5-frame ring: flush exactly what
        // exists, no padding.
        let mut probabilities = vec![0.0];
        probabilities.extend(vec![0.9; 3]);
        let engine = ScriptedVad::new(probabilities);
        let mut gate = VadGate::new(Box::new(engine), config());

        let (_, to_stt) = run(&mut gate, 4);
        assert_eq!(to_stt.len(), 4);
    }

    #[test]
    fn test_ring_is_bounded() {
        // Long silence then speech: only pre_roll_frames of history survive.
        // The trigger fires on the last fed frame, so the drained ring (the
        // trigger frame plus the 4 frames before it) is all that reaches STT.
        let mut probabilities = vec![0.0; 50];
        probabilities.extend(vec![0.9; 3]);
        let engine = ScriptedVad::new(probabilities);
        let mut gate = VadGate::new(Box::new(engine), config());

        let (_, to_stt) = run(&mut gate, 53);
        assert_eq!(to_stt.len(), 5);
    }

    #[test]
    fn test_hysteresis_ignores_mid_band_wobble() {
        // Probabilities between off (0.35) and on (0.5) during capture must
        // neither end the turn nor reset the onset counter mid-listen.
        let mut probabilities = vec![0.9, 0.9, 0.9]; // confirm speech
        probabilities.extend(vec![0.4; 10]); // wobble: above off, below on
        let engine = ScriptedVad::new(probabilities);
        let mut gate = VadGate::new(Box::new(engine), config());

        let (events, _) = run(&mut gate, 13);
        assert_eq!(speech_starts(&events), 1);
        assert_eq!(speech_ends(&events), 0);
        assert!(gate.is_capturing());
    }

    #[test]
    fn test_speech_end_timestamp_is_last_voiced_frame() {
        let mut probabilities = vec![0.9, 0.9, 0.9];
        probabilities.extend(vec![0.1; 4]);
        let engine = ScriptedVad::new(probabilities);
        let mut gate = VadGate::new(Box::new(engine), config());

        let (events, _) = run(&mut gate, 7);
        let end_ts = events
            .iter()
            .find_map(|e| match e {
                VadEvent::SpeechEnd { timestamp_ns } => Some(*timestamp_ns),
                _ => None,
            })
            .unwrap();
        // Frame 2 is the last voiced frame
        assert_eq!(end_ts, 2 * FRAME_MS * 1_000_000);
    }

    #[test]
    fn test_threshold_zero_passes_everything() {
        // With both thresholds at zero every frame is speech from the first
        // frame, so the byte stream into STT equals the input byte stream.
        let engine = ScriptedVad::new(vec![1.0; 10]);
        let mut gate = VadGate::new(
            Box::new(engine),
            GateConfig {
                threshold_on: 0.0,
                threshold_off: 0.0,
                min_speech_frames: 1,
                min_silence_frames: 1000,
                pre_roll_frames: 1,
            },
        );

        let (_, to_stt) = run(&mut gate, 10);
        assert_eq!(to_stt.len(), 10);
        for (i, f) in to_stt.iter().enumerate() {
            assert_eq!(f.payload, frame(i as u64).payload);
        }
    }
}
