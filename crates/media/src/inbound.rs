//! Inbound audio conditioning
//!
//! Converts whatever the transport delivers into canonical frames: downmix
//! to mono, resample to 16 kHz, re-chunk to 512 samples. Frames that arrive
//! more than 500 ms late relative to the wall clock are dropped and counted.

use std::sync::Arc;
use std::time::Duration;

use voxbridge_core::{AudioFrame, SessionMetrics, CANONICAL_SAMPLE_RATE, VAD_FRAME_SAMPLES};

/// How late a frame may arrive before it is discarded.
pub const LATE_FRAME_THRESHOLD: Duration = Duration::from_millis(500);

/// Stateful re-chunker from transport frames to canonical VAD frames.
pub struct InboundConditioner {
    /// Samples waiting for a full 512-sample frame.
    leftover: Vec<f32>,
    /// Timestamp assigned to the next emitted frame.
    next_ts_ns: u64,
    metrics: Arc<SessionMetrics>,
}

impl InboundConditioner {
    pub fn new(metrics: Arc<SessionMetrics>) -> Self {
        Self {
            leftover: Vec::with_capacity(VAD_FRAME_SAMPLES * 2),
            next_ts_ns: 0,
            metrics,
        }
    }

    /// Condition one transport frame.
    ///
    /// `now_ns` is the session's monotonic clock at arrival; it drives the
    /// late-frame drop and timestamps for emitted frames.
    pub fn push(&mut self, frame: AudioFrame, now_ns: u64) -> Vec<AudioFrame> {
        if now_ns.saturating_sub(frame.timestamp_ns) > LATE_FRAME_THRESHOLD.as_nanos() as u64 {
            self.metrics.incr_frames_dropped_late();
            metrics::counter!("frames_dropped_late").increment(1);
            tracing::debug!(
                frame_ts = frame.timestamp_ns,
                now = now_ns,
                "dropping late inbound frame"
            );
            return Vec::new();
        }

        let canonical = if frame.channels != 1 {
            frame.to_mono()
        } else {
            frame
        };
        let canonical = if canonical.sample_rate != CANONICAL_SAMPLE_RATE {
            canonical.resample(CANONICAL_SAMPLE_RATE)
        } else {
            canonical
        };

        if self.leftover.is_empty() {
            self.next_ts_ns = canonical.timestamp_ns;
        }
        self.leftover.extend(canonical.to_f32());

        let mut out = Vec::new();
        while self.leftover.len() >= VAD_FRAME_SAMPLES {
            let chunk: Vec<f32> = self.leftover.drain(..VAD_FRAME_SAMPLES).collect();
            out.push(AudioFrame::from_f32(
                &chunk,
                CANONICAL_SAMPLE_RATE,
                self.next_ts_ns,
            ));
            self.next_ts_ns += frame_duration_ns();
        }
        out
    }

    /// Discard buffered samples (used at session teardown).
    pub fn clear(&mut self) {
        self.leftover.clear();
    }
}

fn frame_duration_ns() -> u64 {
    (VAD_FRAME_SAMPLES as u64 * 1_000_000_000) / CANONICAL_SAMPLE_RATE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conditioner() -> InboundConditioner {
        InboundConditioner::new(SessionMetrics::new())
    }

    #[test]
    fn test_rechunks_to_vad_frames() {
        let mut conditioner = conditioner();
        // 20 ms at 16 kHz = 320 samples; two pushes make 640 = one 512 frame
        let frame = AudioFrame::from_f32(&vec![0.1; 320], 16_000, 0);
        assert!(conditioner.push(frame.clone(), 0).is_empty());
        let out = conditioner.push(frame, 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sample_count(), VAD_FRAME_SAMPLES);
    }

    #[test]
    fn test_resamples_foreign_rate() {
        let mut conditioner = conditioner();
        // 48 kHz 20 ms frame = 960 samples -> 320 canonical samples
        let frame = AudioFrame::from_f32(&vec![0.1; 960], 48_000, 0);
        let _ = conditioner.push(frame, 0);
        assert_eq!(conditioner.leftover.len(), 320);
    }

    #[test]
    fn test_late_frames_dropped_and_counted() {
        let metrics = SessionMetrics::new();
        let mut conditioner = InboundConditioner::new(metrics.clone());

        let stale = AudioFrame::from_f32(&vec![0.1; 512], 16_000, 0);
        let now = Duration::from_millis(700).as_nanos() as u64;
        assert!(conditioner.push(stale, now).is_empty());
        assert_eq!(metrics.snapshot().frames_dropped_late, 1);
    }

    #[test]
    fn test_identical_input_yields_identical_output() {
        let samples: Vec<f32> = (0..512).map(|i| ((i as f32) * 0.07).sin() * 0.4).collect();

        let run = || {
            let mut conditioner = conditioner();
            let frame = AudioFrame::from_f32(&samples, 16_000, 0);
            conditioner.push(frame, 0)
        };

        let a = run();
        let b = run();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.payload, y.payload);
        }
    }

    #[test]
    fn test_stereo_downmixed() {
        let mut conditioner = conditioner();
        let frame = AudioFrame {
            channels: 2,
            ..AudioFrame::from_f32(&vec![0.2; 1024], 16_000, 0)
        };
        let out = conditioner.push(frame, 0);
        // 1024 interleaved stereo samples -> 512 mono samples -> one frame
        assert_eq!(out.len(), 1);
    }
}
