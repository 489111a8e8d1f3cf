//! Per-session metrics
//!
//! Counters are updated from pipeline workers via atomics and snapshotted
//! onto the control sidechannel. Process-level aggregates go through the
//! `metrics` facade at the recording sites.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Shared counter block, one per session.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub tokens: AtomicU64,
    pub audio_chunks: AtomicU64,
    pub frames_dropped_late: AtomicU64,
    pub stt_timeouts: AtomicU64,
    pub retrieval_degraded: AtomicU64,
    pub barge_ins: AtomicU64,
    /// First TTS chunk latency for the most recent turn (ms).
    pub first_chunk_latency_ms: AtomicU64,
    /// Delay from speech_end to first outbound write for the most recent turn (ms).
    pub playback_start_latency_ms: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn incr_tokens(&self) {
        self.tokens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_audio_chunks(&self) {
        self.audio_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_frames_dropped_late(&self) {
        self.frames_dropped_late.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_stt_timeouts(&self) {
        self.stt_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_retrieval_degraded(&self) {
        self.retrieval_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_barge_ins(&self) {
        self.barge_ins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_first_chunk_latency(&self, ms: u64) {
        self.first_chunk_latency_ms.store(ms, Ordering::Relaxed);
    }

    pub fn record_playback_start_latency(&self, ms: u64) {
        self.playback_start_latency_ms.store(ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tokens: self.tokens.load(Ordering::Relaxed),
            audio_chunks: self.audio_chunks.load(Ordering::Relaxed),
            frames_dropped_late: self.frames_dropped_late.load(Ordering::Relaxed),
            stt_timeout: self.stt_timeouts.load(Ordering::Relaxed),
            retrieval_degraded: self.retrieval_degraded.load(Ordering::Relaxed),
            barge_ins: self.barge_ins.load(Ordering::Relaxed),
            first_chunk_latency_ms: self.first_chunk_latency_ms.load(Ordering::Relaxed),
            playback_start_latency_ms: self.playback_start_latency_ms.load(Ordering::Relaxed),
        }
    }
}

/// Wire shape for `metrics_update` sidechannel messages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tokens: u64,
    pub audio_chunks: u64,
    pub frames_dropped_late: u64,
    pub stt_timeout: u64,
    pub retrieval_degraded: u64,
    pub barge_ins: u64,
    pub first_chunk_latency_ms: u64,
    pub playback_start_latency_ms: u64,
}
