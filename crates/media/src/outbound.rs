//! Outbound audio track
//!
//! Accepts PCM chunks from the TTS driver (at the provider's rate),
//! resamples to the transport rate, and paces writes so playback proceeds
//! at real time, never faster. `flush()` empties the queue immediately for
//! barge-in: queued chunks are discarded before they reach the transport.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;

use voxbridge_core::{AudioFrame, PcmChunk};

use crate::MediaError;

/// Queue capacity in chunks (~20 ms each).
const QUEUE_CAPACITY: usize = 128;

/// Destination for outbound audio, implemented by the transport binding.
#[async_trait]
pub trait OutboundSink: Send + 'static {
    async fn write(&mut self, frame: AudioFrame) -> Result<(), MediaError>;
}

struct QueuedChunk {
    generation: u64,
    chunk: PcmChunk,
}

/// Handle to the outbound writer task.
pub struct OutboundTrack {
    queue_tx: mpsc::Sender<QueuedChunk>,
    generation: watch::Sender<u64>,
    /// Queued-but-unwritten audio in milliseconds.
    depth_ms: Arc<AtomicI64>,
    drained: Arc<Notify>,
    transport_rate: u32,
}

impl OutboundTrack {
    /// Spawn the writer task over the given sink.
    pub fn start(mut sink: Box<dyn OutboundSink>, transport_rate: u32) -> Self {
        let (queue_tx, mut queue_rx) = mpsc::channel::<QueuedChunk>(QUEUE_CAPACITY);
        let (generation, mut generation_rx) = watch::channel(0u64);
        let depth_ms = Arc::new(AtomicI64::new(0));
        let drained = Arc::new(Notify::new());

        let writer_depth = Arc::clone(&depth_ms);
        let writer_drained = Arc::clone(&drained);
        tokio::spawn(async move {
            // Wall-clock pacing: playback position may lag real time but
            // never lead it.
            let mut playback_started: Option<Instant> = None;
            let mut played = Duration::ZERO;

            while let Some(item) = queue_rx.recv().await {
                let current_gen = *generation_rx.borrow();
                let chunk_ms = item.chunk.duration().as_millis() as i64;

                if item.generation < current_gen {
                    // Flushed before it reached the wire
                    writer_depth.fetch_sub(chunk_ms, Ordering::Relaxed);
                    writer_drained.notify_waiters();
                    continue;
                }

                let now = Instant::now();
                let start = playback_started.get_or_insert(now);
                let mut due = *start + played;
                if due < now {
                    // Fell behind real time (gap between turns, slow sink):
                    // resync the baseline so pacing resumes from here
                    // instead of bursting the backlog.
                    *start = now - played;
                    due = now;
                }
                if due > now {
                    // Sleep until the chunk is due, but abandon the wait if a
                    // flush arrives in the meantime.
                    tokio::select! {
                        _ = tokio::time::sleep_until(due) => {}
                        _ = generation_rx.changed() => {
                            writer_depth.fetch_sub(chunk_ms, Ordering::Relaxed);
                            writer_drained.notify_waiters();
                            continue;
                        }
                    }
                }

                let frame = AudioFrame {
                    timestamp_ns: played.as_nanos() as u64,
                    sample_rate: item.chunk.sample_rate,
                    channels: 1,
                    payload: item.chunk.payload.clone(),
                };
                played += item.chunk.duration();

                writer_depth.fetch_sub(chunk_ms, Ordering::Relaxed);
                writer_drained.notify_waiters();

                if let Err(e) = sink.write(frame).await {
                    tracing::warn!(error = %e, "outbound write failed, stopping track");
                    break;
                }
            }
            writer_drained.notify_waiters();
        });

        Self {
            queue_tx,
            generation,
            depth_ms,
            drained,
            transport_rate,
        }
    }

    /// Queue one TTS chunk for playback, resampling to the transport rate.
    pub async fn enqueue(&self, chunk: PcmChunk) -> Result<(), MediaError> {
        let chunk = if chunk.sample_rate == self.transport_rate {
            chunk
        } else {
            let frame = AudioFrame {
                timestamp_ns: 0,
                sample_rate: chunk.sample_rate,
                channels: 1,
                payload: chunk.payload,
            };
            let resampled = frame.resample(self.transport_rate);
            PcmChunk {
                sample_rate: self.transport_rate,
                payload: resampled.payload,
            }
        };

        let generation = *self.generation.borrow();
        let chunk_ms = chunk.duration().as_millis() as i64;
        self.depth_ms.fetch_add(chunk_ms, Ordering::Relaxed);

        match self.queue_tx.send(QueuedChunk { generation, chunk }).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.depth_ms.fetch_sub(chunk_ms, Ordering::Relaxed);
                self.drained.notify_waiters();
                Err(MediaError::TrackClosed)
            }
        }
    }

    /// Immediately discard all queued audio. Chunks already handed to the
    /// transport are beyond reach; everything else never plays.
    pub fn flush(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Audio currently queued but not yet written.
    pub fn queued(&self) -> Duration {
        let ms = self.depth_ms.load(Ordering::Relaxed).max(0);
        Duration::from_millis(ms as u64)
    }

    /// Wait until the queue is empty (written or flushed).
    pub async fn drained(&self) {
        loop {
            // Register interest before checking so a decrement between the
            // check and the await still wakes us.
            let notified = self.drained.notified();
            if self.depth_ms.load(Ordering::Relaxed) <= 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn transport_rate(&self) -> u32 {
        self.transport_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Sink capturing written frames.
    struct CaptureSink {
        written: Arc<Mutex<Vec<AudioFrame>>>,
    }

    #[async_trait]
    impl OutboundSink for CaptureSink {
        async fn write(&mut self, frame: AudioFrame) -> Result<(), MediaError> {
            self.written.lock().push(frame);
            Ok(())
        }
    }

    fn capture() -> (Box<dyn OutboundSink>, Arc<Mutex<Vec<AudioFrame>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(CaptureSink {
                written: Arc::clone(&written),
            }),
            written,
        )
    }

    fn chunk_ms(ms: u64, rate: u32) -> PcmChunk {
        let samples = (rate as u64 * ms / 1000) as usize;
        PcmChunk::new(vec![0u8; samples * 2], rate)
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_written_in_order() {
        let (sink, written) = capture();
        let track = OutboundTrack::start(sink, 16_000);

        for _ in 0..5 {
            track.enqueue(chunk_ms(20, 16_000)).await.unwrap();
        }
        track.drained().await;

        let frames = written.lock();
        assert_eq!(frames.len(), 5);
        let timestamps: Vec<u64> = frames.iter().map(|f| f.timestamp_ns).collect();
        let mut sorted = timestamps.clone();
        sorted.sort_unstable();
        assert_eq!(timestamps, sorted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_discards_queued_audio() {
        let (sink, written) = capture();
        let track = OutboundTrack::start(sink, 16_000);

        // First chunk plays immediately; the rest are paced behind it
        for _ in 0..10 {
            track.enqueue(chunk_ms(100, 16_000)).await.unwrap();
        }
        tokio::task::yield_now().await;
        track.flush();
        track.drained().await;

        // Queue reports empty and nearly nothing reached the sink
        assert_eq!(track.queued(), Duration::ZERO);
        assert!(written.lock().len() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resamples_to_transport_rate() {
        let (sink, written) = capture();
        let track = OutboundTrack::start(sink, 48_000);

        track.enqueue(chunk_ms(20, 24_000)).await.unwrap();
        track.drained().await;
        // Give the writer a beat to push through the sink
        tokio::time::sleep(Duration::from_millis(50)).await;

        let frames = written.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sample_rate, 48_000);
        // 20 ms at 48 kHz = 960 samples
        assert_eq!(frames[0].sample_count(), 960);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_depth_accounting() {
        let (sink, _written) = capture();
        let track = OutboundTrack::start(sink, 16_000);

        for _ in 0..10 {
            track.enqueue(chunk_ms(100, 16_000)).await.unwrap();
        }
        // ~1 s of audio queued (minus whatever the writer already consumed)
        assert!(track.queued() >= Duration::from_millis(500));
        track.drained().await;
        assert_eq!(track.queued(), Duration::ZERO);
    }
}
