//! Chat engine: one user utterance to one streamed assistant response
//!
//! Drives retrieval under its latency budget, assembles the prompt, streams
//! LLM tokens through the pre-TTS aggregator into the synthesis stream, and
//! pumps ordered PCM into the outbound track. Every await observes the
//! session cancel signal so barge-in unwinds the whole chain promptly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::mpsc;

use voxbridge_core::{
    AgentConfig, CancelSignal, ControlEvent, FallbackMode, GenerationParams, PcmChunk,
    ResolvedProviders, Role, SessionMetrics,
};
use voxbridge_config::Settings;
use voxbridge_llm::build_messages;
use voxbridge_media::{ControlChannel, OutboundTrack};
use voxbridge_pipeline::{TextAggregator, TtsTurn};
use voxbridge_rag::{trim_to_token_budget, RetrievalEngine};

use crate::session::LoopEvent;

/// How long the TTS feed may stall on a saturated outbound queue before the
/// turn is treated as interrupted.
const BACKPRESSURE_LIMIT: Duration = Duration::from_secs(2);
/// Outbound queue depth that pauses the TTS producer.
const OUTBOUND_HIGH_WATER: Duration = Duration::from_secs(2);
const BACKPRESSURE_POLL: Duration = Duration::from_millis(50);

/// What a finished (or unwound) turn reports back to the event loop.
#[derive(Debug)]
pub struct TurnOutcome {
    pub turn_id: u64,
    /// Assistant text actually handed to TTS, in push order.
    pub assistant_text: String,
    /// Whether any synthesized audio reached the outbound track.
    pub audio_produced: bool,
    /// True when the response ran to completion and drained.
    pub completed: bool,
    /// Chunks retrieved for the turn (for the turn record).
    pub retrieved: usize,
}

enum PumpEnd {
    Drained,
    Cancelled,
    FirstChunkTimeout,
    Backpressure,
}

struct PumpResult {
    end: PumpEnd,
    /// Chunks that reached the outbound track before the pump stopped.
    chunks_enqueued: u64,
}

/// Per-session chat engine. Cheap to clone pieces are shared by Arc.
pub struct ChatEngine {
    agent: AgentConfig,
    providers: ResolvedProviders,
    retrieval: Option<Arc<RetrievalEngine>>,
    settings: Settings,
    control: ControlChannel,
    outbound: Arc<OutboundTrack>,
    metrics: Arc<SessionMetrics>,
}

impl ChatEngine {
    pub fn new(
        agent: AgentConfig,
        providers: ResolvedProviders,
        retrieval: Option<Arc<RetrievalEngine>>,
        settings: Settings,
        control: ControlChannel,
        outbound: Arc<OutboundTrack>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            agent,
            providers,
            retrieval,
            settings,
            control,
            outbound,
            metrics,
        }
    }

    /// Run one turn. Returns what should be committed to history.
    pub async fn run_turn(
        &self,
        turn_id: u64,
        user_text: &str,
        history: Vec<(Role, String)>,
        speech_end_at: Instant,
        cancel: CancelSignal,
        event_tx: mpsc::Sender<LoopEvent>,
    ) -> TurnOutcome {
        let mut outcome = TurnOutcome {
            turn_id,
            assistant_text: String::new(),
            audio_produced: false,
            completed: false,
            retrieved: 0,
        };

        // Retrieval under its hard budget; zero chunks on any failure.
        let chunks = self.retrieve(user_text).await;
        outcome.retrieved = chunks.len();
        let chunks = trim_to_token_budget(chunks, self.settings.retrieval.token_budget);

        let messages = build_messages(&self.agent.system_prompt, &chunks, &history, user_text);
        let params = GenerationParams {
            temperature: self.agent.llm.temperature,
            max_tokens: self.agent.llm.max_tokens,
        };

        let mut stream = match self
            .providers
            .llm
            .stream(&messages, &params, cancel.clone())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(turn_id, error = %e, "LLM request failed, degrading turn");
                self.degraded_response(&mut outcome, &cancel).await;
                return outcome;
            }
        };

        // First token within its deadline; barge-in can arrive while waiting.
        let first_token_deadline = Duration::from_millis(self.settings.llm.first_token_timeout_ms);
        let first_token = tokio::select! {
            token = tokio::time::timeout(first_token_deadline, stream.next()) => token,
            _ = cancel.cancelled() => return outcome,
        };

        let first_token = match first_token {
            Ok(Some(Ok(token))) => token,
            Ok(Some(Err(e))) => {
                tracing::warn!(turn_id, error = %e, "LLM stream failed before first token");
                self.degraded_response(&mut outcome, &cancel).await;
                return outcome;
            }
            Ok(None) => {
                tracing::warn!(turn_id, "LLM stream ended without tokens");
                return outcome;
            }
            Err(_) => {
                tracing::warn!(
                    turn_id,
                    timeout_ms = self.settings.llm.first_token_timeout_ms,
                    "LLM first token timed out"
                );
                metrics::counter!("llm_first_token_timeouts").increment(1);
                self.degraded_response(&mut outcome, &cancel).await;
                return outcome;
            }
        };

        let _ = event_tx
            .send(LoopEvent::FirstToken { turn_id })
            .await;

        // Synthesis stream opens at first token, not before.
        let mut tts = match TtsTurn::open(
            &self.providers.tts,
            &self.agent.tts.voice,
            &self.agent.tts.language,
        )
        .await
        {
            Ok(tts) => tts,
            Err(e) => {
                tracing::warn!(turn_id, error = %e, "TTS open failed, aborting turn");
                return outcome;
            }
        };
        let pcm_rx = tts.take_pcm();

        let pump = tokio::spawn(Self::pump_audio(
            pcm_rx,
            Arc::clone(&self.outbound),
            cancel.clone(),
            Arc::clone(&self.metrics),
            Duration::from_millis(self.settings.tts.first_chunk_timeout_ms),
            speech_end_at,
        ));

        let mut aggregator = TextAggregator::new(self.settings.tts.buffering_level);
        let total_deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.settings.llm.total_timeout_ms);
        let mut first_fragment = true;
        let mut cancelled = false;

        // Feed the first token, then the rest of the stream.
        let mut pending = Some(first_token);
        loop {
            let token = match pending.take() {
                Some(token) => Some(token),
                None => {
                    let next = tokio::select! {
                        next = tokio::time::timeout_at(total_deadline, stream.next()) => next,
                        _ = cancel.cancelled() => {
                            cancelled = true;
                            break;
                        }
                    };
                    match next {
                        Ok(Some(Ok(token))) => Some(token),
                        Ok(Some(Err(e))) => {
                            tracing::warn!(turn_id, error = %e, "LLM stream error mid-response");
                            None
                        }
                        Ok(None) => None,
                        Err(_) => {
                            tracing::warn!(turn_id, "LLM total deadline reached, truncating");
                            metrics::counter!("llm_total_timeouts").increment(1);
                            None
                        }
                    }
                }
            };

            let Some(token) = token else { break };
            self.metrics.incr_tokens();

            for fragment in aggregator.push(&token) {
                if !self
                    .emit_fragment(&mut tts, &mut outcome, fragment, &mut first_fragment)
                    .await
                {
                    cancelled = true;
                    break;
                }
            }
            if cancelled {
                break;
            }
        }

        if !cancelled && !cancel.is_set() {
            if let Some(rest) = aggregator.flush() {
                if !self
                    .emit_fragment(&mut tts, &mut outcome, rest, &mut first_fragment)
                    .await
                {
                    cancelled = true;
                }
            }
        }

        // End of input: let the synthesizer drain, then wait for the track.
        if cancelled || cancel.is_set() {
            tts.cancel();
            self.outbound.flush();
        } else {
            tts.close_when_drained();
        }

        let pump_result = pump.await.unwrap_or(PumpResult {
            end: PumpEnd::Cancelled,
            chunks_enqueued: 0,
        });
        outcome.audio_produced = pump_result.chunks_enqueued > 0;
        match pump_result.end {
            PumpEnd::Drained => {
                if !cancel.is_set() {
                    tokio::select! {
                        _ = self.outbound.drained() => {}
                        _ = cancel.cancelled() => cancelled = true,
                    }
                }
            }
            PumpEnd::Cancelled => cancelled = true,
            PumpEnd::FirstChunkTimeout => {
                tracing::warn!(turn_id, "TTS produced no audio within its deadline");
                metrics::counter!("tts_first_chunk_timeouts").increment(1);
                tts.cancel();
                cancelled = true;
            }
            PumpEnd::Backpressure => {
                // The pump already fired the cancel signal; report as an
                // interrupted turn with whatever audio made it out.
                self.control.publish(ControlEvent::BotResponseInterrupted {});
                cancelled = true;
            }
        }

        outcome.completed = !cancelled && !cancel.is_set() && !outcome.assistant_text.is_empty();
        if outcome.completed {
            self.control.publish(ControlEvent::AssistantResponse {
                text: outcome.assistant_text.clone(),
                is_complete: true,
                is_first_token: false,
            });
        }
        outcome
    }

    /// Speak a fixed line (greeting, fallback phrase). Returns whether any
    /// audio reached the outbound track.
    pub async fn speak_text(&self, text: &str, cancel: &CancelSignal) -> bool {
        let mut tts = match TtsTurn::open(
            &self.providers.tts,
            &self.agent.tts.voice,
            &self.agent.tts.language,
        )
        .await
        {
            Ok(tts) => tts,
            Err(e) => {
                tracing::warn!(error = %e, "TTS open failed for fixed line");
                return false;
            }
        };
        let pcm_rx = tts.take_pcm();

        if tts.push_text(text.to_string()).await.is_err() {
            return false;
        }
        tts.close_when_drained();

        let pump = tokio::spawn(Self::pump_audio(
            pcm_rx,
            Arc::clone(&self.outbound),
            cancel.clone(),
            Arc::clone(&self.metrics),
            Duration::from_millis(self.settings.tts.first_chunk_timeout_ms),
            Instant::now(),
        ));

        match pump.await {
            Ok(PumpResult {
                end: PumpEnd::Drained,
                chunks_enqueued,
            }) => {
                tokio::select! {
                    _ = self.outbound.drained() => {}
                    _ = cancel.cancelled() => {}
                }
                chunks_enqueued > 0
            }
            Ok(PumpResult {
                chunks_enqueued, ..
            }) => chunks_enqueued > 0,
            Err(_) => false,
        }
    }

    async fn emit_fragment(
        &self,
        tts: &mut TtsTurn,
        outcome: &mut TurnOutcome,
        fragment: String,
        first_fragment: &mut bool,
    ) -> bool {
        if tts.push_text(fragment.clone()).await.is_err() {
            return false;
        }
        outcome.assistant_text.push_str(&fragment);

        self.control.publish(ControlEvent::AssistantResponse {
            text: fragment,
            is_complete: false,
            is_first_token: *first_fragment,
        });
        *first_fragment = false;
        true
    }

    /// Retrieval with budget enforcement. Timeouts and failures degrade to
    /// zero chunks so the turn proceeds.
    async fn retrieve(&self, user_text: &str) -> Vec<voxbridge_core::RetrievedChunk> {
        let Some(engine) = &self.retrieval else {
            return Vec::new();
        };

        let budget = Duration::from_millis(self.settings.retrieval.budget_ms);
        let started = Instant::now();
        match tokio::time::timeout(budget, engine.retrieve(user_text)).await {
            Ok(Ok(chunks)) => {
                metrics::histogram!("retrieval_latency_ms")
                    .record(started.elapsed().as_millis() as f64);
                chunks
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "retrieval failed, proceeding without context");
                self.metrics.incr_retrieval_degraded();
                metrics::counter!("retrieval_degraded").increment(1);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(budget_ms = self.settings.retrieval.budget_ms, "retrieval budget exceeded, proceeding without context");
                self.metrics.incr_retrieval_degraded();
                metrics::counter!("retrieval_degraded").increment(1);
                Vec::new()
            }
        }
    }

    /// First-token failure path: speak the fallback phrase or abort per
    /// configuration.
    async fn degraded_response(&self, outcome: &mut TurnOutcome, cancel: &CancelSignal) {
        match self.agent.fallback {
            FallbackMode::Abort => {}
            FallbackMode::FallbackPhrase => {
                let phrase = self.agent.fallback_phrase.clone();
                if self.speak_text(&phrase, cancel).await {
                    outcome.assistant_text = phrase;
                    outcome.audio_produced = true;
                    outcome.completed = true;
                }
            }
        }
    }

    /// Move PCM chunks from the synthesis stream into the outbound track,
    /// pausing when the track backs up past the high-water mark.
    async fn pump_audio(
        mut pcm_rx: mpsc::Receiver<PcmChunk>,
        outbound: Arc<OutboundTrack>,
        cancel: CancelSignal,
        session_metrics: Arc<SessionMetrics>,
        first_chunk_timeout: Duration,
        speech_end_at: Instant,
    ) -> PumpResult {
        let mut chunks_enqueued = 0u64;

        // First chunk carries the latency figures.
        let first = tokio::select! {
            first = tokio::time::timeout(first_chunk_timeout, pcm_rx.recv()) => first,
            _ = cancel.cancelled() => return PumpResult { end: PumpEnd::Cancelled, chunks_enqueued: 0 },
        };
        let first = match first {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return PumpResult { end: PumpEnd::Cancelled, chunks_enqueued: 0 },
            Err(_) => return PumpResult { end: PumpEnd::FirstChunkTimeout, chunks_enqueued: 0 },
        };

        let latency = speech_end_at.elapsed();
        session_metrics.record_first_chunk_latency(latency.as_millis() as u64);
        session_metrics.record_playback_start_latency(latency.as_millis() as u64);
        metrics::histogram!("first_chunk_latency_ms").record(latency.as_millis() as f64);

        let mut chunk = Some(first);
        loop {
            let Some(current) = chunk.take() else { break };

            // Backpressure: pause the feed while the track holds more than
            // the high-water mark; a pause past the limit ends the turn as
            // if interrupted.
            let mut paused = Duration::ZERO;
            while outbound.queued() >= OUTBOUND_HIGH_WATER {
                if cancel.is_set() {
                    return PumpResult {
                        end: PumpEnd::Cancelled,
                        chunks_enqueued,
                    };
                }
                if paused >= BACKPRESSURE_LIMIT {
                    tracing::warn!("outbound backpressure exceeded limit, interrupting turn");
                    cancel.set();
                    outbound.flush();
                    return PumpResult {
                        end: PumpEnd::Backpressure,
                        chunks_enqueued,
                    };
                }
                tokio::time::sleep(BACKPRESSURE_POLL).await;
                paused += BACKPRESSURE_POLL;
            }

            session_metrics.incr_audio_chunks();
            if outbound.enqueue(current).await.is_err() {
                return PumpResult {
                    end: PumpEnd::Cancelled,
                    chunks_enqueued,
                };
            }
            chunks_enqueued += 1;

            chunk = tokio::select! {
                chunk = pcm_rx.recv() => chunk,
                _ = cancel.cancelled() => return PumpResult {
                    end: PumpEnd::Cancelled,
                    chunks_enqueued,
                },
            };
        }
        PumpResult {
            end: PumpEnd::Drained,
            chunks_enqueued,
        }
    }
}
