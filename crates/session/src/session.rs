//! Per-session event loop and pipeline workers
//!
//! One session owns four cooperating tasks wired by bounded channels:
//! an inbound router (conditioning, VAD gate, STT routing), a per-turn STT
//! forwarder, the chat+TTS driver, and the outbound writer inside the
//! track. The event loop is the single source of truth for session state
//! and the only mutator of conversation history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use voxbridge_config::Settings;
use voxbridge_core::{
    AgentConfig, AudioFrame, CancelSignal, ControlEvent, ConversationHistory, HistoryLimits,
    ResolvedProviders, SessionMetrics, SessionState, TranscriptFragment, VadEvent,
};
use voxbridge_media::{ControlChannel, InboundConditioner, OutboundSink, OutboundTrack};
use voxbridge_pipeline::{GateConfig, PushOutcome, SttStream, VadEngine, VadGate};
use voxbridge_rag::RetrievalEngine;

use crate::chat::{ChatEngine, TurnOutcome};

/// Inbound frame queue: 50 x 32 ms = 1.6 s.
const INBOUND_CAPACITY: usize = 50;
const LOOP_EVENT_CAPACITY: usize = 64;

/// Internal events feeding the state machine.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    SpeechStart { turn_id: u64, timestamp_ns: u64 },
    SpeechEnd { timestamp_ns: u64 },
    SttFinal { turn_id: u64, fragment: TranscriptFragment },
    FirstToken { turn_id: u64 },
    TurnFinished(TurnOutcome),
}

/// Everything needed to bring a session up.
pub struct SessionParams {
    pub id: String,
    pub room_id: String,
    pub agent: AgentConfig,
    pub providers: ResolvedProviders,
    pub settings: Settings,
    pub vad_engine: Box<dyn VadEngine>,
    pub retrieval: Option<Arc<RetrievalEngine>>,
    pub sink: Box<dyn OutboundSink>,
    pub transport_rate: u32,
}

/// Handle to a live session.
pub struct Session {
    pub id: String,
    pub room_id: String,
    inbound_tx: mpsc::Sender<AudioFrame>,
    state_rx: watch::Receiver<SessionState>,
    stop: CancelSignal,
    metrics: Arc<SessionMetrics>,
    last_activity: Arc<Mutex<Instant>>,
    started: Instant,
}

impl Session {
    /// Create the session and spawn its task group. Returns the handle and
    /// the control sidechannel receiver for the transport binding.
    pub fn start(params: SessionParams) -> (Arc<Self>, mpsc::Receiver<ControlEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(LOOP_EVENT_CAPACITY);
        let (control, control_rx) = ControlChannel::new();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let metrics = SessionMetrics::new();
        let stop = CancelSignal::new();
        let shutdown = CancelSignal::new();
        let cancel = CancelSignal::new();
        let started = Instant::now();
        let last_activity = Arc::new(Mutex::new(Instant::now()));

        let outbound = Arc::new(OutboundTrack::start(params.sink, params.transport_rate));

        let chat = Arc::new(ChatEngine::new(
            params.agent.clone(),
            params.providers.clone(),
            params.retrieval.clone(),
            params.settings.clone(),
            control.clone(),
            Arc::clone(&outbound),
            Arc::clone(&metrics),
        ));

        let gate = VadGate::new(
            params.vad_engine,
            GateConfig::from_settings(&params.settings.vad),
        );
        let stt = SttStream::new(
            Arc::clone(&params.providers.stt),
            voxbridge_core::CANONICAL_SAMPLE_RATE,
            &params.agent.stt.language,
        );

        let router = Router {
            inbound_rx,
            conditioner: InboundConditioner::new(Arc::clone(&metrics)),
            gate,
            stt,
            event_tx: event_tx.clone(),
            control: control.clone(),
            shutdown: shutdown.clone(),
            started,
            last_activity: Arc::clone(&last_activity),
            turn_counter: 0,
        };
        tokio::spawn(router.run());

        let mut history = ConversationHistory::new(HistoryLimits {
            max_turns: params.settings.history.max_turns,
            max_tokens: params.settings.history.max_tokens,
        });
        history.set_system(&params.agent.system_prompt);

        let event_loop = EventLoop {
            session_id: params.id.clone(),
            settings: params.settings,
            greeting: params.agent.greeting.clone(),
            history,
            chat,
            cancel,
            shutdown,
            stop: stop.clone(),
            control,
            outbound,
            metrics: Arc::clone(&metrics),
            event_rx,
            event_tx,
            state_tx,
            state: SessionState::Idle,
            capture: None,
            driver: None,
            driver_turn: None,
            pending_final: None,
            closing: false,
        };
        tokio::spawn(event_loop.run());

        let session = Arc::new(Self {
            id: params.id,
            room_id: params.room_id,
            inbound_tx,
            state_rx,
            stop,
            metrics,
            last_activity,
            started,
        });
        (session, control_rx)
    }

    /// Sender the transport binding feeds participant audio into.
    pub fn inbound(&self) -> mpsc::Sender<AudioFrame> {
        self.inbound_tx.clone()
    }

    /// Session-monotonic clock, nanoseconds since start.
    pub fn now_ns(&self) -> u64 {
        self.started.elapsed().as_nanos() as u64
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state transitions.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    /// Time since the transport last delivered audio.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Begin cooperative shutdown. Idempotent.
    pub fn stop(&self) {
        self.stop.set();
    }

    /// Wait until the session reaches CLOSED.
    pub async fn wait_closed(&self) {
        let mut state_rx = self.state_rx.clone();
        loop {
            if *state_rx.borrow() == SessionState::Closed {
                return;
            }
            if state_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Inbound worker: conditions transport frames, runs the VAD gate, routes
/// gated audio into STT, and reports gate events to the loop.
struct Router {
    inbound_rx: mpsc::Receiver<AudioFrame>,
    conditioner: InboundConditioner,
    gate: VadGate,
    stt: SttStream,
    event_tx: mpsc::Sender<LoopEvent>,
    control: ControlChannel,
    shutdown: CancelSignal,
    started: Instant,
    last_activity: Arc<Mutex<Instant>>,
    turn_counter: u64,
}

impl Router {
    async fn run(mut self) {
        loop {
            let frame = tokio::select! {
                frame = self.inbound_rx.recv() => frame,
                _ = self.shutdown.cancelled() => break,
            };
            let Some(frame) = frame else { break };

            *self.last_activity.lock() = Instant::now();
            let now_ns = self.started.elapsed().as_nanos() as u64;

            for canonical in self.conditioner.push(frame, now_ns) {
                if self.route_frame(canonical).await.is_err() {
                    // Event loop gone: session is tearing down
                    return;
                }
            }
        }
    }

    async fn route_frame(&mut self, frame: AudioFrame) -> Result<(), ()> {
        let output = match self.gate.push_frame(frame) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "VAD gate error, dropping frame");
                return Ok(());
            }
        };

        // Order matters: open the turn before the ring flush reaches STT,
        // close it only after the tail frames were pushed.
        let mut speech_end = None;
        for event in &output.events {
            match event {
                VadEvent::SpeechStart { timestamp_ns } => {
                    self.turn_counter += 1;
                    self.open_stt_turn().await;
                    self.event_tx
                        .send(LoopEvent::SpeechStart {
                            turn_id: self.turn_counter,
                            timestamp_ns: *timestamp_ns,
                        })
                        .await
                        .map_err(|_| ())?;
                }
                VadEvent::SpeechEnd { timestamp_ns } => speech_end = Some(*timestamp_ns),
                VadEvent::Probability { .. } => {}
            }
        }

        for gated in output.to_stt {
            if !self.stt.has_open_turn() {
                continue;
            }
            match self.stt.push_audio(gated).await {
                Ok(PushOutcome::Accepted) => {}
                Ok(PushOutcome::Reconnected(events_rx)) => {
                    spawn_stt_forwarder(
                        events_rx,
                        self.turn_counter,
                        self.event_tx.clone(),
                        self.control.clone(),
                    );
                }
                Ok(PushOutcome::Degraded) => {
                    self.event_tx
                        .send(LoopEvent::SttFinal {
                            turn_id: self.turn_counter,
                            fragment: TranscriptFragment::degraded_final(self.turn_counter),
                        })
                        .await
                        .map_err(|_| ())?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "STT push failed");
                }
            }
        }

        if let Some(timestamp_ns) = speech_end {
            self.stt.close_turn();
            self.event_tx
                .send(LoopEvent::SpeechEnd { timestamp_ns })
                .await
                .map_err(|_| ())?;
        }
        Ok(())
    }

    async fn open_stt_turn(&mut self) {
        match self.stt.open_turn().await {
            Ok(events_rx) => {
                spawn_stt_forwarder(
                    events_rx,
                    self.turn_counter,
                    self.event_tx.clone(),
                    self.control.clone(),
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "STT open failed, turn will degrade");
                let _ = self
                    .event_tx
                    .send(LoopEvent::SttFinal {
                        turn_id: self.turn_counter,
                        fragment: TranscriptFragment::degraded_final(self.turn_counter),
                    })
                    .await;
            }
        }
    }
}

/// Forward interim transcripts to the sidechannel; hand the final to the
/// loop. Interims are never persisted.
fn spawn_stt_forwarder(
    mut events_rx: mpsc::Receiver<voxbridge_core::SttEvent>,
    turn_id: u64,
    event_tx: mpsc::Sender<LoopEvent>,
    control: ControlChannel,
) {
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                voxbridge_core::SttEvent::Interim { text, .. } => {
                    control.publish(ControlEvent::TranscriptUpdate {
                        text,
                        is_final: false,
                    });
                }
                voxbridge_core::SttEvent::Final {
                    text,
                    confidence,
                    degraded,
                } => {
                    let mut fragment = TranscriptFragment::final_result(text, confidence, turn_id);
                    fragment.degraded = degraded;
                    let _ = event_tx
                        .send(LoopEvent::SttFinal { turn_id, fragment })
                        .await;
                    break;
                }
            }
        }
    });
}

/// STT-side turn tracking, independent of the assistant-side state.
struct CaptureState {
    turn_id: u64,
    speech_end_at: Option<Instant>,
    final_deadline: Option<tokio::time::Instant>,
}

struct EventLoop {
    session_id: String,
    settings: Settings,
    greeting: Option<String>,
    history: ConversationHistory,
    chat: Arc<ChatEngine>,
    /// Per-turn barge-in signal; reset after each drain.
    cancel: CancelSignal,
    /// Session-lifetime shutdown signal for the workers.
    shutdown: CancelSignal,
    /// External stop request.
    stop: CancelSignal,
    control: ControlChannel,
    outbound: Arc<OutboundTrack>,
    metrics: Arc<SessionMetrics>,
    event_rx: mpsc::Receiver<LoopEvent>,
    event_tx: mpsc::Sender<LoopEvent>,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,
    capture: Option<CaptureState>,
    driver: Option<JoinHandle<()>>,
    /// (turn_id, user_text) of the running driver; None for the greeting.
    driver_turn: Option<(u64, Option<String>)>,
    /// Final that arrived while an interrupted turn was still draining.
    pending_final: Option<(u64, String, Instant)>,
    closing: bool,
}

impl EventLoop {
    async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, "session started");
        self.set_state(SessionState::Listening);

        if let Some(greeting) = self.greeting.take() {
            self.spawn_greeting(greeting);
        }

        let close_grace = Duration::from_secs(self.settings.session.drain_timeout_s);
        let mut close_deadline: Option<tokio::time::Instant> = None;

        loop {
            let stt_deadline = self.capture.as_ref().and_then(|c| c.final_deadline);

            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                _ = self.stop.cancelled(), if !self.closing => {
                    self.begin_closing();
                    close_deadline = Some(tokio::time::Instant::now() + close_grace);
                }
                _ = tokio::time::sleep_until(stt_deadline.unwrap_or_else(far_future)), if stt_deadline.is_some() => {
                    self.handle_stt_timeout();
                }
                _ = tokio::time::sleep_until(close_deadline.unwrap_or_else(far_future)), if close_deadline.is_some() => {
                    tracing::warn!(session_id = %self.session_id, "drain grace expired, forcing close");
                    break;
                }
            }

            if self.closing && self.driver.is_none() {
                break;
            }
        }

        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.set_state(SessionState::Closed);
        tracing::info!(session_id = %self.session_id, "session closed");
    }

    async fn handle_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::SpeechStart {
                turn_id,
                timestamp_ns,
            } => self.on_speech_start(turn_id, timestamp_ns),
            LoopEvent::SpeechEnd { timestamp_ns } => self.on_speech_end(timestamp_ns),
            LoopEvent::SttFinal { turn_id, fragment } => self.on_stt_final(turn_id, fragment),
            LoopEvent::FirstToken { turn_id } => self.on_first_token(turn_id),
            LoopEvent::TurnFinished(outcome) => self.on_turn_finished(outcome),
        }
    }

    fn on_speech_start(&mut self, turn_id: u64, timestamp_ns: u64) {
        if self.closing {
            return;
        }
        self.publish(ControlEvent::SpeechStart { ts: timestamp_ns });

        if self.state.is_interruptible() && self.driver.is_some() {
            // Barge-in: cancel the in-flight response, drop queued audio,
            // tell the client, and keep capturing the new utterance.
            tracing::info!(
                session_id = %self.session_id,
                turn_id,
                state = %self.state,
                "barge-in detected"
            );
            self.cancel.set();
            self.outbound.flush();
            self.publish(ControlEvent::BotResponseInterrupted {});
            self.metrics.incr_barge_ins();
            metrics::counter!("barge_ins").increment(1);
            self.set_state(SessionState::Interrupted);
        } else {
            // Includes speech over a turn still waiting for its final
            // transcript: nothing is in flight yet, the old turn is simply
            // abandoned in favour of the new capture.
            self.set_state(SessionState::Capturing);
        }

        self.capture = Some(CaptureState {
            turn_id,
            speech_end_at: None,
            final_deadline: None,
        });
    }

    fn on_speech_end(&mut self, timestamp_ns: u64) {
        if self.closing {
            return;
        }
        self.publish(ControlEvent::SpeechEnd { ts: timestamp_ns });

        if let Some(capture) = self.capture.as_mut() {
            capture.speech_end_at = Some(Instant::now());
            capture.final_deadline = Some(
                tokio::time::Instant::now()
                    + Duration::from_millis(self.settings.stt.final_timeout_ms),
            );
        }
        if self.state == SessionState::Capturing {
            self.set_state(SessionState::Thinking);
        }
    }

    fn handle_stt_timeout(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        tracing::warn!(
            session_id = %self.session_id,
            turn_id = capture.turn_id,
            "no final transcript within deadline, dropping turn"
        );
        self.metrics.incr_stt_timeouts();
        metrics::counter!("stt_timeouts").increment(1);
        self.publish(ControlEvent::MetricsUpdate(self.metrics.snapshot()));

        if self.state == SessionState::Thinking {
            self.set_state(SessionState::Listening);
        }
    }

    fn on_stt_final(&mut self, turn_id: u64, fragment: TranscriptFragment) {
        let Some(capture) = self.capture.as_ref() else {
            tracing::debug!(turn_id, "final for an abandoned turn, ignoring");
            return;
        };
        if capture.turn_id != turn_id {
            tracing::warn!(
                session_id = %self.session_id,
                turn_id,
                expected = capture.turn_id,
                "final transcript for unexpected turn, aborting it"
            );
            return;
        }

        let speech_end_at = capture
            .speech_end_at
            .unwrap_or_else(Instant::now);
        self.capture = None;

        if fragment.is_empty() {
            tracing::debug!(session_id = %self.session_id, turn_id, degraded = fragment.degraded, "empty final transcript, dropping turn");
            if matches!(self.state, SessionState::Capturing | SessionState::Thinking) {
                self.set_state(SessionState::Listening);
            }
            return;
        }

        self.publish(ControlEvent::TranscriptUpdate {
            text: fragment.text.clone(),
            is_final: true,
        });

        if self.driver.is_some() {
            // Old turn still draining after a barge-in: run once it reports.
            self.pending_final = Some((turn_id, fragment.text, speech_end_at));
        } else {
            self.launch_turn(turn_id, fragment.text, speech_end_at);
        }
    }

    fn on_first_token(&mut self, turn_id: u64) {
        if self
            .driver_turn
            .as_ref()
            .is_some_and(|(id, _)| *id == turn_id)
            && self.state == SessionState::Thinking
        {
            self.set_state(SessionState::Speaking);
        }
    }

    fn on_turn_finished(&mut self, outcome: TurnOutcome) {
        self.driver = None;
        let Some((_, user_text)) = self.driver_turn.take() else {
            return;
        };

        // Commit: the user's final transcript plus whatever assistant text
        // was actually handed to TTS. Text cancelled before any audio was
        // produced is never recorded.
        if let Some(user_text) = user_text {
            let assistant_text = if outcome.completed || outcome.audio_produced {
                outcome.assistant_text.as_str()
            } else {
                ""
            };
            self.history.push_turn(&user_text, assistant_text);
            tracing::debug!(
                session_id = %self.session_id,
                turn_id = outcome.turn_id,
                completed = outcome.completed,
                assistant_chars = assistant_text.len(),
                "turn committed to history"
            );
        }

        self.publish(ControlEvent::MetricsUpdate(self.metrics.snapshot()));
        self.cancel.reset();

        if self.closing {
            return;
        }

        // After a drain the next state follows from whether the interrupting
        // utterance is still in flight.
        let next = match &self.capture {
            Some(capture) if capture.speech_end_at.is_some() => SessionState::Thinking,
            Some(_) => SessionState::Capturing,
            None => SessionState::Listening,
        };
        self.set_state(next);

        if let Some((turn_id, text, speech_end_at)) = self.pending_final.take() {
            self.launch_turn(turn_id, text, speech_end_at);
        }
    }

    fn launch_turn(&mut self, turn_id: u64, user_text: String, speech_end_at: Instant) {
        if self.closing {
            return;
        }
        self.set_state(SessionState::Thinking);

        let chat = Arc::clone(&self.chat);
        let history = self.history.messages();
        let cancel = self.cancel.clone();
        let event_tx = self.event_tx.clone();
        let text_for_driver = user_text.clone();

        self.driver_turn = Some((turn_id, Some(user_text)));
        self.driver = Some(tokio::spawn(async move {
            let outcome = chat
                .run_turn(
                    turn_id,
                    &text_for_driver,
                    history,
                    speech_end_at,
                    cancel,
                    event_tx.clone(),
                )
                .await;
            let _ = event_tx.send(LoopEvent::TurnFinished(outcome)).await;
        }));
    }

    fn spawn_greeting(&mut self, greeting: String) {
        self.set_state(SessionState::Speaking);
        let chat = Arc::clone(&self.chat);
        let cancel = self.cancel.clone();
        let event_tx = self.event_tx.clone();

        self.driver_turn = Some((0, None));
        self.driver = Some(tokio::spawn(async move {
            let produced = chat.speak_text(&greeting, &cancel).await;
            let _ = event_tx
                .send(LoopEvent::TurnFinished(TurnOutcome {
                    turn_id: 0,
                    assistant_text: greeting,
                    audio_produced: produced,
                    completed: produced,
                    retrieved: 0,
                }))
                .await;
        }));
    }

    fn begin_closing(&mut self) {
        tracing::info!(session_id = %self.session_id, "session closing");
        self.closing = true;
        self.set_state(SessionState::Closing);
        self.control.mute();
        self.cancel.set();
        self.shutdown.set();
        self.outbound.flush();
        self.capture = None;
        self.pending_final = None;
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(
                session_id = %self.session_id,
                from = %self.state,
                to = %state,
                "state transition"
            );
            self.state = state;
            let _ = self.state_tx.send(state);
        }
    }

    fn publish(&self, event: ControlEvent) {
        if !self.closing {
            self.control.publish(event);
        }
    }
}

fn far_future() -> tokio::time::Instant {
    tokio::time::Instant::now() + Duration::from_secs(86_400)
}
