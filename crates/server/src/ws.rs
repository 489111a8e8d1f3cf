//! Room websocket: the real-time media binding
//!
//! Joining the socket is the "participant joined" event: the session is
//! created with the socket as its outbound track. Binary frames carry PCM16
//! audio both ways; text frames carry control events (server to client) and
//! a tiny command vocabulary (client to server). Socket close destroys the
//! session.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use async_trait::async_trait;
use voxbridge_core::{AudioFrame, ControlEvent};
use voxbridge_media::{MediaError, OutboundSink};
use voxbridge_session::Session;

use crate::state::AppState;

const AUDIO_OUT_CAPACITY: usize = 128;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Transport sample rate for both directions.
    #[serde(default = "default_rate")]
    pub rate: u32,
}

fn default_rate() -> u32 {
    16_000
}

/// Commands a client may send as text frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    EndSession,
}

/// Outbound sink writing synthesized audio to the socket writer task.
struct WsSink {
    audio_tx: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl OutboundSink for WsSink {
    async fn write(&mut self, frame: AudioFrame) -> Result<(), MediaError> {
        self.audio_tx
            .send(frame.payload.to_vec())
            .await
            .map_err(|_| MediaError::TrackClosed)
    }
}

/// Handle the websocket upgrade for a room.
pub async fn room_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<WsParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, params.rate))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, room_id: String, rate: u32) {
    let agent = state.agent_for_room(&room_id);
    let (audio_tx, audio_rx) = mpsc::channel(AUDIO_OUT_CAPACITY);

    let created = state
        .sessions
        .create(&room_id, agent, Box::new(WsSink { audio_tx }), rate);
    let (session, control_rx) = match created {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(room_id, error = %e, "rejecting room join");
            let payload = serde_json::json!({ "type": "error", "message": e.to_string() });
            let _ = socket
                .send(Message::Text(payload.to_string()))
                .await;
            let _ = socket.close().await;
            return;
        }
    };

    tracing::info!(room_id, session_id = %session.id, "participant joined");
    run_socket(socket, &session, control_rx, audio_rx, rate).await;

    // Socket gone: the participant left the room
    state.sessions.destroy(&session.id).await;
    tracing::info!(room_id, session_id = %session.id, "participant left");
}

async fn run_socket(
    socket: WebSocket,
    session: &Session,
    mut control_rx: mpsc::Receiver<ControlEvent>,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    rate: u32,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: control events as JSON text, synthesized audio as binary.
    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                event = control_rx.recv() => match event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            tracing::warn!(error = %e, "control event encode failed");
                            continue;
                        }
                    },
                    None => break,
                },
                payload = audio_rx.recv() => match payload {
                    Some(payload) => Message::Binary(payload),
                    None => break,
                },
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Reader: participant audio and commands.
    let inbound = session.inbound();
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Binary(payload)) => {
                let frame = AudioFrame::new(payload, rate, 1, session.now_ns());
                if inbound.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::EndSession) => break,
                Err(_) => tracing::debug!("ignoring unknown client message"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    writer.abort();
}
