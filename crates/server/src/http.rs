//! REST surface and router assembly

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use voxbridge_core::AgentConfig;

use crate::state::AppState;
use crate::ws;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/rooms/:room_id/agent", post(register_agent))
        .route("/rooms/:room_id/ws", get(ws::room_socket))
        .route("/sessions", get(list_sessions))
        .route(
            "/sessions/:session_id",
            get(session_info).delete(destroy_session),
        )
        .layer(TraceLayer::new_for_http());

    if state.settings.server.cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// Register the agent configuration the next participant in a room gets.
async fn register_agent(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(agent): Json<AgentConfig>,
) -> impl IntoResponse {
    state.room_agents.write().insert(room_id.clone(), agent);
    tracing::info!(room_id, "registered agent configuration");
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
struct SessionInfo {
    id: String,
    room_id: String,
    state: voxbridge_core::SessionState,
    metrics: voxbridge_core::MetricsSnapshot,
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.list())
}

async fn session_info(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.get(&session_id) {
        Some(session) => Json(SessionInfo {
            id: session.id.clone(),
            room_id: session.room_id.clone(),
            state: session.state(),
            metrics: session.metrics().snapshot(),
        })
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Destroy a session. Idempotent: unknown ids return 204 as well.
async fn destroy_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    state.sessions.destroy(&session_id).await;
    StatusCode::NO_CONTENT
}
