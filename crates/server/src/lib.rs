//! HTTP/WS surface binding real-time rooms to sessions
//!
//! A participant joining a room is a websocket connection: binary frames
//! carry participant audio in, synthesized audio out; text frames carry the
//! control sidechannel as JSON. Room/agent administration happens over a
//! small REST surface.

pub mod http;
pub mod state;
pub mod ws;

pub use http::create_router;
pub use state::AppState;

use metrics_exporter_prometheus::PrometheusHandle;

/// Install the Prometheus recorder. Called once at process start.
pub fn init_metrics() -> Option<PrometheusHandle> {
    match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "failed to install metrics recorder");
            None
        }
    }
}
