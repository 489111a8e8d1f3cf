//! Shared application state

use std::collections::HashMap;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;

use voxbridge_config::Settings;
use voxbridge_core::AgentConfig;
use voxbridge_session::SessionManager;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionManager>,
    /// Agent configuration registered per room ahead of the participant
    /// joining. Rooms without one use the default agent.
    pub room_agents: Arc<RwLock<HashMap<String, AgentConfig>>>,
    /// Default agent for rooms with no registered configuration.
    pub default_agent: Arc<AgentConfig>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        sessions: Arc<SessionManager>,
        default_agent: AgentConfig,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            sessions,
            room_agents: Arc::new(RwLock::new(HashMap::new())),
            default_agent: Arc::new(default_agent),
            metrics_handle,
        }
    }

    /// Agent configuration the next participant in this room gets.
    pub fn agent_for_room(&self, room_id: &str) -> AgentConfig {
        self.room_agents
            .read()
            .get(room_id)
            .cloned()
            .unwrap_or_else(|| (*self.default_agent).clone())
    }
}
