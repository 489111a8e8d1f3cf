//! Session manager
//!
//! Process-wide map from room to live session. Enforces one session per
//! room, resolves agent configuration against the provider registry at
//! create time, and sweeps idle sessions in the background.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};

use voxbridge_config::Settings;
use voxbridge_core::{
    AgentConfig, ControlEvent, ProviderError, ProviderRegistry, SessionState,
};
use voxbridge_media::OutboundSink;
use voxbridge_pipeline::VadModelHandle;
use voxbridge_rag::{RetrievalConfig, RetrievalEngine, SparseIndex};

use crate::session::{Session, SessionParams};
use crate::SessionError;

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    rooms: RwLock<HashMap<String, String>>,
    registry: Arc<ProviderRegistry>,
    settings: Settings,
    vad_model: Arc<VadModelHandle>,
    lexical_index: Option<Arc<SparseIndex>>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        settings: Settings,
        vad_model: Arc<VadModelHandle>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            registry,
            settings,
            vad_model,
            lexical_index: None,
        }
    }

    /// Share a lexical index with every session's retrieval engine.
    pub fn with_lexical_index(mut self, index: Arc<SparseIndex>) -> Self {
        self.lexical_index = Some(index);
        self
    }

    /// Create a session bound to a room.
    ///
    /// Fails with `AlreadyExists` when the room has a live session and with
    /// `ConfigInvalid` when the agent configuration does not resolve to a
    /// full STT/LLM/TTS triple.
    pub fn create(
        &self,
        room_id: &str,
        agent: AgentConfig,
        sink: Box<dyn OutboundSink>,
        transport_rate: u32,
    ) -> Result<(Arc<Session>, mpsc::Receiver<ControlEvent>), SessionError> {
        {
            let rooms = self.rooms.read();
            if let Some(existing) = rooms.get(room_id) {
                let live = self
                    .sessions
                    .read()
                    .get(existing)
                    .map(|s| s.state() != SessionState::Closed)
                    .unwrap_or(false);
                if live {
                    return Err(SessionError::AlreadyExists {
                        room_id: room_id.to_string(),
                    });
                }
            }
        }

        if self.sessions.read().len() >= self.settings.server.max_sessions {
            return Err(SessionError::Capacity);
        }

        let providers = self.registry.resolve(&agent).map_err(|e| match e {
            ProviderError::Config(message) => SessionError::ConfigInvalid(message),
            other => SessionError::ConfigInvalid(other.to_string()),
        })?;

        let retrieval = providers.retrieval.as_ref().map(|(vector, embedder)| {
            let binding = agent.rag.as_ref();
            let config = RetrievalConfig {
                top_k: binding.map(|b| b.top_k).unwrap_or(self.settings.retrieval.top_k),
                dense_candidates: binding
                    .map(|b| b.dense_candidates)
                    .unwrap_or(self.settings.retrieval.dense_candidates),
                lexical_candidates: binding
                    .map(|b| b.lexical_candidates)
                    .unwrap_or(self.settings.retrieval.lexical_candidates),
                ultra_low_latency: binding.map(|b| b.ultra_low_latency).unwrap_or(false),
            };
            let mut engine =
                RetrievalEngine::new(Arc::clone(vector), Arc::clone(embedder), config);
            if let Some(index) = &self.lexical_index {
                engine = engine.with_lexical_index(Arc::clone(index));
            }
            Arc::new(engine)
        });

        let id = uuid::Uuid::new_v4().to_string();
        let (session, control_rx) = Session::start(SessionParams {
            id: id.clone(),
            room_id: room_id.to_string(),
            agent,
            providers,
            settings: self.settings.clone(),
            vad_engine: self.vad_model.new_engine(),
            retrieval,
            sink,
            transport_rate,
        });

        self.sessions.write().insert(id.clone(), Arc::clone(&session));
        self.rooms.write().insert(room_id.to_string(), id.clone());

        tracing::info!(session_id = %id, room_id, "created session");
        metrics::gauge!("live_sessions").set(self.sessions.read().len() as f64);

        Ok((session, control_rx))
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn get_by_room(&self, room_id: &str) -> Option<Arc<Session>> {
        let id = self.rooms.read().get(room_id).cloned()?;
        self.get(&id)
    }

    /// Destroy a session. Idempotent: unknown ids and repeated calls are
    /// no-ops. Closing is best-effort; the session bounds its own drain.
    pub async fn destroy(&self, session_id: &str) {
        let session = {
            let mut sessions = self.sessions.write();
            let session = sessions.remove(session_id);
            if let Some(ref s) = session {
                self.rooms.write().remove(&s.room_id);
            }
            session
        };

        if let Some(session) = session {
            session.stop();
            session.wait_closed().await;
            tracing::info!(session_id, "destroyed session");
        }
        metrics::gauge!("live_sessions").set(self.sessions.read().len() as f64);
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Stop every session and wait up to `timeout` for the drains.
    pub async fn shutdown_all(&self, timeout: Duration) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.write();
            self.rooms.write().clear();
            map.drain().map(|(_, s)| s).collect()
        };
        if sessions.is_empty() {
            return;
        }

        tracing::info!(count = sessions.len(), "shutting down all sessions");
        for session in &sessions {
            session.stop();
        }

        let drain = async {
            for session in &sessions {
                session.wait_closed().await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            tracing::warn!("session drain exceeded shutdown timeout");
        }
    }

    /// Periodically destroy sessions whose transport went quiet. Returns a
    /// sender that stops the sweeper.
    pub fn start_idle_sweeper(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let idle_timeout = Duration::from_secs(manager.settings.session.idle_timeout_s);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(idle_timeout / 2);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let idle: Vec<String> = manager
                            .sessions
                            .read()
                            .iter()
                            .filter(|(_, s)| s.idle_for() > idle_timeout)
                            .map(|(id, _)| id.clone())
                            .collect();
                        for id in idle {
                            tracing::info!(session_id = %id, "destroying idle session");
                            manager.destroy(&id).await;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}
