//! Server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use voxbridge_config::{load_settings, Settings};
use voxbridge_core::{
    AgentConfig, FallbackMode, LlmBinding, ProviderRegistry, SttBinding, TtsBinding,
};
use voxbridge_llm::{OllamaBackend, OllamaConfig, SimLlm};
use voxbridge_pipeline::sim::{SimStt, SimTts};
use voxbridge_pipeline::VadModelHandle;
use voxbridge_rag::{HashEmbedder, QdrantStore, QdrantStoreConfig};
use voxbridge_server::{create_router, init_metrics, AppState};
use voxbridge_session::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("VOXBRIDGE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("warning: failed to load config: {e}, using defaults");
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!("starting voxbridge server v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = if settings.observability.metrics_enabled {
        init_metrics()
    } else {
        None
    };

    let registry = Arc::new(build_registry());
    let vad_model = Arc::new(VadModelHandle::load(&settings.vad));

    let manager = Arc::new(SessionManager::new(
        Arc::clone(&registry),
        settings.clone(),
        vad_model,
    ));
    let sweeper = manager.start_idle_sweeper();

    let state = AppState::new(
        settings.clone(),
        Arc::clone(&manager),
        default_agent(),
        metrics_handle,
    );
    let router = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain every live session before exit
    let _ = sweeper.send(true);
    manager
        .shutdown_all(Duration::from_secs(settings.session.drain_timeout_s))
        .await;
    tracing::info!("shutdown complete");

    Ok(())
}

fn init_tracing(settings: &Settings) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.observability.log_level.clone()));

    if settings.observability.log_json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

/// Build the process-wide provider registry.
///
/// Simulated adapters are always registered so a model-free deployment can
/// exercise the full pipeline. Real adapters register alongside them.
fn build_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    registry.register_stt("sim", Arc::new(SimStt::new()));
    registry.register_tts("sim", Arc::new(SimTts::new()));
    registry.register_llm("sim", Arc::new(SimLlm::new()));
    registry.register_embedding("hash", Arc::new(HashEmbedder::new()));

    match OllamaBackend::new(OllamaConfig::default()) {
        Ok(backend) => registry.register_llm("ollama", Arc::new(backend)),
        Err(e) => tracing::warn!(error = %e, "ollama backend unavailable"),
    }

    if let Ok(endpoint) = std::env::var("QDRANT_ENDPOINT") {
        let config = QdrantStoreConfig {
            endpoint,
            collection: std::env::var("QDRANT_COLLECTION")
                .unwrap_or_else(|_| "knowledge".to_string()),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
        };
        match QdrantStore::connect(config) {
            Ok(store) => registry.register_vector_store("qdrant", Arc::new(store)),
            Err(e) => tracing::warn!(error = %e, "qdrant store unavailable"),
        }
    }

    registry
}

/// Agent used for rooms with no registered configuration.
fn default_agent() -> AgentConfig {
    AgentConfig {
        system_prompt: "You are a helpful voice assistant. Respond concisely and naturally; \
            keep responses brief as they will be spoken aloud."
            .to_string(),
        llm: LlmBinding {
            provider: "ollama".to_string(),
            temperature: 0.7,
            max_tokens: 256,
        },
        stt: SttBinding {
            provider: "sim".to_string(),
            language: "en".to_string(),
        },
        tts: TtsBinding {
            provider: "sim".to_string(),
            voice: "default".to_string(),
            language: "en".to_string(),
        },
        rag: None,
        fallback: FallbackMode::FallbackPhrase,
        greeting: None,
        fallback_phrase: "One moment, please.".to_string(),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
