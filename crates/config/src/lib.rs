//! Operator configuration
//!
//! Layered loading: `config/default.yaml`, then `config/{env}.yaml`, then
//! `VOXBRIDGE__`-prefixed environment variables, then the flat operator keys
//! (`VAD_THRESHOLD_ON`, `STT_FINAL_TIMEOUT_MS`, ...) as final overrides.

mod settings;

pub use settings::{
    load_settings, BufferingLevel, HistorySettings, LlmSettings, ObservabilityConfig,
    RetrievalSettings, ServerConfig, SessionSettings, Settings, SttSettings, TtsSettings,
    VadSettings,
};

use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
