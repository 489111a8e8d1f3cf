//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub vad: VadSettings,

    #[serde(default)]
    pub stt: SttSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub tts: TtsSettings,

    #[serde(default)]
    pub retrieval: RetrievalSettings,

    #[serde(default)]
    pub history: HistorySettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings. Called once at startup; invalid configuration
    /// stops the process before any session exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_vad()?;
        self.validate_timeouts()?;
        self.validate_retrieval()?;
        self.validate_server()?;
        Ok(())
    }

    fn validate_vad(&self) -> Result<(), ConfigError> {
        let vad = &self.vad;

        for (field, value) in [
            ("vad.threshold_on", vad.threshold_on),
            ("vad.threshold_off", vad.threshold_off),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must be between 0.0 and 1.0, got {value}"),
                });
            }
        }

        if vad.threshold_off >= vad.threshold_on {
            return Err(ConfigError::InvalidValue {
                field: "vad.threshold_off".to_string(),
                message: format!(
                    "hysteresis requires threshold_off ({}) < threshold_on ({})",
                    vad.threshold_off, vad.threshold_on
                ),
            });
        }

        if vad.min_speech_ms == 0 || vad.min_silence_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.min_speech_ms".to_string(),
                message: "speech/silence confirmation windows must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    fn validate_timeouts(&self) -> Result<(), ConfigError> {
        let checks = [
            ("stt.final_timeout_ms", self.stt.final_timeout_ms),
            ("llm.first_token_timeout_ms", self.llm.first_token_timeout_ms),
            ("llm.total_timeout_ms", self.llm.total_timeout_ms),
            ("tts.first_chunk_timeout_ms", self.tts.first_chunk_timeout_ms),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "timeout must be non-zero".to_string(),
                });
            }
        }

        if self.llm.total_timeout_ms < self.llm.first_token_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "llm.total_timeout_ms".to_string(),
                message: "total timeout cannot be shorter than first-token timeout".to_string(),
            });
        }

        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.top_k".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.retrieval.top_k > self.retrieval.dense_candidates {
            tracing::warn!(
                "retrieval.top_k ({}) exceeds dense_candidates ({}), results will be limited by retrieval",
                self.retrieval.top_k,
                self.retrieval.dense_candidates
            );
        }

        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }

        if self.server.max_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_sessions".to_string(),
                message: "must allow at least one session".to_string(),
            });
        }

        Ok(())
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_sessions() -> usize {
    200
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// VAD gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    /// Probability at or above which a frame counts toward speech onset.
    #[serde(default = "default_threshold_on")]
    pub threshold_on: f32,

    /// Probability below which a frame counts toward speech offset.
    #[serde(default = "default_threshold_off")]
    pub threshold_off: f32,

    /// On-frames required before CAPTURING is entered.
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,

    /// Off-frames required before CAPTURING is exited.
    #[serde(default = "default_min_silence_ms")]
    pub min_silence_ms: u64,

    /// Length of the pre-speech ring buffer.
    #[serde(default = "default_pre_roll_ms")]
    pub pre_roll_ms: u64,

    /// Path to the Silero ONNX model. Energy fallback when missing.
    #[serde(default = "default_vad_model_path")]
    pub model_path: String,
}

fn default_threshold_on() -> f32 {
    0.5
}
fn default_threshold_off() -> f32 {
    0.35
}
fn default_min_speech_ms() -> u64 {
    100
}
fn default_min_silence_ms() -> u64 {
    500
}
fn default_pre_roll_ms() -> u64 {
    500
}
fn default_vad_model_path() -> String {
    "models/vad/silero_vad.onnx".to_string()
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold_on: default_threshold_on(),
            threshold_off: default_threshold_off(),
            min_speech_ms: default_min_speech_ms(),
            min_silence_ms: default_min_silence_ms(),
            pre_roll_ms: default_pre_roll_ms(),
            model_path: default_vad_model_path(),
        }
    }
}

/// STT stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSettings {
    /// How long to wait for a final transcript after speech_end.
    #[serde(default = "default_stt_final_timeout_ms")]
    pub final_timeout_ms: u64,
}

fn default_stt_final_timeout_ms() -> u64 {
    2000
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            final_timeout_ms: default_stt_final_timeout_ms(),
        }
    }
}

/// LLM stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_first_token_timeout_ms")]
    pub first_token_timeout_ms: u64,

    #[serde(default = "default_llm_total_timeout_ms")]
    pub total_timeout_ms: u64,
}

fn default_llm_first_token_timeout_ms() -> u64 {
    2500
}
fn default_llm_total_timeout_ms() -> u64 {
    20_000
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            first_token_timeout_ms: default_llm_first_token_timeout_ms(),
            total_timeout_ms: default_llm_total_timeout_ms(),
        }
    }
}

/// Pre-TTS text buffering level.
///
/// Lower levels minimise time-to-first-audio; higher levels give the
/// synthesizer full clauses and better prosody.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum BufferingLevel {
    /// Every token forwarded immediately.
    None,
    /// Flush on whitespace (word boundary).
    Low,
    /// Flush on 4 accumulated words or clause punctuation.
    #[default]
    Medium,
    /// Flush on clause punctuation only.
    High,
}

impl std::str::FromStr for BufferingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(BufferingLevel::None),
            "LOW" => Ok(BufferingLevel::Low),
            "MEDIUM" => Ok(BufferingLevel::Medium),
            "HIGH" => Ok(BufferingLevel::High),
            other => Err(format!("unknown buffering level: {other}")),
        }
    }
}

/// TTS stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    #[serde(default = "default_tts_first_chunk_timeout_ms")]
    pub first_chunk_timeout_ms: u64,

    #[serde(default)]
    pub buffering_level: BufferingLevel,
}

fn default_tts_first_chunk_timeout_ms() -> u64 {
    1500
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            first_chunk_timeout_ms: default_tts_first_chunk_timeout_ms(),
            buffering_level: BufferingLevel::default(),
        }
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Hard time budget; retrieval past it is abandoned.
    #[serde(default = "default_retrieval_budget_ms")]
    pub budget_ms: u64,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_candidates")]
    pub dense_candidates: usize,

    #[serde(default = "default_candidates")]
    pub lexical_candidates: usize,

    /// Token budget for the retrieval block in the prompt.
    #[serde(default = "default_retrieval_token_budget")]
    pub token_budget: usize,
}

fn default_retrieval_budget_ms() -> u64 {
    400
}
fn default_top_k() -> usize {
    5
}
fn default_candidates() -> usize {
    24
}
fn default_retrieval_token_budget() -> usize {
    2048
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            budget_ms: default_retrieval_budget_ms(),
            top_k: default_top_k(),
            dense_candidates: default_candidates(),
            lexical_candidates: default_candidates(),
            token_budget: default_retrieval_token_budget(),
        }
    }
}

/// Conversation history bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default = "default_history_max_turns")]
    pub max_turns: usize,

    #[serde(default = "default_history_max_tokens")]
    pub max_tokens: usize,
}

fn default_history_max_turns() -> usize {
    16
}
fn default_history_max_tokens() -> usize {
    4096
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_turns: default_history_max_turns(),
            max_tokens: default_history_max_tokens(),
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Destroy sessions with no participant for this long.
    #[serde(default = "default_idle_timeout_s")]
    pub idle_timeout_s: u64,

    /// Bound on shutdown_all drain.
    #[serde(default = "default_drain_timeout_s")]
    pub drain_timeout_s: u64,
}

fn default_idle_timeout_s() -> u64 {
    30
}
fn default_drain_timeout_s() -> u64 {
    5
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_s: default_idle_timeout_s(),
            drain_timeout_s: default_drain_timeout_s(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment.
///
/// Priority (highest to lowest):
/// 1. Flat operator keys (`VAD_THRESHOLD_ON`, `STT_FINAL_TIMEOUT_MS`, ...)
/// 2. `VOXBRIDGE__`-prefixed environment variables
/// 3. `config/{env}.yaml` (if env specified)
/// 4. `config/default.yaml`
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOXBRIDGE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let mut settings: Settings = config.try_deserialize()?;

    apply_operator_overrides(&mut settings);
    settings.validate()?;

    Ok(settings)
}

/// Apply the flat operator environment keys as final overrides.
fn apply_operator_overrides(settings: &mut Settings) {
    fn read<T: std::str::FromStr>(key: &str, slot: &mut T) {
        if let Ok(raw) = std::env::var(key) {
            match raw.parse::<T>() {
                Ok(value) => *slot = value,
                Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
            }
        }
    }

    read("VAD_THRESHOLD_ON", &mut settings.vad.threshold_on);
    read("VAD_THRESHOLD_OFF", &mut settings.vad.threshold_off);
    read("VAD_MIN_SPEECH_MS", &mut settings.vad.min_speech_ms);
    read("VAD_MIN_SILENCE_MS", &mut settings.vad.min_silence_ms);
    read("PRE_ROLL_MS", &mut settings.vad.pre_roll_ms);
    read("STT_FINAL_TIMEOUT_MS", &mut settings.stt.final_timeout_ms);
    read(
        "LLM_FIRST_TOKEN_TIMEOUT_MS",
        &mut settings.llm.first_token_timeout_ms,
    );
    read("LLM_TOTAL_TIMEOUT_MS", &mut settings.llm.total_timeout_ms);
    read(
        "TTS_FIRST_CHUNK_TIMEOUT_MS",
        &mut settings.tts.first_chunk_timeout_ms,
    );
    read(
        "PRE_TTS_BUFFERING_LEVEL",
        &mut settings.tts.buffering_level,
    );
    read("RETRIEVAL_BUDGET_MS", &mut settings.retrieval.budget_ms);
    read("RAG_TOP_K", &mut settings.retrieval.top_k);
    read(
        "RAG_DENSE_CANDIDATES",
        &mut settings.retrieval.dense_candidates,
    );
    read(
        "RAG_LEXICAL_CANDIDATES",
        &mut settings.retrieval.lexical_candidates,
    );
    read("HISTORY_MAX_TURNS", &mut settings.history.max_turns);
    read("HISTORY_MAX_TOKENS", &mut settings.history.max_tokens);
    read("SESSION_IDLE_TIMEOUT_S", &mut settings.session.idle_timeout_s);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.vad.threshold_on, 0.5);
        assert_eq!(settings.vad.threshold_off, 0.35);
        assert_eq!(settings.stt.final_timeout_ms, 2000);
        assert_eq!(settings.retrieval.top_k, 5);
        assert_eq!(settings.history.max_turns, 16);
        assert_eq!(settings.session.idle_timeout_s, 30);
    }

    #[test]
    fn test_hysteresis_validation() {
        let mut settings = Settings::default();
        settings.vad.threshold_off = 0.6; // above threshold_on
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut settings = Settings::default();
        settings.llm.first_token_timeout_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_total_timeout_bound() {
        let mut settings = Settings::default();
        settings.llm.total_timeout_ms = 1000; // shorter than first-token
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_buffering_level_parse() {
        assert_eq!(
            "medium".parse::<BufferingLevel>().unwrap(),
            BufferingLevel::Medium
        );
        assert_eq!(
            "NONE".parse::<BufferingLevel>().unwrap(),
            BufferingLevel::None
        );
        assert!("loud".parse::<BufferingLevel>().is_err());
    }

    #[test]
    fn test_top_k_zero_rejected() {
        let mut settings = Settings::default();
        settings.retrieval.top_k = 0;
        assert!(settings.validate().is_err());
    }
}
