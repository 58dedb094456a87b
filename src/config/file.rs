//! TOML configuration file loading
//!
//! Supports `~/.config/robot-head/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct RobotHeadConfigFile {
    /// Server listener configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Client connection configuration
    #[serde(default)]
    pub client: ClientFileConfig,

    /// Voice pipeline configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Seconds an in-flight turn may run after shutdown is requested
    pub shutdown_grace_secs: Option<u64>,
    /// Origins allowed to open `/ws`; empty allows any
    pub allowed_origins: Option<Vec<String>>,
}

/// Client configuration
#[derive(Debug, Default, Deserialize)]
pub struct ClientFileConfig {
    /// WebSocket URL, e.g. `ws://robot.local:9001/ws`
    pub server_url: Option<String>,
    pub connect_attempts: Option<u32>,
    pub connect_delay_ms: Option<u64>,
    /// Length of each microphone window in voice mode
    pub capture_secs: Option<f64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,
    pub stt_model: Option<String>,
    /// "elevenlabs" or "openai"
    pub tts_provider: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f64>,
    pub llm_model: Option<String>,
    pub system_prompt: Option<String>,
    /// Deadline for each STT/LLM/TTS call
    pub timeout_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `RobotHeadConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> RobotHeadConfigFile {
    config_file_path().map_or_else(RobotHeadConfigFile::default, |path| {
        load_config_file_from(&path)
    })
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults with a warning.
pub fn load_config_file_from(path: &Path) -> RobotHeadConfigFile {
    if !path.exists() {
        return RobotHeadConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                RobotHeadConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            RobotHeadConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/robot-head/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("robot-head").join("config.toml"))
}
