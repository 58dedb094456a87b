//! Configuration management for the robot head server and client
//!
//! Values resolve in priority order: environment, then the TOML file
//! (see [`file`]), then defaults.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};
use file::RobotHeadConfigFile;

/// Default bind host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port
pub const DEFAULT_PORT: u16 = 9001;

/// Default system instruction for spoken replies
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, voice-based assistant. \
Speak naturally, like you are talking to a friend. \
Keep your answers short and to the point. \
Use conversational language, contractions, and occasionally check in like 'Want to hear more?'";

/// Default ElevenLabs voice
pub const DEFAULT_ELEVENLABS_VOICE: &str = "Oe8Lhg3t63j9BsrTQBjx";

/// Robot head configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server listener configuration
    pub server: ServerConfig,

    /// Client connection configuration
    pub client: ClientConfig,

    /// Voice pipeline configuration
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Server listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host (`HOST`)
    pub host: String,

    /// Bind port (`PORT`)
    pub port: u16,

    /// Time an in-flight turn may keep running after shutdown is requested
    pub shutdown_grace: Duration,

    /// Origins allowed to open `/ws`; empty accepts any origin
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    /// `host:port` bind address
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            shutdown_grace: Duration::from_secs(30),
            allowed_origins: Vec::new(),
        }
    }
}

/// Client connection configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the server
    pub server_url: String,

    /// Dial attempts before giving up
    pub max_attempts: u32,

    /// Delay after the first failed dial; doubles each attempt
    pub base_delay: Duration,

    /// Length of each microphone window in voice mode
    pub capture_window: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("ws://localhost:{DEFAULT_PORT}/ws"),
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            capture_window: Duration::from_secs(3),
        }
    }
}

/// Speech-to-text backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttBackend {
    Whisper,
    Deepgram,
}

impl FromStr for SttBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Text-to-speech backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsBackend {
    ElevenLabs,
    OpenAi,
}

impl FromStr for TtsBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "elevenlabs" | "eleven_labs" => Ok(Self::ElevenLabs),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Voice pipeline configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_backend: SttBackend,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    pub tts_backend: TtsBackend,

    /// TTS model (e.g. "`eleven_turbo_v2`", "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (`OpenAI` only)
    pub tts_speed: f64,

    /// Chat completion model
    pub llm_model: String,

    /// System instruction sent with every completion
    pub system_prompt: String,

    /// Deadline for each STT/LLM/TTS call
    pub call_timeout: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_backend: SttBackend::Whisper,
            stt_model: "whisper-1".to_string(),
            tts_backend: TtsBackend::ElevenLabs,
            tts_model: "eleven_turbo_v2".to_string(),
            tts_voice: DEFAULT_ELEVENLABS_VOICE.to_string(),
            tts_speed: 1.0,
            llm_model: "gpt-4o".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, chat, optional TTS)
    pub openai: Option<String>,

    /// `ElevenLabs` API key (TTS)
    pub elevenlabs: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |k: &Option<String>| k.as_ref().map(|_| "<set>");
        f.debug_struct("ApiKeys")
            .field("openai", &mask(&self.openai))
            .field("elevenlabs", &mask(&self.elevenlabs))
            .field("deepgram", &mask(&self.deepgram))
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(&fc, |key| std::env::var(key).ok(), key_file_dir().as_deref())
    }

    /// Resolve configuration from explicit sources
    ///
    /// `env` looks up environment variables; `key_dir` is the directory of
    /// plain-text key files (`openai_key`, `elevenlabs_key`, `deepgram_key`).
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn resolve(
        fc: &RobotHeadConfigFile,
        env: impl Fn(&str) -> Option<String>,
        key_dir: Option<&Path>,
    ) -> Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: env("HOST")
                .or_else(|| fc.server.host.clone())
                .unwrap_or(server_defaults.host),
            port: parse_env(&env, "PORT")?
                .or(fc.server.port)
                .unwrap_or(server_defaults.port),
            shutdown_grace: parse_env(&env, "ROBOT_HEAD_SHUTDOWN_GRACE_SECS")?
                .or(fc.server.shutdown_grace_secs)
                .map_or(server_defaults.shutdown_grace, Duration::from_secs),
            allowed_origins: env("ROBOT_HEAD_ALLOWED_ORIGINS")
                .map(|v| split_list(&v))
                .or_else(|| fc.server.allowed_origins.clone())
                .unwrap_or_default(),
        };

        let client_defaults = ClientConfig::default();
        let capture_secs: Option<f64> =
            parse_env(&env, "ROBOT_HEAD_CAPTURE_SECS")?.or(fc.client.capture_secs);
        let capture_window = match capture_secs {
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
            Some(secs) => {
                return Err(Error::Config(format!("capture window must be positive, got {secs}")));
            }
            None => client_defaults.capture_window,
        };
        let client = ClientConfig {
            server_url: env("ROBOT_HEAD_SERVER_URL")
                .or_else(|| fc.client.server_url.clone())
                .unwrap_or(client_defaults.server_url),
            max_attempts: parse_env(&env, "ROBOT_HEAD_CONNECT_ATTEMPTS")?
                .or(fc.client.connect_attempts)
                .unwrap_or(client_defaults.max_attempts)
                .max(1),
            base_delay: parse_env(&env, "ROBOT_HEAD_CONNECT_DELAY_MS")?
                .or(fc.client.connect_delay_ms)
                .map_or(client_defaults.base_delay, Duration::from_millis),
            capture_window,
        };

        let voice_defaults = VoiceConfig::default();
        let stt_backend = env("ROBOT_HEAD_STT_PROVIDER")
            .or_else(|| fc.voice.stt_provider.clone())
            .map(|s| s.parse::<SttBackend>())
            .transpose()?
            .unwrap_or(voice_defaults.stt_backend);
        let tts_backend = env("ROBOT_HEAD_TTS_PROVIDER")
            .or_else(|| fc.voice.tts_provider.clone())
            .map(|s| s.parse::<TtsBackend>())
            .transpose()?
            .unwrap_or(voice_defaults.tts_backend);

        let (default_stt_model, default_tts_model, default_tts_voice) = (
            match stt_backend {
                SttBackend::Whisper => "whisper-1",
                SttBackend::Deepgram => "nova-2",
            },
            match tts_backend {
                TtsBackend::ElevenLabs => "eleven_turbo_v2",
                TtsBackend::OpenAi => "tts-1",
            },
            match tts_backend {
                TtsBackend::ElevenLabs => DEFAULT_ELEVENLABS_VOICE,
                TtsBackend::OpenAi => "alloy",
            },
        );

        let voice = VoiceConfig {
            stt_backend,
            stt_model: env("ROBOT_HEAD_STT_MODEL")
                .or_else(|| fc.voice.stt_model.clone())
                .unwrap_or_else(|| default_stt_model.to_string()),
            tts_backend,
            tts_model: env("ROBOT_HEAD_TTS_MODEL")
                .or_else(|| fc.voice.tts_model.clone())
                .unwrap_or_else(|| default_tts_model.to_string()),
            tts_voice: env("ROBOT_HEAD_TTS_VOICE")
                .or_else(|| fc.voice.tts_voice.clone())
                .unwrap_or_else(|| default_tts_voice.to_string()),
            tts_speed: parse_env(&env, "ROBOT_HEAD_TTS_SPEED")?
                .or(fc.voice.tts_speed)
                .unwrap_or(voice_defaults.tts_speed),
            llm_model: env("ROBOT_HEAD_LLM_MODEL")
                .or_else(|| fc.voice.llm_model.clone())
                .unwrap_or(voice_defaults.llm_model),
            system_prompt: env("ROBOT_HEAD_SYSTEM_PROMPT")
                .or_else(|| fc.voice.system_prompt.clone())
                .unwrap_or(voice_defaults.system_prompt),
            call_timeout: parse_env(&env, "ROBOT_HEAD_TIMEOUT_SECS")?
                .or(fc.voice.timeout_secs)
                .map_or(voice_defaults.call_timeout, Duration::from_secs),
        };

        // API keys: env > toml > key file
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or_else(|| fc.api_keys.openai.clone())
                .or_else(|| read_key_file(key_dir, "openai_key")),
            elevenlabs: env("ELEVENLABS_API_KEY")
                .or_else(|| fc.api_keys.elevenlabs.clone())
                .or_else(|| read_key_file(key_dir, "elevenlabs_key")),
            deepgram: env("DEEPGRAM_API_KEY")
                .or_else(|| fc.api_keys.deepgram.clone())
                .or_else(|| read_key_file(key_dir, "deepgram_key")),
        };

        Ok(Self {
            server,
            client,
            voice,
            api_keys,
        })
    }
}

/// Directory of plain-text API key files: `~/.api_keys`
#[must_use]
pub fn key_file_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".api_keys"))
}

fn read_key_file(dir: Option<&Path>, name: &str) -> Option<String> {
    let path = dir?.join(name);
    let key = std::fs::read_to_string(&path).ok()?;
    let key = key.trim();
    if key.is_empty() {
        tracing::warn!(path = %path.display(), "API key file is empty");
        return None;
    }
    tracing::debug!(path = %path.display(), "loaded API key from file");
    Some(key.to_string())
}

fn parse_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    env(key)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid {key}={v}: {e}")))
        })
        .transpose()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_original_deployment() {
        let config = Config::resolve(&RobotHeadConfigFile::default(), env_from(&[]), None).unwrap();

        assert_eq!(config.server.bind_addr(), "0.0.0.0:9001");
        assert_eq!(config.server.shutdown_grace, Duration::from_secs(30));
        assert!(config.server.allowed_origins.is_empty());
        assert_eq!(config.client.server_url, "ws://localhost:9001/ws");
        assert_eq!(config.client.max_attempts, 5);
        assert_eq!(config.client.base_delay, Duration::from_secs(1));
        assert_eq!(config.client.capture_window, Duration::from_secs(3));
        assert_eq!(config.voice.tts_backend, TtsBackend::ElevenLabs);
        assert_eq!(config.voice.tts_voice, DEFAULT_ELEVENLABS_VOICE);
        assert_eq!(config.voice.llm_model, "gpt-4o");
        assert_eq!(config.voice.call_timeout, Duration::from_secs(30));
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let mut fc = RobotHeadConfigFile::default();
        fc.server.port = Some(9100);
        fc.server.host = Some("127.0.0.1".to_string());
        fc.voice.llm_model = Some("gpt-4o-mini".to_string());

        let config = Config::resolve(
            &fc,
            env_from(&[("PORT", "9200"), ("ROBOT_HEAD_ALLOWED_ORIGINS", "http://a, http://b,")]),
            None,
        )
        .unwrap();

        assert_eq!(config.server.port, 9200);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.voice.llm_model, "gpt-4o-mini");
        assert_eq!(config.server.allowed_origins, vec!["http://a", "http://b"]);
    }

    #[test]
    fn provider_switch_changes_model_defaults() {
        let config = Config::resolve(
            &RobotHeadConfigFile::default(),
            env_from(&[
                ("ROBOT_HEAD_TTS_PROVIDER", "OpenAI"),
                ("ROBOT_HEAD_STT_PROVIDER", "deepgram"),
            ]),
            None,
        )
        .unwrap();

        assert_eq!(config.voice.tts_backend, TtsBackend::OpenAi);
        assert_eq!(config.voice.tts_model, "tts-1");
        assert_eq!(config.voice.tts_voice, "alloy");
        assert_eq!(config.voice.stt_backend, SttBackend::Deepgram);
        assert_eq!(config.voice.stt_model, "nova-2");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let fc = RobotHeadConfigFile::default();
        assert!(matches!(
            Config::resolve(&fc, env_from(&[("PORT", "ninety")]), None),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::resolve(&fc, env_from(&[("ROBOT_HEAD_TTS_PROVIDER", "espeak")]), None),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::resolve(&fc, env_from(&[("ROBOT_HEAD_CAPTURE_SECS", "0")]), None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let config = Config::resolve(
            &RobotHeadConfigFile::default(),
            env_from(&[("PORT", "  "), ("OPENAI_API_KEY", "")]),
            None,
        )
        .unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn keys_fall_back_to_key_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("openai_key"), "sk-from-file\n").unwrap();
        std::fs::write(dir.path().join("elevenlabs_key"), "   ").unwrap();

        let config = Config::resolve(
            &RobotHeadConfigFile::default(),
            env_from(&[]),
            Some(dir.path()),
        )
        .unwrap();
        assert_eq!(config.api_keys.openai.as_deref(), Some("sk-from-file"));
        assert!(config.api_keys.elevenlabs.is_none());

        let config = Config::resolve(
            &RobotHeadConfigFile::default(),
            env_from(&[("OPENAI_API_KEY", "sk-env")]),
            Some(dir.path()),
        )
        .unwrap();
        assert_eq!(config.api_keys.openai.as_deref(), Some("sk-env"));
    }

    #[test]
    fn debug_output_masks_keys() {
        let keys = ApiKeys {
            openai: Some("sk-secret".to_string()),
            ..ApiKeys::default()
        };
        let debug = format!("{keys:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<set>"));
    }
}
