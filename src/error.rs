//! Error types for the robot head server and client

use thiserror::Error;

/// Result type alias for robot head operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the robot head server and client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Initial dial exhausted every retry attempt
    #[error("failed to connect after {attempts} attempts: {last}")]
    Connect {
        /// Number of dials performed
        attempts: u32,
        /// Message of the last underlying failure
        last: String,
    },

    /// WebSocket handshake was rejected
    #[error("upgrade rejected: {0}")]
    Upgrade(String),

    /// Inbound bytes could not be decoded into an envelope
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model completion error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// A collaborator call exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Read or write failure that ended a connection
    #[error("session terminated: {0}")]
    SessionTerminated(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
