//! Duplex message protocol shared by the server and the client
//!
//! Every WebSocket frame carries exactly one JSON envelope:
//!
//! ```text
//! {"type": "user_input", "timestamp": 1718000000, "data": "hello"}
//! {"type": "audio", "timestamp": 1718000000,
//!  "data": {"text": "hi there", "audio_data": "<base64>", "mime_type": "audio/mpeg"}}
//! ```
//!
//! The shape of `data` is fixed by `type`. In Rust the pair is a single
//! [`Payload`] sum type so a mismatched kind and payload cannot be built.

mod codec;

use std::fmt;

pub use codec::{decode, encode};

/// MIME type of raw 16 kHz mono PCM16 little-endian audio
pub const MIME_PCM: &str = "audio/pcm";

/// MIME type of MP3 audio
pub const MIME_MPEG: &str = "audio/mpeg";

/// Message kind tag carried in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Typed text from the user
    UserInput,
    /// Plain-text answer from the assistant
    AiResponse,
    /// Encoded audio with an optional caption
    Audio,
    /// Informational status line
    Status,
    /// User-facing error message
    Error,
}

impl MessageKind {
    /// Every kind, in wire declaration order
    pub const ALL: [Self; 5] = [
        Self::UserInput,
        Self::AiResponse,
        Self::Audio,
        Self::Status,
        Self::Error,
    ];

    /// Wire tag for this kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserInput => "user_input",
            Self::AiResponse => "ai_response",
            Self::Audio => "audio",
            Self::Status => "status",
            Self::Error => "error",
        }
    }

    /// Parse a wire tag
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio carried by an `audio` envelope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioPayload {
    /// Caption or transcript; empty when not applicable
    pub text: String,
    /// Encoded audio bytes, opaque to the protocol
    pub audio: Vec<u8>,
    /// Content type selecting the decoder on the receiving side
    pub mime_type: String,
}

/// Typed envelope payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text the user typed
    UserInput(String),
    /// Model reply sent as text
    AiResponse(String),
    /// Informational notice
    Status(String),
    /// User-facing failure message
    Error(String),
    /// Spoken audio with its caption
    Audio(AudioPayload),
}

impl Payload {
    /// Kind tag for this payload
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::UserInput(_) => MessageKind::UserInput,
            Self::AiResponse(_) => MessageKind::AiResponse,
            Self::Status(_) => MessageKind::Status,
            Self::Error(_) => MessageKind::Error,
            Self::Audio(_) => MessageKind::Audio,
        }
    }
}

/// The unit of exchange on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Producer-assigned seconds since the epoch; advisory only
    pub timestamp: i64,
    /// Kind-specific content
    pub payload: Payload,
}

impl Envelope {
    /// Wrap a payload, stamping the current time
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            timestamp: now_timestamp(),
            payload,
        }
    }

    #[must_use]
    pub fn user_input(text: impl Into<String>) -> Self {
        Self::new(Payload::UserInput(text.into()))
    }

    #[must_use]
    pub fn ai_response(text: impl Into<String>) -> Self {
        Self::new(Payload::AiResponse(text.into()))
    }

    #[must_use]
    pub fn status(text: impl Into<String>) -> Self {
        Self::new(Payload::Status(text.into()))
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Payload::Error(text.into()))
    }

    #[must_use]
    pub fn audio(text: impl Into<String>, audio: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self::new(Payload::Audio(AudioPayload {
            text: text.into(),
            audio,
            mime_type: mime_type.into(),
        }))
    }

    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Human-readable description safe for logs
    ///
    /// Audio bytes are never included, only their length.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.payload {
            Payload::UserInput(text)
            | Payload::AiResponse(text)
            | Payload::Status(text)
            | Payload::Error(text) => text.clone(),
            Payload::Audio(audio) => format!(
                "[{} audio, {} bytes] {}",
                audio.mime_type,
                audio.audio.len(),
                audio.text
            )
            .trim_end()
            .to_string(),
        }
    }
}

/// Current time in seconds since the Unix epoch
#[must_use]
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
