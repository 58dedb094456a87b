//! JSON wire codec for envelopes

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::{AudioPayload, Envelope, MessageKind, Payload};
use crate::{Error, Result};

#[derive(Serialize)]
struct WireOut<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: i64,
    data: WireDataOut<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireDataOut<'a> {
    Text(&'a str),
    Audio {
        text: &'a str,
        audio_data: String,
        mime_type: &'a str,
    },
}

#[derive(Deserialize)]
struct WireIn {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct WireAudioIn {
    #[serde(default)]
    text: String,
    /// Some producers encode an empty byte slice as `null`
    #[serde(alias = "audio", default)]
    audio_data: Option<String>,
    mime_type: String,
}

/// Serialize an envelope to its JSON wire form
///
/// # Errors
///
/// Returns error if JSON serialization fails
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    let data = match &envelope.payload {
        Payload::UserInput(text)
        | Payload::AiResponse(text)
        | Payload::Status(text)
        | Payload::Error(text) => WireDataOut::Text(text),
        Payload::Audio(audio) => WireDataOut::Audio {
            text: &audio.text,
            audio_data: STANDARD.encode(&audio.audio),
            mime_type: &audio.mime_type,
        },
    };

    let wire = WireOut {
        kind: envelope.kind().as_str(),
        timestamp: envelope.timestamp,
        data,
    };

    Ok(serde_json::to_vec(&wire)?)
}

/// Parse an envelope from its JSON wire form
///
/// The `type` tag is read first and `data` is validated against the shape
/// that tag implies.
///
/// # Errors
///
/// Returns [`Error::MalformedEnvelope`] when the bytes are not a JSON object,
/// the tag is missing or unknown, or `data` does not match the tag
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let wire: WireIn = serde_json::from_slice(bytes)
        .map_err(|e| Error::MalformedEnvelope(format!("invalid JSON envelope: {e}")))?;

    let tag = wire
        .kind
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::MalformedEnvelope("missing type tag".to_string()))?;

    let kind = MessageKind::from_tag(&tag)
        .ok_or_else(|| Error::MalformedEnvelope(format!("unknown type tag: {tag}")))?;

    let data = wire
        .data
        .ok_or_else(|| Error::MalformedEnvelope(format!("missing data for {kind}")))?;

    let payload = match kind {
        MessageKind::UserInput => Payload::UserInput(expect_text(kind, data)?),
        MessageKind::AiResponse => Payload::AiResponse(expect_text(kind, data)?),
        MessageKind::Status => Payload::Status(expect_text(kind, data)?),
        MessageKind::Error => Payload::Error(expect_text(kind, data)?),
        MessageKind::Audio => Payload::Audio(expect_audio(data)?),
    };

    Ok(Envelope {
        timestamp: wire.timestamp,
        payload,
    })
}

fn expect_text(kind: MessageKind, data: serde_json::Value) -> Result<String> {
    match data {
        serde_json::Value::String(text) => Ok(text),
        other => Err(Error::MalformedEnvelope(format!(
            "{kind} data must be a string, got {}",
            json_type_name(&other)
        ))),
    }
}

fn expect_audio(data: serde_json::Value) -> Result<AudioPayload> {
    let wire: WireAudioIn = serde_json::from_value(data)
        .map_err(|e| Error::MalformedEnvelope(format!("invalid audio data: {e}")))?;

    let audio = match wire.audio_data {
        Some(encoded) => STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::MalformedEnvelope(format!("invalid base64 audio: {e}")))?,
        None => Vec::new(),
    };

    Ok(AudioPayload {
        text: wire.text,
        audio,
        mime_type: wire.mime_type,
    })
}

const fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
