//! Text-to-speech (TTS) over HTTP

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Serialize;

use super::{SynthesizedAudio, TextToSpeech};
use crate::protocol::MIME_MPEG;
use crate::{Error, Result};

const OPENAI_SPEECH_ENDPOINT: &str = "https://api.openai.com/v1/audio/speech";
const ELEVENLABS_ENDPOINT: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// ElevenLabs voice stability and similarity, both fixed at the midpoint
const ELEVENLABS_VOICE_SETTING: f64 = 0.5;

#[derive(Serialize)]
struct OpenAiSpeechBody<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    speed: f64,
}

#[derive(Serialize)]
struct ElevenLabsBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: ElevenLabsVoiceSettings,
}

#[derive(Serialize)]
struct ElevenLabsVoiceSettings {
    stability: f64,
    similarity_boost: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum Voice {
    OpenAi { voice: String, speed: f64 },
    ElevenLabs { voice_id: String },
}

impl Voice {
    const fn label(&self) -> &'static str {
        match self {
            Self::OpenAi { .. } => "OpenAI speech",
            Self::ElevenLabs { .. } => "ElevenLabs",
        }
    }
}

/// Synthesizes speech from text through a hosted API
///
/// Both services are asked for MP3.
pub struct HttpTts {
    http: reqwest::Client,
    api_key: String,
    model: String,
    voice: Voice,
}

impl HttpTts {
    /// Speak with an `OpenAI` voice
    ///
    /// # Errors
    ///
    /// Returns error if `api_key` is empty
    pub fn new_openai(api_key: String, voice: String, speed: f64, model: String) -> Result<Self> {
        Self::with_voice(Voice::OpenAi { voice, speed }, api_key, model)
    }

    /// Speak with an ElevenLabs voice
    ///
    /// # Errors
    ///
    /// Returns error if `api_key` is empty
    pub fn new_elevenlabs(api_key: String, voice_id: String, model: String) -> Result<Self> {
        Self::with_voice(Voice::ElevenLabs { voice_id }, api_key, model)
    }

    fn with_voice(voice: Voice, api_key: String, model: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config(format!("{} needs an API key", voice.label())));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            voice,
        })
    }

    fn request(&self, text: &str) -> RequestBuilder {
        match &self.voice {
            Voice::OpenAi { voice, speed } => self
                .http
                .post(OPENAI_SPEECH_ENDPOINT)
                .bearer_auth(&self.api_key)
                .json(&OpenAiSpeechBody {
                    model: &self.model,
                    voice,
                    input: text,
                    speed: *speed,
                }),
            Voice::ElevenLabs { voice_id } => self
                .http
                .post(format!("{ELEVENLABS_ENDPOINT}/{voice_id}"))
                .header("xi-api-key", &self.api_key)
                .header(reqwest::header::ACCEPT, MIME_MPEG)
                .json(&ElevenLabsBody {
                    text,
                    model_id: &self.model,
                    voice_settings: ElevenLabsVoiceSettings {
                        stability: ELEVENLABS_VOICE_SETTING,
                        similarity_boost: ELEVENLABS_VOICE_SETTING,
                    },
                }),
        }
    }
}

#[async_trait]
impl TextToSpeech for HttpTts {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        let label = self.voice.label();
        let response = self
            .request(text)
            .send()
            .await
            .map_err(|e| Error::Tts(format!("{label} unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("{label} returned {status}: {detail}")));
        }

        let audio = response.bytes().await?.to_vec();
        tracing::debug!(service = label, audio_bytes = audio.len(), "speech synthesized");

        Ok(SynthesizedAudio {
            audio,
            mime_type: MIME_MPEG.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(request: reqwest::Request) -> serde_json::Value {
        let bytes = request.body().and_then(reqwest::Body::as_bytes).unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn blank_keys_are_rejected() {
        assert!(matches!(
            HttpTts::new_openai(String::new(), "alloy".to_string(), 1.0, "tts-1".to_string()),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            HttpTts::new_elevenlabs(
                " ".to_string(),
                "voice".to_string(),
                "eleven_turbo_v2".to_string()
            ),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn elevenlabs_request_targets_voice() {
        let tts = HttpTts::new_elevenlabs(
            "el-key".to_string(),
            "abc123".to_string(),
            "eleven_turbo_v2".to_string(),
        )
        .unwrap();
        let request = tts.request("hello").build().unwrap();

        assert_eq!(request.url().path(), "/v1/text-to-speech/abc123");
        assert_eq!(request.headers()["xi-api-key"], "el-key");
        assert_eq!(
            body_of(request),
            serde_json::json!({
                "text": "hello",
                "model_id": "eleven_turbo_v2",
                "voice_settings": {"stability": 0.5, "similarity_boost": 0.5}
            })
        );
    }

    #[test]
    fn openai_request_carries_voice_and_speed() {
        let tts = HttpTts::new_openai(
            "sk-test".to_string(),
            "alloy".to_string(),
            1.25,
            "tts-1".to_string(),
        )
        .unwrap();
        let request = tts.request("hi").build().unwrap();

        assert_eq!(request.headers()["authorization"], "Bearer sk-test");
        assert_eq!(
            body_of(request),
            serde_json::json!({"model": "tts-1", "voice": "alloy", "input": "hi", "speed": 1.25})
        );
    }
}
