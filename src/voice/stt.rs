//! Speech-to-text (STT) over HTTP

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;

use super::{PcmFormat, SpeechToText, pcm16_to_wav};
use crate::{Error, Result};

const WHISPER_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEEPGRAM_ENDPOINT: &str = "https://api.deepgram.com/v1/listen";

#[derive(Deserialize)]
struct WhisperTranscript {
    text: String,
}

#[derive(Deserialize)]
struct DeepgramListen {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

impl DeepgramListen {
    /// Best transcript of the first channel, empty when nothing was heard
    fn into_transcript(self) -> String {
        self.results
            .channels
            .into_iter()
            .next()
            .and_then(|channel| channel.alternatives.into_iter().next())
            .map(|alternative| alternative.transcript)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Service {
    Whisper,
    Deepgram,
}

impl Service {
    const fn label(self) -> &'static str {
        match self {
            Self::Whisper => "Whisper",
            Self::Deepgram => "Deepgram",
        }
    }
}

/// Transcribes speech to text through a hosted API
///
/// Holds only a pooled `reqwest::Client`, so one instance is safe to share
/// across every connection.
pub struct WhisperStt {
    http: reqwest::Client,
    api_key: String,
    model: String,
    service: Service,
}

impl WhisperStt {
    /// Transcribe with `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if `api_key` is empty
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        Self::with_service(Service::Whisper, api_key, model)
    }

    /// Transcribe with Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if `api_key` is empty
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        Self::with_service(Service::Deepgram, api_key, model)
    }

    fn with_service(service: Service, api_key: String, model: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "{} transcription needs an API key",
                service.label()
            )));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            service,
        })
    }

    fn whisper_request(&self, wav: Vec<u8>) -> Result<RequestBuilder> {
        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", file);

        Ok(self
            .http
            .post(WHISPER_ENDPOINT)
            .bearer_auth(&self.api_key)
            .multipart(form))
    }

    fn deepgram_request(&self, wav: Vec<u8>) -> RequestBuilder {
        self.http
            .post(DEEPGRAM_ENDPOINT)
            .query(&[("model", self.model.as_str()), ("punctuate", "true")])
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.api_key))
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(wav)
    }

    /// Send a request and return the body of a successful response
    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let label = self.service.label();
        let response = request
            .send()
            .await
            .map_err(|e| Error::Stt(format!("{label} unreachable: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(Error::Stt(format!("{label} returned {status}: {detail}")))
    }
}

#[async_trait]
impl SpeechToText for WhisperStt {
    async fn transcribe(&self, pcm: &[u8], format: PcmFormat) -> Result<String> {
        let wav = pcm16_to_wav(pcm, format)?;
        tracing::debug!(service = self.service.label(), wav_bytes = wav.len(), "transcribing");

        let transcript = match self.service {
            Service::Whisper => {
                let response = self.execute(self.whisper_request(wav)?).await?;
                response
                    .json::<WhisperTranscript>()
                    .await
                    .map_err(|e| Error::Stt(format!("unreadable Whisper reply: {e}")))?
                    .text
            }
            Service::Deepgram => {
                let response = self.execute(self.deepgram_request(wav)).await?;
                response
                    .json::<DeepgramListen>()
                    .await
                    .map_err(|e| Error::Stt(format!("unreadable Deepgram reply: {e}")))?
                    .into_transcript()
            }
        };

        let transcript = transcript.trim().to_string();
        tracing::info!(chars = transcript.len(), "transcribed");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_keys_are_rejected() {
        assert!(matches!(
            WhisperStt::new_whisper(String::new(), "whisper-1".to_string()),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            WhisperStt::new_deepgram("  ".to_string(), "nova-2".to_string()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn deepgram_takes_first_alternative() {
        let body = r#"{"results":{"channels":[{"alternatives":[
            {"transcript":"turn on the lights"},{"transcript":"turn on the nights"}
        ]}]}}"#;
        let parsed: DeepgramListen = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.into_transcript(), "turn on the lights");
    }

    #[test]
    fn deepgram_without_channels_is_silence() {
        let parsed: DeepgramListen = serde_json::from_str(r#"{"results":{"channels":[]}}"#).unwrap();
        assert_eq!(parsed.into_transcript(), "");
    }

    #[test]
    fn deepgram_request_carries_model_and_token() {
        let stt = WhisperStt::new_deepgram("dg-key".to_string(), "nova-2".to_string()).unwrap();
        let request = stt.deepgram_request(vec![0; 4]).build().unwrap();

        assert_eq!(request.url().query(), Some("model=nova-2&punctuate=true"));
        assert_eq!(request.headers()["authorization"], "Token dg-key");
        assert_eq!(request.headers()["content-type"], "audio/wav");
    }

    #[test]
    fn engine_is_shareable_across_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WhisperStt>();
    }
}
