//! Server-side response pipeline
//!
//! Turns one inbound envelope into at most one outbound envelope:
//!
//! ```text
//! Audio ──► STT ──┐
//!                 ├──► LLM ──► TTS ──► Audio
//! UserInput ──────┘              └──(fail)──► AiResponse
//! ```
//!
//! Collaborator failures never escape; they become user-facing `Error`
//! envelopes or, for TTS, the plain-text fallback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, SttBackend, TtsBackend};
use crate::protocol::{Envelope, Payload};
use crate::voice::{
    BLANK_AUDIO, HttpTts, LanguageModel, OpenAiChat, PcmFormat, SpeechToText, TextToSpeech,
    WhisperStt,
};
use crate::{Error, Result};

/// Reply sent when transcription fails
pub const STT_FAILURE_MESSAGE: &str = "Sorry, I couldn't understand what you said.";

/// Reply sent when completion fails
pub const LLM_FAILURE_MESSAGE: &str = "Sorry, I'm having trouble thinking right now.";

/// Stateless STT → LLM → TTS chain shared by every connection
pub struct ResponsePipeline {
    stt: Arc<dyn SpeechToText>,
    llm: Arc<dyn LanguageModel>,
    tts: Option<Arc<dyn TextToSpeech>>,
    system_prompt: String,
    call_timeout: Duration,
}

impl ResponsePipeline {
    /// Create a pipeline from explicit collaborators
    ///
    /// Without `tts` every completion is returned as text.
    #[must_use]
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        llm: Arc<dyn LanguageModel>,
        tts: Option<Arc<dyn TextToSpeech>>,
        system_prompt: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            stt,
            llm,
            tts,
            system_prompt: system_prompt.into(),
            call_timeout,
        }
    }

    /// Build the HTTP-backed collaborators described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if the STT or LLM provider has no API key. A missing
    /// TTS key only disables speech synthesis.
    pub fn from_config(config: &Config) -> Result<Self> {
        let voice = &config.voice;
        let keys = &config.api_keys;

        let stt: Arc<dyn SpeechToText> = match voice.stt_backend {
            SttBackend::Whisper => Arc::new(WhisperStt::new_whisper(
                keys.openai.clone().unwrap_or_default(),
                voice.stt_model.clone(),
            )?),
            SttBackend::Deepgram => Arc::new(WhisperStt::new_deepgram(
                keys.deepgram.clone().unwrap_or_default(),
                voice.stt_model.clone(),
            )?),
        };

        let llm: Arc<dyn LanguageModel> = Arc::new(OpenAiChat::new(
            keys.openai.clone().unwrap_or_default(),
            voice.llm_model.clone(),
        )?);

        let tts_result = match voice.tts_backend {
            TtsBackend::ElevenLabs => HttpTts::new_elevenlabs(
                keys.elevenlabs.clone().unwrap_or_default(),
                voice.tts_voice.clone(),
                voice.tts_model.clone(),
            ),
            TtsBackend::OpenAi => HttpTts::new_openai(
                keys.openai.clone().unwrap_or_default(),
                voice.tts_voice.clone(),
                voice.tts_speed,
                voice.tts_model.clone(),
            ),
        };
        let tts: Option<Arc<dyn TextToSpeech>> = match tts_result {
            Ok(tts) => Some(Arc::new(tts)),
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis disabled, replies will be text only");
                None
            }
        };

        tracing::info!(
            stt = ?voice.stt_backend,
            llm = %voice.llm_model,
            tts = ?tts.as_ref().map(|_| voice.tts_backend),
            "response pipeline ready"
        );

        Ok(Self::new(
            stt,
            llm,
            tts,
            voice.system_prompt.clone(),
            voice.call_timeout,
        ))
    }

    /// Run one turn
    ///
    /// Returns `None` when nothing should be sent back (silence).
    pub async fn respond(&self, envelope: &Envelope) -> Option<Envelope> {
        let transcript = match &envelope.payload {
            Payload::Audio(audio) => {
                if audio.audio.is_empty() {
                    tracing::debug!("empty audio, treating as silence");
                    return None;
                }
                match self
                    .bounded("stt", self.stt.transcribe(&audio.audio, PcmFormat::SPEECH))
                    .await
                {
                    Ok(transcript) => {
                        let transcript = transcript.trim();
                        if transcript.is_empty() || transcript == BLANK_AUDIO {
                            tracing::debug!("no speech detected");
                            return None;
                        }
                        transcript.to_string()
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "transcription failed");
                        return Some(Envelope::error(STT_FAILURE_MESSAGE));
                    }
                }
            }
            // Typed text goes to the model as written
            Payload::UserInput(text) => text.clone(),
            Payload::AiResponse(_) | Payload::Status(_) | Payload::Error(_) => {
                return Some(Envelope::status(format!("Received: {}", envelope.summary())));
            }
        };

        let completion = match self
            .bounded("llm", self.llm.complete(&self.system_prompt, &transcript))
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!(error = %e, "completion failed");
                return Some(Envelope::error(LLM_FAILURE_MESSAGE));
            }
        };

        Some(self.speak(completion).await)
    }

    /// Synthesize `completion`, falling back to text
    async fn speak(&self, completion: String) -> Envelope {
        let Some(tts) = &self.tts else {
            return Envelope::ai_response(completion);
        };

        match self.bounded("tts", tts.synthesize(&completion)).await {
            Ok(speech) if !speech.audio.is_empty() => {
                Envelope::audio(completion, speech.audio, speech.mime_type)
            }
            Ok(_) => {
                tracing::warn!("speech synthesis returned no audio, sending text");
                Envelope::ai_response(completion)
            }
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis failed, sending text");
                Envelope::ai_response(completion)
            }
        }
    }

    async fn bounded<T>(&self, stage: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| Error::Timeout(format!("{stage} call exceeded {:?}", self.call_timeout)))?
    }
}
