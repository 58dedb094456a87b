//! Voice collaborators
//!
//! Contracts for the external capabilities the response pipeline chains
//! (speech-to-text, language completion, text-to-speech) and the device
//! adapters the client uses (microphone capture, speaker playback).
//!
//! Implementations shipped here are thin HTTP and `cpal` adapters. The
//! pipeline only ever sees the traits.

mod capture;
mod llm;
mod playback;
mod stt;
mod tts;

use async_trait::async_trait;

pub use capture::{
    Microphone, SAMPLE_RATE, pcm16_to_samples, pcm16_to_wav, record_pcm, samples_to_pcm16,
};
pub use llm::OpenAiChat;
pub use playback::{Speaker, SpeakerPlayback};
pub use stt::WhisperStt;
pub use tts::HttpTts;

use crate::Result;

/// Transcript a speech-to-text engine returns when it heard no speech
pub const BLANK_AUDIO: &str = "[BLANK_AUDIO]";

/// Layout of raw PCM16 little-endian audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    /// 16 kHz mono, the format the client captures
    pub const SPEECH: Self = Self {
        sample_rate: SAMPLE_RATE,
        channels: 1,
    };
}

/// Audio produced by a text-to-speech engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub audio: Vec<u8>,
    pub mime_type: String,
}

/// Converts raw PCM speech into text
///
/// One engine is built at server startup and shared by every connection,
/// so implementations must tolerate concurrent `transcribe` calls. Silence
/// is reported as an empty string or [`BLANK_AUDIO`], never as an error.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe PCM16 little-endian audio
    async fn transcribe(&self, pcm: &[u8], format: PcmFormat) -> Result<String>;
}

/// Single-turn language completion with no server-side memory
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_text: &str) -> Result<String>;
}

/// Synthesizes speech from text
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;
}

/// Renders received audio on an output device
///
/// Calls block until the clip finishes; the client runs them on a blocking
/// worker, one clip at a time.
pub trait Playback: Send + Sync {
    fn play(&self, audio: &[u8], mime_type: &str) -> Result<()>;
}
