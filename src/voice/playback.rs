//! Audio playback to speakers

use std::io::Cursor;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::{Playback, SAMPLE_RATE, pcm16_to_samples};
use crate::{Error, Result};

/// Output rate in Hz; clips at other rates are resampled to it
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Extra wait past a clip's nominal length before giving up on the device
const DRAIN_SLACK: Duration = Duration::from_millis(500);

/// Default output device opened at 24 kHz
///
/// Mono samples are copied to every output channel.
pub struct Speaker {
    device: cpal::Device,
    config: StreamConfig,
}

impl Speaker {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if there is no output device or none of its
    /// configurations supports 24 kHz
    pub fn open() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no speaker found".to_string()))?;

        let rate = SampleRate(PLAYBACK_SAMPLE_RATE);
        let range = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| {
                Error::Audio(format!("speaker cannot play at {PLAYBACK_SAMPLE_RATE} Hz"))
            })?;
        let config = range.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            channels = config.channels,
            "speaker opened"
        );
        Ok(Self { device, config })
    }

    /// Decode an encoded clip and play it, blocking until it finishes
    ///
    /// # Errors
    ///
    /// Returns error if the MIME type is unsupported, decoding fails, or the
    /// output stream cannot be driven
    pub fn play_encoded(&self, audio: &[u8], mime_type: &str) -> Result<()> {
        let (samples, rate) = decode_clip(audio, mime_type)?;
        let samples = resample(&samples, rate, PLAYBACK_SAMPLE_RATE)?;
        self.play_samples(samples)
    }

    /// Play mono samples at the playback rate, blocking until drained
    fn play_samples(&self, samples: Vec<f32>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels.max(1));
        let length = clip_length(samples.len());
        let mut source = samples.into_iter();
        let (done_tx, done_rx) = std::sync::mpsc::sync_channel::<()>(1);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in out.chunks_mut(channels) {
                        let sample = source.next().unwrap_or_else(|| {
                            let _ = done_tx.try_send(());
                            0.0
                        });
                        frame.fill(sample);
                    }
                },
                |err| tracing::warn!(error = %err, "speaker stream error"),
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        if done_rx.recv_timeout(length + DRAIN_SLACK).is_err() {
            tracing::warn!(?length, "speaker did not drain the clip in time");
        }
        drop(stream);

        tracing::debug!(?length, "clip played");
        Ok(())
    }
}

fn clip_length(samples: usize) -> Duration {
    let millis = samples as u64 * 1000 / u64::from(PLAYBACK_SAMPLE_RATE);
    Duration::from_millis(millis)
}

/// Speaker-backed [`Playback`] used by the client
///
/// Opens the output device per clip so no `cpal` stream outlives a call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpeakerPlayback;

impl Playback for SpeakerPlayback {
    fn play(&self, audio: &[u8], mime_type: &str) -> Result<()> {
        Speaker::open()?.play_encoded(audio, mime_type)
    }
}

/// Decode a clip into mono f32 samples and their sample rate
fn decode_clip(audio: &[u8], mime_type: &str) -> Result<(Vec<f32>, u32)> {
    let base = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match base.as_str() {
        "audio/mpeg" | "audio/mp3" => decode_mp3(audio),
        "audio/pcm" | "audio/l16" => Ok((pcm16_to_samples(audio), SAMPLE_RATE)),
        "audio/wav" | "audio/x-wav" | "audio/wave" => decode_wav(audio),
        other => Err(Error::Audio(format!("unsupported audio type: {other}"))),
    }
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                let frame_rate = frame.sample_rate as u32;
                sample_rate = frame_rate;
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Decode 16-bit WAV bytes to mono f32 samples
fn decode_wav(wav_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::new(Cursor::new(wav_data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = reader
        .samples::<i16>()
        .map(|s| s.map(|v| f32::from(v) / 32768.0))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Audio(e.to_string()))?;

    #[allow(clippy::cast_precision_loss)]
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}

/// Resample mono audio using rubato
#[allow(clippy::cast_possible_truncation)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let mut output = Vec::new();

    for chunk in samples.chunks(chunk_size) {
        // Zero-pad the tail so the last partial chunk is not dropped
        let mut block: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        block.resize(chunk_size, 0.0);

        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    Ok(output)
}
