//! Audio capture from microphone and PCM helpers

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::PcmFormat;
use crate::{Error, Result};

/// Capture rate in Hz, the rate speech engines expect
pub const SAMPLE_RATE: u32 = 16000;

/// Default input device opened at [`SAMPLE_RATE`]
///
/// Prefers a mono configuration. Devices that only offer more channels are
/// downmixed to mono as samples arrive.
pub struct Microphone {
    device: cpal::Device,
    config: StreamConfig,
}

impl Microphone {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if there is no input device or none of its
    /// configurations supports 16 kHz
    pub fn open() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no microphone found".to_string()))?;

        let rate = SampleRate(SAMPLE_RATE);
        let range = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio(format!("microphone cannot record at {SAMPLE_RATE} Hz")))?;
        let config = range.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            channels = config.channels,
            "microphone opened"
        );
        Ok(Self { device, config })
    }

    /// Record for `duration`, blocking the calling thread
    ///
    /// Returns mono samples, at most `duration` worth.
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be built or started
    pub fn record(&self, duration: Duration) -> Result<Vec<f32>> {
        let channels = usize::from(self.config.channels.max(1));
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut samples) = sink.lock() {
                        samples.extend(data.chunks(channels).map(downmix));
                    }
                },
                |err| tracing::warn!(error = %err, "microphone stream error"),
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        std::thread::sleep(duration);
        drop(stream);

        let mut samples = collected
            .lock()
            .map(|mut samples| std::mem::take(&mut *samples))
            .unwrap_or_default();

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let limit = (f64::from(SAMPLE_RATE) * duration.as_secs_f64()) as usize;
        samples.truncate(limit);
        Ok(samples)
    }
}

#[allow(clippy::cast_precision_loss)]
fn downmix(frame: &[f32]) -> f32 {
    frame.iter().sum::<f32>() / frame.len() as f32
}

/// Record a fixed window from the default microphone
///
/// Blocks the calling thread for `duration`. Returns 16 kHz mono PCM16
/// little-endian bytes.
///
/// # Errors
///
/// Returns error if the input device cannot be opened or started
pub fn record_pcm(duration: Duration) -> Result<Vec<u8>> {
    let samples = Microphone::open()?.record(duration)?;
    tracing::debug!(samples = samples.len(), "recorded audio window");
    Ok(samples_to_pcm16(&samples))
}

/// Convert f32 samples in [-1.0, 1.0] to PCM16 little-endian bytes
#[must_use]
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            #[allow(clippy::cast_possible_truncation)]
            let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            value.to_le_bytes()
        })
        .collect()
}

/// Convert PCM16 little-endian bytes to f32 samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_to_samples(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Wrap raw PCM16 bytes in a WAV container for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn pcm16_to_wav(pcm: &[u8], format: PcmFormat) -> Result<Vec<u8>> {
    let audio_err = |e: hound::Error| Error::Audio(format!("wav encoding: {e}"));
    let header = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut wav = std::io::Cursor::new(Vec::with_capacity(pcm.len() + 44));
    let mut writer = hound::WavWriter::new(&mut wav, header).map_err(audio_err)?;
    for pair in pcm.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
            .map_err(audio_err)?;
    }
    writer.finalize().map_err(audio_err)?;

    Ok(wav.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_frame() {
        assert!((downmix(&[0.5, -0.25]) - 0.125).abs() < f32::EPSILON);
        assert!((downmix(&[0.3]) - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn pcm16_conversion_is_little_endian() {
        let pcm = samples_to_pcm16(&[0.0, 1.0, -1.0]);
        assert_eq!(pcm, vec![0x00, 0x00, 0xff, 0x7f, 0x01, 0x80]);
    }

    #[test]
    fn pcm16_clamps_out_of_range_samples() {
        let pcm = samples_to_pcm16(&[2.0, -2.0]);
        assert_eq!(pcm, vec![0xff, 0x7f, 0x00, 0x80]);
    }

    #[test]
    fn pcm16_to_samples_ignores_trailing_byte() {
        let samples = pcm16_to_samples(&[0x00, 0x40, 0x00, 0xc0, 0x7f]);
        assert_eq!(samples, vec![0.5, -0.5]);
    }

    #[test]
    fn wav_header_describes_format() {
        let pcm = samples_to_pcm16(&[0.25; 160]);
        let wav = pcm16_to_wav(&pcm, PcmFormat::SPEECH).unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 160);
    }
}
