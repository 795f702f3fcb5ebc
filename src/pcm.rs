//! Raw PCM decoding for synthesized speech.
//!
//! The synthesis service returns base64-encoded 16-bit signed
//! little-endian samples, mono, 24 kHz. Nothing in the payload says so;
//! the format is fixed.

use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use tracing::debug;

use crate::error::DecodeError;

pub const SAMPLE_RATE: u32 = 24000;
pub const CHANNELS: u16 = 1;

/// Immutable, shareable buffer of normalized samples in `[-1.0, 1.0)`.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl DecodedAudio {
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        CHANNELS
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Frame index for a time offset, clamped to the buffer.
    pub fn frame_at(&self, seconds: f64) -> usize {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        let frame = (seconds * self.sample_rate as f64) as usize;
        frame.min(self.samples.len())
    }

    /// Write the clip as a 16-bit mono WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let spec = hound::WavSpec {
            channels: CHANNELS,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in self.samples.iter() {
            let value = (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32);
            writer.write_sample(value as i16)?;
        }
        writer.finalize()
    }
}

/// Convert 16-bit little-endian PCM bytes to a 24 kHz mono buffer.
///
/// A trailing unpaired byte is dropped.
pub fn decode_pcm16le(bytes: &[u8]) -> DecodedAudio {
    if bytes.len() % 2 != 0 {
        debug!("Odd PCM payload length {}, ignoring trailing byte", bytes.len());
    }
    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();
    DecodedAudio::from_samples(samples, SAMPLE_RATE)
}

/// Decode a base64 payload from the synthesis service.
pub fn decode_base64_pcm(payload: &str) -> Result<DecodedAudio, DecodeError> {
    let bytes = general_purpose::STANDARD.decode(payload.trim())?;
    let audio = decode_pcm16le(&bytes);
    debug!(
        "Decoded {} bytes into {} samples ({:.2}s)",
        bytes.len(),
        audio.len(),
        audio.duration()
    );
    Ok(audio)
}
