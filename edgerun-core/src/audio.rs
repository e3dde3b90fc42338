//! Audio utility functions.
//!
//! The core's wire format is mono float32 samples in [-1, 1] with an explicit
//! sample rate. Everything else (int16 PCM, WAV framing, base64 transport,
//! resampling) lives here at the boundary.

use crate::error::{Result, RuntimeError};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Mono float32 audio with explicit sample rate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64 * 1000.0
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Convert i16 PCM samples to f32 in [-1.0, 1.0).
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Convert f32 samples (clamped to [-1.0, 1.0]) to i16 PCM.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// Convert raw little-endian bytes to i16 samples.
/// Returns empty vec if the byte count is odd.
pub fn bytes_to_i16(data: &[u8]) -> Vec<i16> {
    if data.len() % 2 != 0 {
        return Vec::new();
    }
    data.chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Decode base64-encoded little-endian i16 samples.
pub fn base64_decode_i16(data: &str) -> Option<Vec<i16>> {
    let bytes = STANDARD.decode(data).ok()?;
    if bytes.len() % 2 != 0 {
        return None;
    }
    Some(bytes_to_i16(&bytes))
}

/// Encode i16 samples as base64 little-endian bytes.
pub fn base64_encode_i16(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|&s| s.to_le_bytes()).collect();
    STANDARD.encode(&bytes)
}

/// Encode float32 samples as a complete WAV file: 44-byte header
/// (RIFF/WAVE/fmt PCM, 1 channel, 16-bit) followed by int16 data.
///
/// Quantization is symmetric (x32767 with rounding) so that
/// `wav_to_float32(float32_to_wav(x))` is bit-exact for clamped inputs on the
/// 16-bit grid.
pub fn float32_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    if samples.is_empty() {
        return Err(RuntimeError::InvalidArgument("empty sample buffer".into()));
    }
    if sample_rate == 0 {
        return Err(RuntimeError::InvalidArgument("sample rate must be > 0".into()));
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut bytes: Vec<u8> = Vec::with_capacity(44 + samples.len() * 2);
    {
        let cursor = Cursor::new(&mut bytes);
        let mut writer = hound::WavWriter::new(cursor, spec)
            .map_err(|e| RuntimeError::FormatError(format!("wav writer: {e}")))?;
        for &s in samples {
            let quantized = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            writer
                .write_sample(quantized)
                .map_err(|e| RuntimeError::FormatError(format!("wav write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| RuntimeError::FormatError(format!("wav finalize: {e}")))?;
    }
    Ok(bytes)
}

/// Decode a mono 16-bit PCM WAV file into float32 samples plus sample rate.
pub fn wav_to_float32(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| RuntimeError::FormatError(format!("wav parse: {e}")))?;
    let spec = reader.spec();
    if spec.channels != 1 {
        return Err(RuntimeError::FormatError(format!(
            "expected mono audio, got {} channels",
            spec.channels
        )));
    }
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(RuntimeError::FormatError(
            "expected 16-bit PCM samples".into(),
        ));
    }
    let sample_rate = spec.sample_rate;
    let samples: std::result::Result<Vec<i16>, _> = reader.into_samples::<i16>().collect();
    let samples = samples.map_err(|e| RuntimeError::FormatError(format!("wav data: {e}")))?;
    Ok((
        samples.iter().map(|&s| s as f32 / 32767.0).collect(),
        sample_rate,
    ))
}

/// Resample between arbitrary rates using FFT-based resampling.
/// Returns the input unchanged when the rates match or resampling fails.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    use rubato::Resampler;

    let chunk = samples.len().min(1024);
    match rubato::FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, chunk, 1) {
        Ok(mut resampler) => {
            let input = vec![samples.to_vec()];
            match resampler.process(&input, None) {
                Ok(output) => output.into_iter().next().unwrap_or_default(),
                Err(e) => {
                    tracing::error!("resample failed: {e}");
                    samples.to_vec()
                }
            }
        }
        Err(e) => {
            tracing::error!("failed to create resampler: {e}");
            samples.to_vec()
        }
    }
}

/// Resample to the 16 kHz rate most speech models expect.
pub fn resample_to_16k(samples: &[f32], from_rate: u32) -> Vec<f32> {
    resample(samples, from_rate, 16_000)
}

/// Root mean square of float samples.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Whether the buffer is effectively silence (RMS below threshold).
pub fn is_silence(samples: &[f32], threshold: f32) -> bool {
    calculate_rms(samples) < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_fields() {
        let samples = vec![0.0f32; 2205];
        let wav = float32_to_wav(&samples, 22050).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // channels at bytes 22..24
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1);
        // sample rate at bytes 24..28
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 22050);
        // bits per sample at bytes 34..36
        assert_eq!(u16::from_le_bytes([wav[34], wav[35]]), 16);
        assert_eq!(wav.len(), 44 + samples.len() * 2);
    }

    #[test]
    fn wav_roundtrip_is_bit_exact_on_grid() {
        // Values on the 16-bit grid survive the trip exactly.
        let samples: Vec<f32> = (-5i16..=5)
            .map(|i| (i as i32 * 6553) as f32 / 32767.0)
            .collect();
        let wav = float32_to_wav(&samples, 16000).unwrap();
        let (decoded, rate) = wav_to_float32(&wav).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn wav_roundtrip_clamps_out_of_range() {
        let samples = vec![2.0f32, -3.0];
        let wav = float32_to_wav(&samples, 8000).unwrap();
        let (decoded, _) = wav_to_float32(&wav).unwrap();
        assert_eq!(decoded, vec![1.0, -1.0]);
    }

    #[test]
    fn empty_buffer_is_rejected() {
        assert!(matches!(
            float32_to_wav(&[], 16000),
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn i16_bytes_roundtrip() {
        let original: Vec<i16> = vec![0, 1000, -1000, i16::MAX, i16::MIN];
        let bytes: Vec<u8> = original.iter().flat_map(|&s| s.to_le_bytes()).collect();
        assert_eq!(bytes_to_i16(&bytes), original);
        assert!(bytes_to_i16(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn base64_roundtrip() {
        let samples: Vec<i16> = vec![0, 1000, -1000, 32767, -32768];
        let encoded = base64_encode_i16(&samples);
        assert_eq!(base64_decode_i16(&encoded).unwrap(), samples);
        assert!(base64_decode_i16("not valid base64!!!").is_none());
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(calculate_rms(&vec![0.0; 160]), 0.0);
        assert!(is_silence(&vec![0.001; 160], 0.01));
        assert!(!is_silence(&vec![0.5; 160], 0.01));
    }
}
