//! Built-in providers.
//!
//! Two dependency-free backends registered at init under the `builtin`
//! framework tag. They make provider selection, the voice pipeline and the
//! RAG pipeline work out of the box, and serve as reference implementations
//! for the vtable contracts.

use crate::error::{Result, RuntimeError};
use crate::registry::models::{Capability, Framework, ModelDescriptor};
use crate::registry::providers::{self, ProviderFactory, ProviderRegistration, ServiceConfig};
use crate::service::embeddings::Embeddings;
use crate::service::vad::{SpeechSegment, VoiceActivity};
use crate::service::{ServiceInfo, ServiceInstance};
use parking_lot::Mutex;
use std::sync::Arc;

const SUPPORTED_RATES: &[u32] = &[8_000, 16_000, 22_050, 24_000, 44_100, 48_000];

fn check_sample_rate(sample_rate: u32) -> Result<()> {
    if SUPPORTED_RATES.contains(&sample_rate) {
        Ok(())
    } else {
        Err(RuntimeError::InvalidArgument(format!(
            "unsupported sample rate {sample_rate}"
        )))
    }
}

// ─── RMS-energy VAD ───────────────────────────────────────────────────────────

/// Energy-threshold VAD with hangover smoothing.
///
/// Detects "sound vs silence" using root-mean-square energy over short
/// frames. Cannot distinguish speech from other loud audio; intended as the
/// universal CPU fallback when no model-based VAD is installed.
pub struct RmsVad {
    threshold: Mutex<f32>,
    /// Consecutive silence frames required before a segment closes.
    hangover_frames: u32,
    frame_ms: u32,
}

impl RmsVad {
    /// Default threshold calibrated against float samples in [-1, 1].
    pub const DEFAULT_THRESHOLD: f32 = 0.015;

    pub fn new() -> Self {
        Self {
            threshold: Mutex::new(Self::DEFAULT_THRESHOLD),
            hangover_frames: 4,
            frame_ms: 30,
        }
    }

    fn frame_len(&self, sample_rate: u32) -> usize {
        (sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

impl Default for RmsVad {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceActivity for RmsVad {
    fn process(&self, samples: &[f32], sample_rate: u32) -> Result<bool> {
        check_sample_rate(sample_rate)?;
        if samples.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty sample buffer".into()));
        }
        Ok(crate::audio::calculate_rms(samples) >= *self.threshold.lock())
    }

    fn detect_segments(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<SpeechSegment>> {
        check_sample_rate(sample_rate)?;
        if samples.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty sample buffer".into()));
        }

        let threshold = *self.threshold.lock();
        let frame_len = self.frame_len(sample_rate).max(1);
        let ms_per_frame = self.frame_ms as f64;

        let mut segments = Vec::new();
        let mut open_start: Option<f64> = None;
        let mut silence_run = 0u32;
        let mut last_voiced_end = 0.0f64;

        for (i, frame) in samples.chunks(frame_len).enumerate() {
            let start_ms = i as f64 * ms_per_frame;
            let end_ms = start_ms + frame.len() as f64 * 1000.0 / sample_rate as f64;
            let voiced = crate::audio::calculate_rms(frame) >= threshold;

            if voiced {
                silence_run = 0;
                last_voiced_end = end_ms;
                if open_start.is_none() {
                    open_start = Some(start_ms);
                }
            } else if let Some(start) = open_start {
                silence_run += 1;
                if silence_run >= self.hangover_frames {
                    segments.push(SpeechSegment {
                        start_ms: start,
                        end_ms: last_voiced_end,
                    });
                    open_start = None;
                    silence_run = 0;
                }
            }
        }
        if let Some(start) = open_start {
            segments.push(SpeechSegment {
                start_ms: start,
                end_ms: last_voiced_end,
            });
        }
        Ok(segments)
    }

    fn set_threshold(&self, threshold: f32) {
        *self.threshold.lock() = threshold.max(0.0);
    }

    fn reset(&self) {
        *self.threshold.lock() = Self::DEFAULT_THRESHOLD;
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: "builtin-rms-vad".into(),
            framework: Framework::Builtin,
            model_id: None,
            metadata: serde_json::json!({ "method": "rms_threshold" }),
        }
    }
}

// ─── Deterministic hashed embeddings ──────────────────────────────────────────

/// Deterministic, word-overlap-sensitive embedder.
///
/// Each word hashes (FNV-1a) to three positions in a 384-dim vector; texts
/// sharing words produce overlapping vectors and therefore higher cosine
/// similarity. Identical texts embed identically. No model file needed.
pub struct HashedEmbeddings {
    dimensions: usize,
}

impl HashedEmbeddings {
    pub fn new() -> Self {
        Self { dimensions: 384 }
    }

    fn fnv1a_hash(word: &str) -> usize {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash as usize
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimensions];

        let words: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() >= 2)
            .map(|w| w.to_string())
            .collect();

        if words.is_empty() {
            return vec;
        }

        // Each word contributes to 3 dimensions (spreading reduces collision).
        for word in &words {
            let base = Self::fnv1a_hash(word);
            for offset in 0..3usize {
                let dim = (base.wrapping_add(offset * 7919)) % self.dimensions;
                vec[dim] += 1.0;
            }
        }

        // L2-normalize so cosine similarity behaves.
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }
}

impl Default for HashedEmbeddings {
    fn default() -> Self {
        Self::new()
    }
}

impl Embeddings for HashedEmbeddings {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: "builtin-hashed-embeddings".into(),
            framework: Framework::Builtin,
            model_id: None,
            metadata: serde_json::json!({ "dimensions": self.dimensions }),
        }
    }
}

// ─── Registration ─────────────────────────────────────────────────────────────

struct VadFactory;

impl ProviderFactory for VadFactory {
    fn create(&self, _model: &ModelDescriptor, _config: &ServiceConfig) -> Result<ServiceInstance> {
        Ok(ServiceInstance::Vad(Box::new(RmsVad::new())))
    }
}

struct EmbeddingsFactory;

impl ProviderFactory for EmbeddingsFactory {
    fn create(&self, _model: &ModelDescriptor, _config: &ServiceConfig) -> Result<ServiceInstance> {
        Ok(ServiceInstance::Embeddings(Box::new(HashedEmbeddings::new())))
    }
}

/// Register the builtin providers. Idempotent.
pub fn register_builtin_providers() {
    providers::providers().register(ProviderRegistration {
        provider_id: "builtin-vad".into(),
        capability: Capability::Vad,
        framework: Framework::Builtin,
        priority: 10,
        factory: Arc::new(VadFactory),
    });
    providers::providers().register(ProviderRegistration {
        provider_id: "builtin-embeddings".into(),
        capability: Capability::Embeddings,
        framework: Framework::Builtin,
        priority: 10,
        factory: Arc::new(EmbeddingsFactory),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::embeddings::cosine_similarity;

    fn tone(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (i as f32 * 0.3).sin())
            .collect()
    }

    #[test]
    fn silence_is_not_speech() {
        let vad = RmsVad::new();
        assert!(!vad.process(&vec![0.0; 480], 16_000).unwrap());
    }

    #[test]
    fn loud_tone_is_speech() {
        let vad = RmsVad::new();
        assert!(vad.process(&tone(480, 0.5), 16_000).unwrap());
    }

    #[test]
    fn unsupported_sample_rate_is_invalid_argument() {
        let vad = RmsVad::new();
        assert!(matches!(
            vad.process(&tone(480, 0.5), 12_345),
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn segments_bracket_the_tone() {
        let vad = RmsVad::new();
        let rate = 16_000u32;
        let frame = 480usize; // 30 ms
        let mut samples = vec![0.0f32; frame * 10];
        samples.extend(tone(frame * 10, 0.5));
        samples.extend(vec![0.0f32; frame * 10]);

        let segments = vad.detect_segments(&samples, rate).unwrap();
        assert_eq!(segments.len(), 1);
        let seg = segments[0];
        assert!((seg.start_ms - 300.0).abs() < 31.0, "start {}", seg.start_ms);
        assert!((seg.end_ms - 600.0).abs() < 31.0, "end {}", seg.end_ms);
    }

    #[test]
    fn threshold_is_adjustable_and_resettable() {
        let vad = RmsVad::new();
        vad.set_threshold(0.9);
        assert!(!vad.process(&tone(480, 0.5), 16_000).unwrap());
        vad.reset();
        assert!(vad.process(&tone(480, 0.5), 16_000).unwrap());
    }

    #[test]
    fn identical_texts_embed_identically() {
        let embedder = HashedEmbeddings::new();
        let a = embedder.embed("Rust borrow checker rules").unwrap();
        let b = embedder.embed("Rust borrow checker rules").unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert_eq!(a.len(), 384);
    }

    #[test]
    fn similarity_orders_related_before_unrelated() {
        let embedder = HashedEmbeddings::new();
        let base = embedder.embed("the eiffel tower was completed in 1889").unwrap();
        let related = embedder.embed("when was the eiffel tower built").unwrap();
        let unrelated = embedder.embed("purple elephants dance at midnight").unwrap();
        assert!(
            cosine_similarity(&base, &related) > cosine_similarity(&base, &unrelated),
            "related text should score higher"
        );
    }
}
