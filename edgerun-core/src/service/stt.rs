//! Speech-to-text service interface.

use crate::error::{Result, RuntimeError};
use crate::service::ServiceInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionOptions {
    /// Language code ("en", "de", …) or `None` for auto-detection.
    pub language: Option<String>,
    pub translate: bool,
    #[serde(default)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_ms: f64,
    pub end_ms: f64,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: Option<String>,
    pub confidence: f32,
    pub segments: Vec<TranscriptSegment>,
}

/// Partial hypothesis emitted during streaming transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialTranscript {
    pub text: String,
    pub is_final: bool,
}

/// STT backend vtable.
pub trait SpeechToText: Send + Sync {
    fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        options: &TranscriptionOptions,
    ) -> Result<TranscriptionResult>;

    /// Streaming transcription over a complete buffer. Partials flow through
    /// `on_partial`; returning `false` requests cancellation. The final
    /// result is returned, not delivered through the callback.
    fn transcribe_stream(
        &self,
        samples: &[f32],
        sample_rate: u32,
        options: &TranscriptionOptions,
        on_partial: &mut dyn FnMut(&PartialTranscript) -> bool,
    ) -> Result<TranscriptionResult> {
        let result = self.transcribe(samples, sample_rate, options)?;
        let _ = on_partial(&PartialTranscript {
            text: result.text.clone(),
            is_final: true,
        });
        Ok(result)
    }

    /// Open a push-based streaming session for incremental decoding.
    fn create_stream(&self) -> Result<Box<dyn SttStream>> {
        Err(RuntimeError::NotImplemented("stt streaming session"))
    }

    fn cancel(&self) {}

    fn is_ready(&self) -> bool;

    fn info(&self) -> ServiceInfo {
        ServiceInfo::default()
    }
}

/// Push-based incremental decoding session: feed audio chunks, poll for
/// decodable state and endpoints, pull transcripts.
pub trait SttStream: Send {
    fn feed_audio(&mut self, samples: &[f32], sample_rate: u32) -> Result<()>;

    /// Whether enough audio has accumulated for `decode` to make progress.
    fn is_ready(&self) -> bool;

    fn decode(&mut self) -> Result<String>;

    /// Whether the decoder believes the utterance has ended.
    fn is_endpoint(&self) -> bool;

    /// Signal that no more audio will arrive.
    fn input_finished(&mut self);

    fn reset(&mut self);
}
