//! Text-to-speech service interface.

use crate::audio::AudioBuffer;
use crate::error::Result;
use crate::service::ServiceInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisOptions {
    pub voice_id: Option<String>,
    /// Speaking rate multiplier (1.0 = normal).
    pub rate: f32,
    pub pitch: f32,
    pub sample_rate: u32,
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            voice_id: None,
            rate: 1.0,
            pitch: 1.0,
            sample_rate: 22_050,
            extra: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub language: String,
}

/// TTS backend vtable.
pub trait TextToSpeech: Send + Sync {
    fn synthesize(&self, text: &str, options: &SynthesisOptions) -> Result<AudioBuffer>;

    /// Streaming synthesis: float PCM chunks flow through `on_chunk`;
    /// returning `false` requests cancellation.
    fn synthesize_stream(
        &self,
        text: &str,
        options: &SynthesisOptions,
        on_chunk: &mut dyn FnMut(&[f32]) -> bool,
    ) -> Result<()> {
        let audio = self.synthesize(text, options)?;
        let _ = on_chunk(&audio.samples);
        Ok(())
    }

    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    fn cancel(&self) {}

    fn is_ready(&self) -> bool;

    fn info(&self) -> ServiceInfo {
        ServiceInfo::default()
    }
}
