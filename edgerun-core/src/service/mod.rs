//! Capability service vtables.
//!
//! Each capability defines a trait; backends implement it and register a
//! factory with the provider registry. The core stores instances as a tagged
//! enum so the handle registry can check capability tags without RTTI.
//!
//! Implementations must be reentrant across distinct instances and serialize
//! internally on the same instance; the component layer additionally
//! guarantees one call at a time per component.

pub mod builtin;
pub mod diffusion;
pub mod embeddings;
pub mod llm;
pub mod stt;
pub mod tts;
pub mod vad;
pub mod vlm;
pub mod wakeword;

use crate::registry::models::{Capability, Framework};
use serde::Serialize;

/// Backend self-description, surfaced through `get_info` at the ABI.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub framework: Framework,
    pub model_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: "unnamed".into(),
            framework: Framework::Unknown,
            model_id: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// A live backend instance, tagged by capability.
pub enum ServiceInstance {
    TextGeneration(Box<dyn llm::TextGeneration>),
    Stt(Box<dyn stt::SpeechToText>),
    Tts(Box<dyn tts::TextToSpeech>),
    Vad(Box<dyn vad::VoiceActivity>),
    Embeddings(Box<dyn embeddings::Embeddings>),
    VisionLanguage(Box<dyn vlm::VisionLanguage>),
    Diffusion(Box<dyn diffusion::ImageDiffusion>),
    WakeWord(Box<dyn wakeword::WakeWord>),
}

impl ServiceInstance {
    pub fn capability(&self) -> Capability {
        match self {
            ServiceInstance::TextGeneration(_) => Capability::TextGeneration,
            ServiceInstance::Stt(_) => Capability::Stt,
            ServiceInstance::Tts(_) => Capability::Tts,
            ServiceInstance::Vad(_) => Capability::Vad,
            ServiceInstance::Embeddings(_) => Capability::Embeddings,
            ServiceInstance::VisionLanguage(_) => Capability::VisionLanguage,
            ServiceInstance::Diffusion(_) => Capability::Diffusion,
            ServiceInstance::WakeWord(_) => Capability::WakeWord,
        }
    }

    pub fn is_ready(&self) -> bool {
        match self {
            ServiceInstance::TextGeneration(s) => s.is_ready(),
            ServiceInstance::Stt(s) => s.is_ready(),
            ServiceInstance::Tts(s) => s.is_ready(),
            ServiceInstance::Vad(s) => s.is_ready(),
            ServiceInstance::Embeddings(s) => s.is_ready(),
            ServiceInstance::VisionLanguage(s) => s.is_ready(),
            ServiceInstance::Diffusion(s) => s.is_ready(),
            ServiceInstance::WakeWord(s) => s.is_ready(),
        }
    }

    /// Forward a cancellation request to the backend, if it supports one.
    /// Backends without a native cancel rely on the advisory cancel flag.
    pub fn cancel(&self) {
        match self {
            ServiceInstance::TextGeneration(s) => s.cancel(),
            ServiceInstance::Stt(s) => s.cancel(),
            ServiceInstance::Tts(s) => s.cancel(),
            ServiceInstance::Diffusion(s) => s.cancel(),
            ServiceInstance::VisionLanguage(s) => s.cancel(),
            // VAD, embeddings and wake word calls are short; nothing to cancel.
            _ => {}
        }
    }

    pub fn info(&self) -> ServiceInfo {
        match self {
            ServiceInstance::TextGeneration(s) => s.info(),
            ServiceInstance::Stt(s) => s.info(),
            ServiceInstance::Tts(s) => s.info(),
            ServiceInstance::Vad(s) => s.info(),
            ServiceInstance::Embeddings(s) => s.info(),
            ServiceInstance::VisionLanguage(s) => s.info(),
            ServiceInstance::Diffusion(s) => s.info(),
            ServiceInstance::WakeWord(s) => s.info(),
        }
    }
}
