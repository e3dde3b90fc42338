//! Voice activity detection service interface.

use crate::error::Result;
use crate::service::ServiceInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub start_ms: f64,
    pub end_ms: f64,
}

/// VAD backend vtable.
pub trait VoiceActivity: Send + Sync {
    /// Classify a buffer as speech or not.
    fn process(&self, samples: &[f32], sample_rate: u32) -> Result<bool>;

    /// Locate speech segments within a buffer.
    fn detect_segments(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<SpeechSegment>>;

    fn set_threshold(&self, threshold: f32);

    fn reset(&self);

    fn is_ready(&self) -> bool;

    fn info(&self) -> ServiceInfo {
        ServiceInfo::default()
    }
}
