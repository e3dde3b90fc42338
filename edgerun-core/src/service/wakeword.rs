//! Wake-word detection service interface.

use crate::error::Result;
use crate::service::ServiceInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeDetection {
    pub phrase: String,
    pub score: f32,
}

/// Wake-word backend vtable.
pub trait WakeWord: Send + Sync {
    /// Scan a buffer; returns the detection when a keyword fired.
    fn process(&self, samples: &[f32], sample_rate: u32) -> Result<Option<WakeDetection>>;

    fn set_keywords(&self, keywords: &[String]) -> Result<()>;

    fn reset(&self);

    fn is_ready(&self) -> bool;

    fn info(&self) -> ServiceInfo {
        ServiceInfo::default()
    }
}
