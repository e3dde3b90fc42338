//! Vision-language service interface.

use crate::error::{Result, RuntimeError};
use crate::service::llm::{GenerationOptions, GenerationResult};
use crate::service::ServiceInfo;
use serde::{Deserialize, Serialize};

/// Image payload variants accepted at the ABI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageInput {
    FilePath { path: String },
    Rgb { data: Vec<u8>, width: u32, height: u32 },
    Base64 { data: String },
}

impl ImageInput {
    pub fn validate(&self) -> Result<()> {
        match self {
            ImageInput::FilePath { path } if path.is_empty() => {
                Err(RuntimeError::InvalidArgument("empty image path".into()))
            }
            ImageInput::Rgb { data, width, height } => {
                let expected = (*width as usize) * (*height as usize) * 3;
                if data.len() != expected {
                    return Err(RuntimeError::InvalidArgument(format!(
                        "rgb buffer is {} bytes, expected {expected} for {width}x{height}",
                        data.len()
                    )));
                }
                Ok(())
            }
            ImageInput::Base64 { data } if data.is_empty() => {
                Err(RuntimeError::InvalidArgument("empty base64 image".into()))
            }
            _ => Ok(()),
        }
    }
}

/// VLM backend vtable.
pub trait VisionLanguage: Send + Sync {
    fn process(
        &self,
        image: &ImageInput,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult>;

    fn cancel(&self) {}

    fn is_ready(&self) -> bool;

    fn info(&self) -> ServiceInfo {
        ServiceInfo::default()
    }
}
