//! Image diffusion service interface.
//!
//! Schedulers are parameterized by name only; the numerical schedules live in
//! the backends that need them.

use crate::error::{Result, RuntimeError};
use crate::service::ServiceInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerKind {
    #[serde(rename = "dpm++")]
    DpmPlusPlus,
    #[serde(rename = "euler")]
    Euler,
    #[serde(rename = "euler_a")]
    EulerAncestral,
    #[serde(rename = "ddim")]
    Ddim,
    #[serde(rename = "lcm")]
    Lcm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffusionMode {
    Txt2img,
    Img2img,
    Inpaint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffusionOptions {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    /// -1 draws a random seed in the backend.
    pub seed: i64,
    pub scheduler: SchedulerKind,
    pub mode: DiffusionMode,
    /// Raw RGB init image for img2img / inpaint.
    pub init_image: Option<Vec<u8>>,
    /// Mask for inpaint mode.
    pub mask: Option<Vec<u8>>,
}

impl Default for DiffusionOptions {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            width: 512,
            height: 512,
            steps: 20,
            guidance: 7.5,
            seed: -1,
            scheduler: SchedulerKind::Euler,
            mode: DiffusionMode::Txt2img,
            init_image: None,
            mask: None,
        }
    }
}

impl DiffusionOptions {
    pub fn validate(&self) -> Result<()> {
        if self.prompt.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty prompt".into()));
        }
        if self.width == 0 || self.height == 0 || self.steps == 0 {
            return Err(RuntimeError::InvalidArgument(
                "width, height and steps must be > 0".into(),
            ));
        }
        if matches!(self.mode, DiffusionMode::Img2img | DiffusionMode::Inpaint)
            && self.init_image.is_none()
        {
            return Err(RuntimeError::InvalidArgument(format!(
                "{:?} requires init_image",
                self.mode
            )));
        }
        if self.mode == DiffusionMode::Inpaint && self.mask.is_none() {
            return Err(RuntimeError::InvalidArgument("inpaint requires mask".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageOutput {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// The seed actually used (resolved when the request passed -1).
    pub seed: i64,
}

/// Progress callback: (current_step, total_steps) → continue?
pub type ProgressFn<'a> = &'a mut dyn FnMut(u32, u32) -> bool;

/// Diffusion backend vtable.
pub trait ImageDiffusion: Send + Sync {
    fn generate(
        &self,
        options: &DiffusionOptions,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<ImageOutput>;

    fn cancel(&self) {}

    fn is_ready(&self) -> bool;

    fn info(&self) -> ServiceInfo {
        ServiceInfo::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_names_roundtrip() {
        let json = serde_json::to_string(&SchedulerKind::DpmPlusPlus).unwrap();
        assert_eq!(json, "\"dpm++\"");
        let back: SchedulerKind = serde_json::from_str("\"euler_a\"").unwrap();
        assert_eq!(back, SchedulerKind::EulerAncestral);
    }

    #[test]
    fn inpaint_requires_mask_and_init() {
        let mut opts = DiffusionOptions {
            prompt: "a crab".into(),
            mode: DiffusionMode::Inpaint,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
        opts.init_image = Some(vec![0; 512 * 512 * 3]);
        assert!(opts.validate().is_err());
        opts.mask = Some(vec![0; 512 * 512]);
        assert!(opts.validate().is_ok());
    }
}
