//! Text generation service interface.

use crate::benchmark::BenchmarkTiming;
use crate::error::{Result, RuntimeError};
use crate::service::ServiceInfo;
use crate::streaming::TokenStream;
use serde::{Deserialize, Serialize};

/// Sampling and decoding options for one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// 0 disables top-k filtering.
    pub top_k: u32,
    pub repetition_penalty: f32,
    pub stop_sequences: Vec<String>,
    pub system_prompt: Option<String>,
    pub streaming_enabled: bool,
    /// Opaque backend-specific parameters.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repetition_penalty: 1.1,
            stop_sequences: Vec::new(),
            system_prompt: None,
            streaming_enabled: false,
            extra: serde_json::Value::Null,
        }
    }
}

impl GenerationOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens < 1 {
            return Err(RuntimeError::InvalidArgument(
                "max_tokens must be >= 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RuntimeError::InvalidArgument(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(RuntimeError::InvalidArgument(format!(
                "top_p {} outside (0, 1]",
                self.top_p
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
    Cancelled,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Cancelled => "cancelled",
            FinishReason::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_time_ms: f64,
    pub tokens_per_second: f64,
    pub finish_reason: FinishReason,
    pub timing: BenchmarkTiming,
}

impl Default for GenerationResult {
    fn default() -> Self {
        Self {
            text: String::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_time_ms: 0.0,
            tokens_per_second: 0.0,
            finish_reason: FinishReason::Stop,
            timing: BenchmarkTiming::default(),
        }
    }
}

/// LLM backend vtable.
///
/// Session-context methods (`append_context`, `inject_system_prompt`,
/// `probe_confidence`, `generate_from_context`) exist for KV-cache-capable
/// backends; the RAG pipeline drives them. Backends without a session cache
/// may leave the defaults, which report `NotImplemented`.
pub trait TextGeneration: Send + Sync {
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<GenerationResult>;

    /// Streaming generation. The backend pushes tokens into `stream` and
    /// stops producing when a push returns `false`. Returns the final result;
    /// the component layer fires the terminal callback.
    fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        stream: &mut TokenStream<'_>,
    ) -> Result<GenerationResult>;

    /// Append text to the backend's session context (KV cache).
    fn append_context(&self, text: &str) -> Result<()> {
        let _ = text;
        Err(RuntimeError::NotImplemented("append_context"))
    }

    /// Clear the backend's session context.
    fn clear_context(&self) -> Result<()> {
        Ok(())
    }

    /// Prime the session with a system prompt. Returns `false` when the
    /// backend cannot inject into its cache (callers continue regardless).
    fn inject_system_prompt(&self, prompt: &str) -> Result<bool> {
        let _ = prompt;
        Ok(false)
    }

    /// Self-assessed answerability of `query` given the current session
    /// context, in [0, 1]. Drives the RAG adaptive accumulation loop.
    fn probe_confidence(&self, query: &str) -> Result<f32> {
        let _ = query;
        Err(RuntimeError::NotImplemented("probe_confidence"))
    }

    /// Generate continuing from the session context plus `suffix`.
    fn generate_from_context(
        &self,
        suffix: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult> {
        self.generate(suffix, options)
    }

    fn cancel(&self) {}

    fn is_ready(&self) -> bool;

    fn info(&self) -> ServiceInfo {
        ServiceInfo::default()
    }
}
