//! Runtime error taxonomy.
//!
//! Every fallible operation in the core returns [`RuntimeError`]. The C ABI
//! maps each kind to a stable negative result code; `0` is success. Codes
//! never change meaning between releases; bindings hardcode them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("null pointer: {0}")]
    NullPointer(&'static str),

    #[error("invalid handle: {0}")]
    InvalidHandle(u64),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("component busy: another call is in flight")]
    ComponentBusy,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("no provider for capability {capability} (framework hint: {hint})")]
    ProviderNotFound { capability: String, hint: String },

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("platform adapter not configured: {0} required")]
    PlatformNotConfigured(&'static str),

    #[error("format error: {0}")]
    FormatError(String),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl RuntimeError {
    /// Stable negative result code for the C ABI. 0 is success.
    pub fn code(&self) -> i32 {
        match self {
            RuntimeError::InvalidArgument(_) => -1,
            RuntimeError::NullPointer(_) => -2,
            RuntimeError::InvalidHandle(_) => -3,
            RuntimeError::InvalidState(_) => -4,
            RuntimeError::ComponentBusy => -5,
            RuntimeError::ModelNotFound(_) => -6,
            RuntimeError::ModelLoadFailed(_) => -7,
            RuntimeError::InferenceFailed(_) => -8,
            RuntimeError::Cancelled => -9,
            RuntimeError::ProviderNotFound { .. } => -10,
            RuntimeError::OutOfMemory(_) => -11,
            RuntimeError::Io(_) => -12,
            RuntimeError::PlatformNotConfigured(_) => -13,
            RuntimeError::FormatError(_) => -14,
            RuntimeError::NotImplemented(_) => -15,
        }
    }

    /// Short machine-readable kind name used in error event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::InvalidArgument(_) => "invalid_argument",
            RuntimeError::NullPointer(_) => "null_pointer",
            RuntimeError::InvalidHandle(_) => "invalid_handle",
            RuntimeError::InvalidState(_) => "invalid_state",
            RuntimeError::ComponentBusy => "component_busy",
            RuntimeError::ModelNotFound(_) => "model_not_found",
            RuntimeError::ModelLoadFailed(_) => "model_load_failed",
            RuntimeError::InferenceFailed(_) => "inference_failed",
            RuntimeError::Cancelled => "cancelled",
            RuntimeError::ProviderNotFound { .. } => "provider_not_found",
            RuntimeError::OutOfMemory(_) => "out_of_memory",
            RuntimeError::Io(_) => "io_error",
            RuntimeError::PlatformNotConfigured(_) => "platform_not_configured",
            RuntimeError::FormatError(_) => "format_error",
            RuntimeError::NotImplemented(_) => "not_implemented",
        }
    }

    /// Cancellation is an expected outcome, not a failure worth an error event.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RuntimeError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_distinct() {
        let errors = vec![
            RuntimeError::InvalidArgument("x".into()),
            RuntimeError::NullPointer("p"),
            RuntimeError::InvalidHandle(1),
            RuntimeError::InvalidState("s".into()),
            RuntimeError::ComponentBusy,
            RuntimeError::ModelNotFound("m".into()),
            RuntimeError::ModelLoadFailed("m".into()),
            RuntimeError::InferenceFailed("i".into()),
            RuntimeError::Cancelled,
            RuntimeError::ProviderNotFound {
                capability: "stt".into(),
                hint: "onnx".into(),
            },
            RuntimeError::OutOfMemory("o".into()),
            RuntimeError::Io("io".into()),
            RuntimeError::PlatformNotConfigured("file_read"),
            RuntimeError::FormatError("f".into()),
            RuntimeError::NotImplemented("n"),
        ];
        let mut seen = std::collections::HashSet::new();
        for e in &errors {
            assert!(e.code() < 0, "{e} has non-negative code");
            assert!(seen.insert(e.code()), "duplicate code for {e}");
        }
    }

    #[test]
    fn cancellation_is_not_an_error_kind() {
        assert!(RuntimeError::Cancelled.is_cancellation());
        assert!(!RuntimeError::ComponentBusy.is_cancellation());
    }
}
