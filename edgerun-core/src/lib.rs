//! Edgerun Core - on-device inference runtime behind a stable C ABI
//!
//! Design principles:
//! - One uniform capability model (LLM, STT, TTS, VAD, embeddings, VLM,
//!   diffusion, wake word) behind per-capability vtables
//! - Backends register as providers; selection by framework hint + priority
//! - Blocking calls + callback triples at every seam, identical across
//!   embedding languages (no async across the ABI)
//! - Cooperative cancellation via per-component cancel flags
//! - All I/O through an injected platform adapter
//! - Structured events and benchmark timing from the ground up

pub mod audio;
pub mod benchmark;
pub mod component;
pub mod error;
pub mod events;
pub mod ffi;
pub mod handle;
pub mod index;
pub mod platform;
pub mod rag;
pub mod registry;
pub mod service;
pub mod streaming;
pub mod voice;

pub use audio::AudioBuffer;
pub use benchmark::{BenchmarkTiming, StatsCollector};
pub use component::{Component, LifecycleState, StreamCallbacks};
pub use error::{Result, RuntimeError};
pub use events::{EventCategory, EventSeverity};
pub use handle::{Handle, HandleType};
pub use index::{Bm25Index, DistanceMetric, FlatIndex, HnswIndex, MemoryIndexObject, VectorIndex};
pub use rag::{RagConfig, RagPipeline};
pub use registry::models::{Capability, Framework, ModelDescriptor};
pub use registry::providers::{ProviderFactory, ProviderRegistration, ServiceConfig};
pub use service::ServiceInstance;
pub use streaming::CancelToken;
pub use voice::{VoiceAgentConfig, VoiceAgentPipeline};

/// Initialize the runtime: registers the built-in providers. Idempotent.
/// The platform adapter is installed separately (`platform::install`).
pub fn init() {
    service::builtin::register_builtin_providers();
}

/// Tear down all global state: every handle is destroyed (quiescing
/// in-flight operations), event subscribers are unsubscribed, and the model
/// and provider registries are cleared. Primarily for embedder teardown and
/// test isolation.
pub fn shutdown() {
    handle::registry().clear();
    events::bus().clear();
    registry::models::models().clear();
    registry::providers::providers().clear();
}
