//! Component lifecycle.
//!
//! A component owns one capability instance: the selected service, the loaded
//! model, a cancel flag, and the state machine that serializes calls:
//!
//! ```text
//! idle ──load──▶ loading ──ok──▶ ready ──call──▶ busy ──ok──▶ ready
//!                 │                │              │           │
//!                 │ fail           │ unload       │ cancel    │ err
//!                 ▼                ▼              ▼           ▼
//!               error ◀────────── idle        cancelling    error
//! ```
//!
//! While `busy`, further calls fail `ComponentBusy`; `cancel` is always
//! allowed, idempotent, callable from any thread, and returns immediately.
//! Transient call failures leave the component `ready`; load failures and
//! backend-corrupting failures park it in `error`, recoverable only through
//! `unload` or destroy.

use crate::benchmark::{BenchmarkStatus, StatsCollector};
use crate::error::{Result, RuntimeError};
use crate::events::{self, EventCategory, EventSeverity};
use crate::handle::{CoreObject, Handle, HandleType};
use crate::platform;
use crate::registry::models::{self, Capability, Framework, ModelDescriptor};
use crate::registry::providers::{self, ServiceConfig};
use crate::service::llm::{FinishReason, GenerationOptions, GenerationResult};
use crate::service::stt::{
    PartialTranscript, SttStream, TranscriptionOptions, TranscriptionResult,
};
use crate::service::tts::{SynthesisOptions, Voice};
use crate::service::vad::SpeechSegment;
use crate::service::vlm::ImageInput;
use crate::service::{ServiceInfo, ServiceInstance};
use crate::streaming::{CancelToken, TokenStream};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Loading,
    Ready,
    Busy,
    Cancelling,
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Loading => "loading",
            LifecycleState::Ready => "ready",
            LifecycleState::Busy => "busy",
            LifecycleState::Cancelling => "cancelling",
            LifecycleState::Error => "error",
        }
    }
}

/// Callback triple for streaming generation. Exactly one of `on_complete` /
/// `on_error` fires, after the last `on_token`.
pub struct StreamCallbacks {
    pub on_token: Box<dyn FnMut(&str) -> bool + Send>,
    pub on_complete: Box<dyn FnOnce(GenerationResult) + Send>,
    pub on_error: Box<dyn FnOnce(&RuntimeError) + Send>,
}

struct Inner {
    state: LifecycleState,
    service: Option<Arc<ServiceInstance>>,
    model: Option<Arc<ModelDescriptor>>,
    active_operation: Option<u64>,
}

pub struct Component {
    handle: OnceCell<Handle>,
    capability: Capability,
    inner: Mutex<Inner>,
    state_changed: Condvar,
    cancel: CancelToken,
    stats: StatsCollector,
    next_operation: AtomicU64,
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("capability", &self.capability)
            .finish()
    }
}

impl Component {
    /// Create a component and register it in the handle registry.
    pub fn create(capability: Capability) -> (Arc<Component>, Handle) {
        let component = Arc::new(Component::new(capability));
        let handle = crate::handle::registry().register(
            CoreObject::Component(component.clone()),
            HandleType::Component(capability),
        );
        let _ = component.handle.set(handle);
        (component, handle)
    }

    fn new(capability: Capability) -> Self {
        Self {
            handle: OnceCell::new(),
            capability,
            inner: Mutex::new(Inner {
                state: LifecycleState::Idle,
                service: None,
                model: None,
                active_operation: None,
            }),
            state_changed: Condvar::new(),
            cancel: CancelToken::new(),
            stats: StatsCollector::new(),
            next_operation: AtomicU64::new(1),
        }
    }

    /// Wrap a pre-built service instance, bypassing provider selection.
    /// The component starts in `ready`. For embedders supplying their own
    /// backend objects, and for tests.
    pub fn with_service(capability: Capability, service: ServiceInstance) -> (Arc<Component>, Handle) {
        let (component, handle) = Self::create(capability);
        {
            let mut inner = component.inner.lock();
            inner.service = Some(Arc::new(service));
            inner.state = LifecycleState::Ready;
        }
        component.emit_state(LifecycleState::Idle, LifecycleState::Ready);
        (component, handle)
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn handle(&self) -> Handle {
        *self.handle.get().expect("component not registered")
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn model(&self) -> Option<Arc<ModelDescriptor>> {
        self.inner.lock().model.clone()
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub fn service_info(&self) -> Result<ServiceInfo> {
        Ok(self.service()?.info())
    }

    /// The live service. Requires a loaded component.
    pub fn service(&self) -> Result<Arc<ServiceInstance>> {
        self.inner
            .lock()
            .service
            .clone()
            .ok_or_else(|| RuntimeError::InvalidState("component has no loaded service".into()))
    }

    // ─── Load / unload ────────────────────────────────────────────────────────

    /// Resolve the model, select a provider, and bring the component to
    /// `ready`. Loading the already-loaded model is a no-op; a different
    /// model triggers an implicit unload + reload. Concurrent loads are
    /// serialized on the state machine.
    pub fn load(
        &self,
        model_ref: &str,
        framework_hint: Option<Framework>,
        config: &ServiceConfig,
    ) -> Result<()> {
        if model_ref.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty model reference".into()));
        }

        {
            let mut inner = self.inner.lock();
            while inner.state == LifecycleState::Loading {
                self.state_changed.wait(&mut inner);
            }
            match inner.state {
                LifecycleState::Busy | LifecycleState::Cancelling => {
                    return Err(RuntimeError::ComponentBusy);
                }
                LifecycleState::Ready => {
                    let same = inner
                        .model
                        .as_ref()
                        .map(|m| m.model_id == model_ref || m.local_path.as_deref() == Some(model_ref))
                        .unwrap_or(false);
                    if same {
                        return Ok(());
                    }
                    // Implicit unload before reloading with a different model.
                    inner.service = None;
                    inner.model = None;
                }
                LifecycleState::Idle | LifecycleState::Error => {}
                LifecycleState::Loading => unreachable!(),
            }
            let from = inner.state;
            inner.state = LifecycleState::Loading;
            drop(inner);
            self.emit_state(from, LifecycleState::Loading);
        }

        let outcome = self.load_inner(model_ref, framework_hint, config);

        let mut inner = self.inner.lock();
        match outcome {
            Ok((service, model)) => {
                inner.service = Some(service);
                inner.model = Some(model);
                inner.state = LifecycleState::Ready;
                self.state_changed.notify_all();
                drop(inner);
                self.emit_state(LifecycleState::Loading, LifecycleState::Ready);
                Ok(())
            }
            Err(err) => {
                inner.service = None;
                inner.model = None;
                inner.state = LifecycleState::Error;
                self.state_changed.notify_all();
                drop(inner);
                self.emit_state(LifecycleState::Loading, LifecycleState::Error);
                events::emit_error(&err, Some(self.handle().raw()), "load");
                Err(err)
            }
        }
    }

    fn load_inner(
        &self,
        model_ref: &str,
        framework_hint: Option<Framework>,
        config: &ServiceConfig,
    ) -> Result<(Arc<ServiceInstance>, Arc<ModelDescriptor>)> {
        let model = models::resolve(model_ref, self.capability)?;
        let provider =
            providers::providers().select(self.capability, framework_hint, &model)?;
        platform::log(
            platform::LogLevel::Info,
            "component",
            &format!(
                "loading {} via {} for {}",
                model.model_id, provider.provider_id, self.capability
            ),
        );
        let service = provider.factory.create(&model, config)?;
        if service.capability() != self.capability {
            return Err(RuntimeError::ModelLoadFailed(format!(
                "provider {} produced a {} service for a {} component",
                provider.provider_id,
                service.capability(),
                self.capability
            )));
        }
        Ok((Arc::new(service), model))
    }

    /// Tear the backend down and return to `idle` from any state. A running
    /// operation is cancelled first and allowed to finish.
    pub fn unload(&self) {
        self.cancel.cancel();
        if let Ok(service) = self.service() {
            service.cancel();
        }
        let mut inner = self.inner.lock();
        while matches!(
            inner.state,
            LifecycleState::Busy | LifecycleState::Cancelling | LifecycleState::Loading
        ) {
            self.state_changed.wait(&mut inner);
        }
        let from = inner.state;
        inner.service = None;
        inner.model = None;
        inner.state = LifecycleState::Idle;
        self.cancel.reset();
        self.state_changed.notify_all();
        drop(inner);
        if from != LifecycleState::Idle {
            self.emit_state(from, LifecycleState::Idle);
        }
    }

    /// Cancel the in-flight operation, if any. Idempotent; returns
    /// immediately without waiting for the operation to observe the flag.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let mut inner = self.inner.lock();
        if inner.state == LifecycleState::Busy {
            inner.state = LifecycleState::Cancelling;
            let service = inner.service.clone();
            drop(inner);
            if let Some(service) = service {
                service.cancel();
            }
            self.emit_state(LifecycleState::Busy, LifecycleState::Cancelling);
        }
    }

    /// Release everything. Called by the handle registry on destroy, after
    /// the handle has been removed from the table.
    pub fn shutdown(&self) {
        self.unload();
    }

    // ─── Call plumbing ────────────────────────────────────────────────────────

    fn begin_call(&self, operation: &str) -> Result<(Arc<ServiceInstance>, u64)> {
        let mut inner = self.inner.lock();
        match inner.state {
            LifecycleState::Ready => {}
            LifecycleState::Busy | LifecycleState::Cancelling => {
                return Err(RuntimeError::ComponentBusy)
            }
            state => {
                return Err(RuntimeError::InvalidState(format!(
                    "{operation} requires ready, component is {}",
                    state.as_str()
                )))
            }
        }
        let service = inner
            .service
            .clone()
            .ok_or_else(|| RuntimeError::InvalidState("component has no loaded service".into()))?;
        let op_id = self.next_operation.fetch_add(1, Ordering::Relaxed);
        inner.state = LifecycleState::Busy;
        inner.active_operation = Some(op_id);
        // A cancel issued while no call was in flight does not apply to this
        // call.
        self.cancel.reset();
        drop(inner);
        self.emit_state(LifecycleState::Ready, LifecycleState::Busy);
        Ok((service, op_id))
    }

    fn end_call(&self, corrupted: bool) {
        let mut inner = self.inner.lock();
        let from = inner.state;
        inner.active_operation = None;
        inner.state = if corrupted {
            LifecycleState::Error
        } else {
            LifecycleState::Ready
        };
        self.cancel.reset();
        let to = inner.state;
        self.state_changed.notify_all();
        drop(inner);
        self.emit_state(from, to);
    }

    /// Run one non-streaming vtable operation under the busy state, with
    /// start/complete events.
    fn run_op<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&ServiceInstance) -> Result<T>,
    ) -> Result<T> {
        let (service, op_id) = self.begin_call(operation)?;
        self.emit_inference("inference_start", operation, op_id, None);

        let outcome = f(&service);

        match &outcome {
            Ok(_) => {
                self.end_call(false);
                self.emit_inference("inference_complete", operation, op_id, None);
            }
            Err(err) => {
                // Transient failures leave the component ready; only
                // explicitly backend-corrupting failures park it in error.
                self.end_call(matches!(err, RuntimeError::ModelLoadFailed(_)));
                if err.is_cancellation() {
                    self.emit_inference("inference_complete", operation, op_id, Some("cancelled"));
                } else {
                    events::emit_error(err, Some(self.handle().raw()), operation);
                }
            }
        }
        outcome
    }

    fn ensure_cancelled_checked<T>(&self, value: T) -> Result<T> {
        if self.cancel.is_cancelled() {
            Err(RuntimeError::Cancelled)
        } else {
            Ok(value)
        }
    }

    // ─── Text generation ──────────────────────────────────────────────────────

    pub fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<GenerationResult> {
        if prompt.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty prompt".into()));
        }
        options.validate()?;

        let t0 = platform::now_ms();
        let mut result = self.run_op("generate", |service| match service {
            ServiceInstance::TextGeneration(svc) => {
                let r = svc.generate(prompt, options)?;
                self.ensure_cancelled_checked(r)
            }
            _ => Err(RuntimeError::InvalidState("not a text generation component".into())),
        })?;
        self.finalize_timing(&mut result, t0, BenchmarkStatus::Success);
        Ok(result)
    }

    /// Streaming generation. Runs on the calling thread; exactly one of
    /// `on_complete` / `on_error` fires after the last `on_token`. Returns
    /// `Ok` once a terminal callback has fired; pre-flight failures (invalid
    /// arguments, wrong state, busy) are returned directly and fire nothing.
    pub fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        callbacks: StreamCallbacks,
    ) -> Result<()> {
        if prompt.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty prompt".into()));
        }
        options.validate()?;

        let StreamCallbacks {
            on_token,
            on_complete,
            on_error,
        } = callbacks;

        let (service, op_id) = self.begin_call("generate_stream")?;
        self.emit_inference("inference_start", "generate_stream", op_id, None);

        let t0 = platform::now_ms();
        let mut stream = TokenStream::new(self.cancel.clone(), on_token);
        let outcome = match &*service {
            ServiceInstance::TextGeneration(svc) => {
                svc.generate_stream(prompt, options, &mut stream)
            }
            _ => Err(RuntimeError::InvalidState("not a text generation component".into())),
        };
        let delivered = stream.delivered();
        let was_cancelled = stream.is_cancelled();
        stream.finish();

        match outcome {
            Ok(mut result) => {
                let status = if was_cancelled {
                    result.finish_reason = FinishReason::Cancelled;
                    result.completion_tokens = delivered;
                    BenchmarkStatus::Cancelled
                } else {
                    BenchmarkStatus::Success
                };
                self.finalize_timing(&mut result, t0, status);
                self.end_call(false);
                self.emit_inference(
                    "inference_complete",
                    "generate_stream",
                    op_id,
                    Some(result.finish_reason.as_str()),
                );
                on_complete(result);
                Ok(())
            }
            Err(err) if err.is_cancellation() => {
                let mut result = GenerationResult {
                    finish_reason: FinishReason::Cancelled,
                    completion_tokens: delivered,
                    ..Default::default()
                };
                self.finalize_timing(&mut result, t0, BenchmarkStatus::Cancelled);
                self.end_call(false);
                self.emit_inference("inference_complete", "generate_stream", op_id, Some("cancelled"));
                on_complete(result);
                Ok(())
            }
            Err(err) => {
                self.end_call(matches!(err, RuntimeError::ModelLoadFailed(_)));
                events::emit_error(&err, Some(self.handle().raw()), "generate_stream");
                on_error(&err);
                Ok(())
            }
        }
    }

    fn finalize_timing(&self, result: &mut GenerationResult, t0: i64, status: BenchmarkStatus) {
        let timing = &mut result.timing;
        if timing.t0_request_start_ms == 0 {
            timing.t0_request_start_ms = t0;
        }
        timing.t6_request_end_ms = platform::now_ms();
        timing.status = status;
        if timing.prompt_tokens == 0 {
            timing.prompt_tokens = result.prompt_tokens as i32;
        }
        if timing.output_tokens == 0 {
            timing.output_tokens = result.completion_tokens as i32;
        }
        result.total_time_ms = timing.e2e_ms();
        result.tokens_per_second = timing.decode_tps();
        self.stats.record(timing);
    }

    // Session-context operations used by the RAG pipeline.

    pub fn append_context(&self, text: &str) -> Result<()> {
        self.run_op("append_context", |service| match service {
            ServiceInstance::TextGeneration(svc) => svc.append_context(text),
            _ => Err(RuntimeError::InvalidState("not a text generation component".into())),
        })
    }

    pub fn clear_context(&self) -> Result<()> {
        self.run_op("clear_context", |service| match service {
            ServiceInstance::TextGeneration(svc) => svc.clear_context(),
            _ => Err(RuntimeError::InvalidState("not a text generation component".into())),
        })
    }

    pub fn inject_system_prompt(&self, prompt: &str) -> Result<bool> {
        self.run_op("inject_system_prompt", |service| match service {
            ServiceInstance::TextGeneration(svc) => svc.inject_system_prompt(prompt),
            _ => Err(RuntimeError::InvalidState("not a text generation component".into())),
        })
    }

    pub fn probe_confidence(&self, query: &str) -> Result<f32> {
        self.run_op("probe_confidence", |service| match service {
            ServiceInstance::TextGeneration(svc) => svc.probe_confidence(query),
            _ => Err(RuntimeError::InvalidState("not a text generation component".into())),
        })
    }

    pub fn generate_from_context(
        &self,
        suffix: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult> {
        let t0 = platform::now_ms();
        let mut result = self.run_op("generate_from_context", |service| match service {
            ServiceInstance::TextGeneration(svc) => svc.generate_from_context(suffix, options),
            _ => Err(RuntimeError::InvalidState("not a text generation component".into())),
        })?;
        self.finalize_timing(&mut result, t0, BenchmarkStatus::Success);
        Ok(result)
    }

    // ─── Speech to text ───────────────────────────────────────────────────────

    pub fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        options: &TranscriptionOptions,
    ) -> Result<TranscriptionResult> {
        if samples.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty audio buffer".into()));
        }
        self.run_op("transcribe", |service| match service {
            ServiceInstance::Stt(svc) => svc.transcribe(samples, sample_rate, options),
            _ => Err(RuntimeError::InvalidState("not an stt component".into())),
        })
    }

    pub fn transcribe_stream(
        &self,
        samples: &[f32],
        sample_rate: u32,
        options: &TranscriptionOptions,
        on_partial: &mut dyn FnMut(&PartialTranscript) -> bool,
    ) -> Result<TranscriptionResult> {
        if samples.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty audio buffer".into()));
        }
        self.run_op("transcribe_stream", |service| match service {
            ServiceInstance::Stt(svc) => {
                svc.transcribe_stream(samples, sample_rate, options, on_partial)
            }
            _ => Err(RuntimeError::InvalidState("not an stt component".into())),
        })
    }

    /// Open a push-based STT stream session. The session gets its own handle
    /// and must be destroyed by the caller.
    pub fn create_stt_stream(&self) -> Result<(Arc<parking_lot::Mutex<Box<dyn SttStream>>>, Handle)> {
        let session = self.run_op("create_stream", |service| match service {
            ServiceInstance::Stt(svc) => svc.create_stream(),
            _ => Err(RuntimeError::InvalidState("not an stt component".into())),
        })?;
        let session = Arc::new(parking_lot::Mutex::new(session));
        let handle = crate::handle::registry()
            .register(CoreObject::SttStream(session.clone()), HandleType::SttStream);
        Ok((session, handle))
    }

    // ─── Text to speech ───────────────────────────────────────────────────────

    pub fn synthesize(&self, text: &str, options: &SynthesisOptions) -> Result<crate::audio::AudioBuffer> {
        if text.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty text".into()));
        }
        self.run_op("synthesize", |service| match service {
            ServiceInstance::Tts(svc) => {
                let audio = svc.synthesize(text, options)?;
                self.ensure_cancelled_checked(audio)
            }
            _ => Err(RuntimeError::InvalidState("not a tts component".into())),
        })
    }

    pub fn synthesize_stream(
        &self,
        text: &str,
        options: &SynthesisOptions,
        on_chunk: &mut dyn FnMut(&[f32]) -> bool,
    ) -> Result<()> {
        if text.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty text".into()));
        }
        let cancel = self.cancel.clone();
        self.run_op("synthesize_stream", |service| match service {
            ServiceInstance::Tts(svc) => {
                let mut gated = |chunk: &[f32]| -> bool {
                    if cancel.is_cancelled() {
                        return false;
                    }
                    on_chunk(chunk)
                };
                svc.synthesize_stream(text, options, &mut gated)
            }
            _ => Err(RuntimeError::InvalidState("not a tts component".into())),
        })
    }

    pub fn voices(&self) -> Result<Vec<Voice>> {
        let service = self.service()?;
        match &*service {
            ServiceInstance::Tts(svc) => Ok(svc.voices()),
            _ => Err(RuntimeError::InvalidState("not a tts component".into())),
        }
    }

    // ─── Voice activity ───────────────────────────────────────────────────────

    pub fn vad_process(&self, samples: &[f32], sample_rate: u32) -> Result<bool> {
        self.run_op("vad_process", |service| match service {
            ServiceInstance::Vad(svc) => svc.process(samples, sample_rate),
            _ => Err(RuntimeError::InvalidState("not a vad component".into())),
        })
    }

    pub fn vad_detect_segments(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Vec<SpeechSegment>> {
        self.run_op("detect_segments", |service| match service {
            ServiceInstance::Vad(svc) => svc.detect_segments(samples, sample_rate),
            _ => Err(RuntimeError::InvalidState("not a vad component".into())),
        })
    }

    pub fn vad_set_threshold(&self, threshold: f32) -> Result<()> {
        let service = self.service()?;
        match &*service {
            ServiceInstance::Vad(svc) => {
                svc.set_threshold(threshold);
                Ok(())
            }
            _ => Err(RuntimeError::InvalidState("not a vad component".into())),
        }
    }

    pub fn vad_reset(&self) -> Result<()> {
        let service = self.service()?;
        match &*service {
            ServiceInstance::Vad(svc) => {
                svc.reset();
                Ok(())
            }
            _ => Err(RuntimeError::InvalidState("not a vad component".into())),
        }
    }

    // ─── Embeddings ───────────────────────────────────────────────────────────

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty text".into()));
        }
        self.run_op("embed", |service| match service {
            ServiceInstance::Embeddings(svc) => svc.embed(text),
            _ => Err(RuntimeError::InvalidState("not an embeddings component".into())),
        })
    }

    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.run_op("embed_batch", |service| match service {
            ServiceInstance::Embeddings(svc) => svc.embed_batch(texts),
            _ => Err(RuntimeError::InvalidState("not an embeddings component".into())),
        })
    }

    pub fn embedding_dimension(&self) -> Result<usize> {
        let service = self.service()?;
        match &*service {
            ServiceInstance::Embeddings(svc) => Ok(svc.dimension()),
            _ => Err(RuntimeError::InvalidState("not an embeddings component".into())),
        }
    }

    // ─── Vision language ──────────────────────────────────────────────────────

    pub fn vlm_process(
        &self,
        image: &ImageInput,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult> {
        if prompt.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty prompt".into()));
        }
        image.validate()?;
        options.validate()?;
        let t0 = platform::now_ms();
        let mut result = self.run_op("vlm_process", |service| match service {
            ServiceInstance::VisionLanguage(svc) => svc.process(image, prompt, options),
            _ => Err(RuntimeError::InvalidState("not a vision language component".into())),
        })?;
        self.finalize_timing(&mut result, t0, BenchmarkStatus::Success);
        Ok(result)
    }

    // ─── Diffusion ────────────────────────────────────────────────────────────

    pub fn diffusion_generate(
        &self,
        options: &crate::service::diffusion::DiffusionOptions,
        mut progress: Option<&mut dyn FnMut(u32, u32) -> bool>,
    ) -> Result<crate::service::diffusion::ImageOutput> {
        options.validate()?;
        let cancel = self.cancel.clone();
        self.run_op("diffusion_generate", |service| match service {
            ServiceInstance::Diffusion(svc) => {
                let mut gated = |step: u32, total: u32| -> bool {
                    if cancel.is_cancelled() {
                        return false;
                    }
                    progress.as_mut().map_or(true, |p| p(step, total))
                };
                svc.generate(options, Some(&mut gated))
            }
            _ => Err(RuntimeError::InvalidState("not a diffusion component".into())),
        })
    }

    // ─── Wake word ────────────────────────────────────────────────────────────

    pub fn wakeword_process(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Option<crate::service::wakeword::WakeDetection>> {
        self.run_op("wakeword_process", |service| match service {
            ServiceInstance::WakeWord(svc) => svc.process(samples, sample_rate),
            _ => Err(RuntimeError::InvalidState("not a wake word component".into())),
        })
    }

    // ─── Events ───────────────────────────────────────────────────────────────

    fn emit_state(&self, from: LifecycleState, to: LifecycleState) {
        let handle = self.handle.get().map(|h| h.raw());
        events::emit(
            EventCategory::Lifecycle,
            EventSeverity::Info,
            serde_json::json!({
                "kind": "state_changed",
                "component_handle": handle,
                "capability": self.capability.as_str(),
                "from": from.as_str(),
                "to": to.as_str(),
            }),
        );
    }

    fn emit_inference(&self, kind: &str, operation: &str, op_id: u64, finish: Option<&str>) {
        let handle = self.handle.get().map(|h| h.raw());
        events::emit(
            EventCategory::Inference,
            EventSeverity::Info,
            serde_json::json!({
                "kind": kind,
                "component_handle": handle,
                "capability": self.capability.as_str(),
                "operation": operation,
                "operation_id": op_id,
                "finish_reason": finish,
            }),
        );
    }
}
