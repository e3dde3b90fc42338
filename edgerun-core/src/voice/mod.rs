//! Voice agent pipeline.
//!
//! Chains VAD → STT → LLM → TTS over streaming audio. The host feeds audio
//! frames; a turn triggers when the VAD sees speech followed by at least
//! `min_silence_duration_ms` of silence. The accumulated utterance is
//! transcribed, answered, synthesized, and the audio streams out through the
//! caller's chunk callback.
//!
//! Components are attached individually and may be loaded lazily; the
//! pipeline reports per-component readiness. Cancellation at any stage
//! aborts the turn and returns to listening.

use crate::audio::AudioBuffer;
use crate::component::{Component, LifecycleState};
use crate::error::{Result, RuntimeError};
use crate::events::{self, EventCategory, EventSeverity};
use crate::handle::{CoreObject, Handle, HandleType};
use crate::registry::models::Capability;
use crate::service::llm::GenerationOptions;
use crate::service::stt::TranscriptionOptions;
use crate::service::tts::SynthesisOptions;
use crate::streaming::CancelToken;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct VoiceAgentConfig {
    pub sample_rate: u32,
    /// Silence after speech that ends a turn.
    pub min_silence_duration_ms: f64,
    pub generation: GenerationOptions,
    pub synthesis: SynthesisOptions,
    pub transcription: TranscriptionOptions,
}

impl Default for VoiceAgentConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            min_silence_duration_ms: 500.0,
            generation: GenerationOptions::default(),
            synthesis: SynthesisOptions::default(),
            transcription: TranscriptionOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    Listening,
    Transcribing,
    Generating,
    Speaking,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnPhase::Listening => "listening",
            TurnPhase::Transcribing => "transcribing",
            TurnPhase::Generating => "generating",
            TurnPhase::Speaking => "speaking",
        }
    }
}

/// Per-stage readiness report.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VoiceAgentReadiness {
    pub vad: bool,
    pub stt: bool,
    pub llm: bool,
    pub tts: bool,
}

impl VoiceAgentReadiness {
    pub fn all(&self) -> bool {
        self.vad && self.stt && self.llm && self.tts
    }
}

/// One completed conversation turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    /// Correlation id carried by the turn's events.
    pub turn_id: Uuid,
    pub transcript: String,
    pub response: String,
    pub audio: AudioBuffer,
}

#[derive(Default)]
struct Stages {
    vad: Option<Arc<Component>>,
    stt: Option<Arc<Component>>,
    llm: Option<Arc<Component>>,
    tts: Option<Arc<Component>>,
}

struct TurnState {
    phase: TurnPhase,
    speech: Vec<f32>,
    silence_ms: f64,
    in_speech: bool,
}

pub struct VoiceAgentPipeline {
    config: VoiceAgentConfig,
    stages: RwLock<Stages>,
    state: Mutex<TurnState>,
    cancel: CancelToken,
}

impl VoiceAgentPipeline {
    pub fn create(config: VoiceAgentConfig) -> (Arc<Self>, Handle) {
        let pipeline = Arc::new(Self {
            config,
            stages: RwLock::new(Stages::default()),
            state: Mutex::new(TurnState {
                phase: TurnPhase::Listening,
                speech: Vec::new(),
                silence_ms: 0.0,
                in_speech: false,
            }),
            cancel: CancelToken::new(),
        });
        let handle = crate::handle::registry()
            .register(CoreObject::VoiceAgent(pipeline.clone()), HandleType::VoiceAgent);
        (pipeline, handle)
    }

    fn attach(&self, slot: Capability, component: Arc<Component>) -> Result<()> {
        if component.capability() != slot {
            return Err(RuntimeError::InvalidArgument(format!(
                "expected a {} component, got {}",
                slot,
                component.capability()
            )));
        }
        let mut stages = self.stages.write();
        match slot {
            Capability::Vad => stages.vad = Some(component),
            Capability::Stt => stages.stt = Some(component),
            Capability::TextGeneration => stages.llm = Some(component),
            Capability::Tts => stages.tts = Some(component),
            _ => unreachable!(),
        }
        Ok(())
    }

    pub fn set_vad(&self, component: Arc<Component>) -> Result<()> {
        self.attach(Capability::Vad, component)
    }

    pub fn set_stt(&self, component: Arc<Component>) -> Result<()> {
        self.attach(Capability::Stt, component)
    }

    pub fn set_llm(&self, component: Arc<Component>) -> Result<()> {
        self.attach(Capability::TextGeneration, component)
    }

    pub fn set_tts(&self, component: Arc<Component>) -> Result<()> {
        self.attach(Capability::Tts, component)
    }

    pub fn readiness(&self) -> VoiceAgentReadiness {
        let ready = |c: &Option<Arc<Component>>| {
            c.as_ref()
                .map(|c| c.state() == LifecycleState::Ready)
                .unwrap_or(false)
        };
        let stages = self.stages.read();
        VoiceAgentReadiness {
            vad: ready(&stages.vad),
            stt: ready(&stages.stt),
            llm: ready(&stages.llm),
            tts: ready(&stages.tts),
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.state.lock().phase
    }

    /// Abort the current turn from any thread; the pipeline returns to
    /// listening at the next stage boundary. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let stages = self.stages.read();
        for stage in [&stages.stt, &stages.llm, &stages.tts].into_iter().flatten() {
            stage.cancel();
        }
    }

    /// Feed one audio frame. When the frame completes a turn, the full
    /// VAD→STT→LLM→TTS chain runs on the calling thread; synthesized audio
    /// streams through `on_audio` and the finished turn is returned.
    pub fn process_audio(
        &self,
        frame: &[f32],
        on_audio: &mut dyn FnMut(&[f32]) -> bool,
    ) -> Result<Option<TurnResult>> {
        if frame.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty audio frame".into()));
        }
        let vad = self
            .stages
            .read()
            .vad
            .clone()
            .ok_or_else(|| RuntimeError::InvalidState("no vad component attached".into()))?;

        let frame_ms = frame.len() as f64 * 1000.0 / self.config.sample_rate as f64;
        let voiced = vad.vad_process(frame, self.config.sample_rate)?;

        let mut state = self.state.lock();
        if state.phase != TurnPhase::Listening {
            return Err(RuntimeError::ComponentBusy);
        }

        if voiced {
            state.in_speech = true;
            state.silence_ms = 0.0;
            state.speech.extend_from_slice(frame);
            return Ok(None);
        }

        if !state.in_speech {
            // Silence before any speech: keep listening.
            return Ok(None);
        }

        state.silence_ms += frame_ms;
        state.speech.extend_from_slice(frame);
        if state.silence_ms < self.config.min_silence_duration_ms {
            return Ok(None);
        }

        // Turn boundary: speech followed by enough silence.
        let utterance = std::mem::take(&mut state.speech);
        state.in_speech = false;
        state.silence_ms = 0.0;
        self.cancel.reset();

        let outcome = self.run_turn(&mut state, &utterance, on_audio);
        state.phase = TurnPhase::Listening;
        match &outcome {
            Ok(Some(_)) | Ok(None) => {}
            Err(err) if err.is_cancellation() => {
                self.emit_turn("turn_cancelled", serde_json::json!({}));
            }
            Err(err) => {
                events::emit_error(err, None, "voice_turn");
            }
        }
        outcome
    }

    fn run_turn(
        &self,
        state: &mut TurnState,
        utterance: &[f32],
        on_audio: &mut dyn FnMut(&[f32]) -> bool,
    ) -> Result<Option<TurnResult>> {
        let (stt, llm, tts) = {
            let stages = self.stages.read();
            (
                stages.stt.clone().ok_or_else(|| {
                    RuntimeError::InvalidState("no stt component attached".into())
                })?,
                stages.llm.clone().ok_or_else(|| {
                    RuntimeError::InvalidState("no llm component attached".into())
                })?,
                stages.tts.clone().ok_or_else(|| {
                    RuntimeError::InvalidState("no tts component attached".into())
                })?,
            )
        };

        let turn_id = Uuid::new_v4();
        self.set_phase(state, TurnPhase::Transcribing);
        self.check_cancelled()?;
        let transcript =
            stt.transcribe(utterance, self.config.sample_rate, &self.config.transcription)?;
        if transcript.text.trim().is_empty() {
            // Nothing intelligible; back to listening without a turn.
            return Ok(None);
        }
        self.emit_turn(
            "turn_transcript",
            serde_json::json!({ "turn_id": turn_id, "transcript": transcript.text }),
        );

        self.set_phase(state, TurnPhase::Generating);
        self.check_cancelled()?;
        let generation = llm.generate(&transcript.text, &self.config.generation)?;

        self.set_phase(state, TurnPhase::Speaking);
        self.check_cancelled()?;
        let mut synthesized: Vec<f32> = Vec::new();
        {
            let mut sink = |chunk: &[f32]| -> bool {
                synthesized.extend_from_slice(chunk);
                on_audio(chunk)
            };
            tts.synthesize_stream(&generation.text, &self.config.synthesis, &mut sink)?;
        }
        self.check_cancelled()?;

        self.emit_turn(
            "turn_complete",
            serde_json::json!({
                "turn_id": turn_id,
                "transcript": transcript.text,
                "response_chars": generation.text.len(),
                "audio_samples": synthesized.len(),
            }),
        );

        Ok(Some(TurnResult {
            turn_id,
            transcript: transcript.text,
            response: generation.text,
            audio: AudioBuffer::new(synthesized, self.config.synthesis.sample_rate),
        }))
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(RuntimeError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, state: &mut TurnState, phase: TurnPhase) {
        let from = state.phase;
        state.phase = phase;
        events::emit(
            EventCategory::Voice,
            EventSeverity::Info,
            serde_json::json!({
                "kind": "phase_changed",
                "from": from.as_str(),
                "to": phase.as_str(),
            }),
        );
    }

    fn emit_turn(&self, kind: &str, mut payload: serde_json::Value) {
        if let Some(object) = payload.as_object_mut() {
            object.insert("kind".into(), serde_json::json!(kind));
        }
        events::emit(EventCategory::Voice, EventSeverity::Info, payload);
    }
}
