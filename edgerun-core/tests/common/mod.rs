//! Scripted backends shared by the integration suites.
//!
//! These exercise the full component/provider plumbing without loading real
//! model files: a token-emitting LLM with a programmable confidence probe, a
//! level-gated STT with a push-based stream session, and a sine-tone TTS.

#![allow(dead_code)]

use edgerun_core::audio::AudioBuffer;
use edgerun_core::benchmark::BenchmarkTiming;
use edgerun_core::error::{Result, RuntimeError};
use edgerun_core::platform;
use edgerun_core::service::llm::{
    FinishReason, GenerationOptions, GenerationResult, TextGeneration,
};
use edgerun_core::service::stt::{
    SpeechToText, SttStream, TranscriptionOptions, TranscriptionResult,
};
use edgerun_core::service::tts::{SynthesisOptions, TextToSpeech, Voice};
use edgerun_core::service::ServiceInfo;
use edgerun_core::streaming::TokenStream;
use parking_lot::Mutex;

pub const TEST_SAMPLE_RATE: u32 = 16_000;

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

pub fn sine_tone(duration_ms: u32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let count = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    (0..count)
        .map(|i| amplitude * (i as f32 * 2.0 * std::f32::consts::PI * 440.0 / sample_rate as f32).sin())
        .collect()
}

pub fn silence(duration_ms: u32, sample_rate: u32) -> Vec<f32> {
    vec![0.0; (sample_rate as u64 * duration_ms as u64 / 1000) as usize]
}

// ─── Scripted LLM ─────────────────────────────────────────────────────────────

type ConfidenceFn = Box<dyn Fn(&[String], &str) -> f32 + Send + Sync>;
type AnswerFn = Box<dyn Fn(&[String], &str) -> String + Send + Sync>;

/// Emits a fixed token stream, keeps a session context, and answers probes /
/// generation from programmable closures.
pub struct ScriptedLlm {
    tokens: Vec<String>,
    context: Mutex<Vec<String>>,
    system_prompt: Mutex<Option<String>>,
    confidence: ConfidenceFn,
    answer: AnswerFn,
    /// When set, streaming fails with this message after `fail_after` tokens.
    fail_after: Option<(usize, String)>,
}

impl ScriptedLlm {
    pub fn counting(count: usize) -> Self {
        Self::new((1..=count).map(|i| format!("{i} ")).collect())
    }

    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            context: Mutex::new(Vec::new()),
            system_prompt: Mutex::new(None),
            confidence: Box::new(|_, _| 0.0),
            answer: Box::new(|_, _| "ok".to_string()),
            fail_after: None,
        }
    }

    pub fn with_confidence(mut self, f: impl Fn(&[String], &str) -> f32 + Send + Sync + 'static) -> Self {
        self.confidence = Box::new(f);
        self
    }

    pub fn with_answer(mut self, f: impl Fn(&[String], &str) -> String + Send + Sync + 'static) -> Self {
        self.answer = Box::new(f);
        self
    }

    pub fn failing_after(mut self, tokens: usize, message: &str) -> Self {
        self.fail_after = Some((tokens, message.to_string()));
        self
    }

    fn base_result(&self, text: String, completion_tokens: u32) -> GenerationResult {
        let now = platform::now_ms();
        GenerationResult {
            text,
            prompt_tokens: 8,
            completion_tokens,
            total_time_ms: 0.0,
            tokens_per_second: 0.0,
            finish_reason: FinishReason::Stop,
            timing: BenchmarkTiming {
                t2_prefill_start_ms: now,
                t3_prefill_end_ms: now + 1,
                t4_first_token_ms: now + 2,
                t5_last_token_ms: now + 3,
                prompt_tokens: 8,
                output_tokens: completion_tokens as i32,
                ..Default::default()
            },
        }
    }
}

impl TextGeneration for ScriptedLlm {
    fn generate(&self, _prompt: &str, options: &GenerationOptions) -> Result<GenerationResult> {
        let limit = (options.max_tokens as usize).min(self.tokens.len());
        let text: String = self.tokens[..limit].concat();
        Ok(self.base_result(text, limit as u32))
    }

    fn generate_stream(
        &self,
        _prompt: &str,
        options: &GenerationOptions,
        stream: &mut TokenStream<'_>,
    ) -> Result<GenerationResult> {
        let limit = (options.max_tokens as usize).min(self.tokens.len());
        let mut emitted = String::new();
        for (i, token) in self.tokens[..limit].iter().enumerate() {
            if let Some((fail_at, message)) = &self.fail_after {
                if i >= *fail_at {
                    return Err(RuntimeError::InferenceFailed(message.clone()));
                }
            }
            if !stream.push_str(token) {
                // Cooperative stop: the engine observed cancellation.
                break;
            }
            emitted.push_str(token);
        }
        let delivered = stream.delivered();
        let mut result = self.base_result(emitted, delivered);
        if delivered as usize >= limit && limit == self.tokens.len() {
            result.finish_reason = FinishReason::Stop;
        } else if delivered as usize >= limit {
            result.finish_reason = FinishReason::Length;
        }
        Ok(result)
    }

    fn append_context(&self, text: &str) -> Result<()> {
        self.context.lock().push(text.to_string());
        Ok(())
    }

    fn clear_context(&self) -> Result<()> {
        self.context.lock().clear();
        Ok(())
    }

    fn inject_system_prompt(&self, prompt: &str) -> Result<bool> {
        *self.system_prompt.lock() = Some(prompt.to_string());
        Ok(true)
    }

    fn probe_confidence(&self, query: &str) -> Result<f32> {
        Ok((self.confidence)(&self.context.lock(), query))
    }

    fn generate_from_context(
        &self,
        suffix: &str,
        _options: &GenerationOptions,
    ) -> Result<GenerationResult> {
        let text = (self.answer)(&self.context.lock(), suffix);
        Ok(self.base_result(text, 16))
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: "scripted-llm".into(),
            ..Default::default()
        }
    }
}

// ─── Level-gated STT ──────────────────────────────────────────────────────────

/// Produces a fixed transcript whenever the buffer has audible content.
pub struct LevelGateStt {
    pub transcript: String,
    pub threshold: f32,
}

impl LevelGateStt {
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
            threshold: 0.02,
        }
    }
}

impl SpeechToText for LevelGateStt {
    fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        _options: &TranscriptionOptions,
    ) -> Result<TranscriptionResult> {
        if sample_rate != TEST_SAMPLE_RATE {
            return Err(RuntimeError::InvalidArgument(format!(
                "unsupported sample rate {sample_rate}"
            )));
        }
        let text = if rms(samples) >= self.threshold {
            self.transcript.clone()
        } else {
            String::new()
        };
        Ok(TranscriptionResult {
            text,
            language: Some("en".into()),
            confidence: 0.92,
            segments: Vec::new(),
        })
    }

    fn create_stream(&self) -> Result<Box<dyn SttStream>> {
        Ok(Box::new(LevelGateSession {
            transcript: self.transcript.clone(),
            threshold: self.threshold,
            buffered: Vec::new(),
            heard_tone: false,
            trailing_silence_ms: 0.0,
            finished: false,
        }))
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Push-based session: endpoint fires on silence following audible input.
pub struct LevelGateSession {
    transcript: String,
    threshold: f32,
    buffered: Vec<f32>,
    heard_tone: bool,
    trailing_silence_ms: f64,
    finished: bool,
}

impl SttStream for LevelGateSession {
    fn feed_audio(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        if sample_rate != TEST_SAMPLE_RATE {
            return Err(RuntimeError::InvalidArgument(format!(
                "unsupported sample rate {sample_rate}"
            )));
        }
        if self.finished {
            return Err(RuntimeError::InvalidState("session finished".into()));
        }
        let frame_ms = samples.len() as f64 * 1000.0 / sample_rate as f64;
        if rms(samples) >= self.threshold {
            self.heard_tone = true;
            self.trailing_silence_ms = 0.0;
        } else if self.heard_tone {
            self.trailing_silence_ms += frame_ms;
        }
        self.buffered.extend_from_slice(samples);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.heard_tone
    }

    fn decode(&mut self) -> Result<String> {
        if self.heard_tone {
            Ok(self.transcript.clone())
        } else {
            Ok(String::new())
        }
    }

    fn is_endpoint(&self) -> bool {
        self.heard_tone && self.trailing_silence_ms >= 300.0
    }

    fn input_finished(&mut self) {
        self.finished = true;
    }

    fn reset(&mut self) {
        self.buffered.clear();
        self.heard_tone = false;
        self.trailing_silence_ms = 0.0;
        self.finished = false;
    }
}

// ─── Sine TTS ─────────────────────────────────────────────────────────────────

/// Synthesizes a 440 Hz tone whose duration scales with the text length.
pub struct SineTts;

impl TextToSpeech for SineTts {
    fn synthesize(&self, text: &str, options: &SynthesisOptions) -> Result<AudioBuffer> {
        let duration_ms = 40 * text.len().clamp(1, 100) as u32;
        Ok(AudioBuffer::new(
            sine_tone(duration_ms, options.sample_rate, 0.4),
            options.sample_rate,
        ))
    }

    fn synthesize_stream(
        &self,
        text: &str,
        options: &SynthesisOptions,
        on_chunk: &mut dyn FnMut(&[f32]) -> bool,
    ) -> Result<()> {
        let audio = self.synthesize(text, options)?;
        for chunk in audio.samples.chunks(1024) {
            if !on_chunk(chunk) {
                return Err(RuntimeError::Cancelled);
            }
        }
        Ok(())
    }

    fn voices(&self) -> Vec<Voice> {
        vec![Voice {
            id: "default".into(),
            name: "Sine".into(),
            language: "en".into(),
        }]
    }

    fn is_ready(&self) -> bool {
        true
    }
}
