//! Voice agent pipeline: turn detection, readiness, cancellation.

mod common;

use common::{silence, sine_tone, LevelGateStt, ScriptedLlm, SineTts, TEST_SAMPLE_RATE};
use edgerun_core::service::builtin::RmsVad;
use edgerun_core::service::ServiceInstance;
use edgerun_core::voice::{TurnPhase, VoiceAgentConfig, VoiceAgentPipeline};
use edgerun_core::{Capability, Component};
use std::sync::Arc;

const FRAME_MS: u32 = 30;

fn frames(samples: &[f32]) -> Vec<Vec<f32>> {
    let frame_len = (TEST_SAMPLE_RATE as usize * FRAME_MS as usize) / 1000;
    samples.chunks(frame_len).map(|c| c.to_vec()).collect()
}

fn assembled_pipeline() -> (Arc<VoiceAgentPipeline>, edgerun_core::Handle) {
    let (pipeline, handle) = VoiceAgentPipeline::create(VoiceAgentConfig::default());

    let (vad, _) =
        Component::with_service(Capability::Vad, ServiceInstance::Vad(Box::new(RmsVad::new())));
    let (stt, _) = Component::with_service(
        Capability::Stt,
        ServiceInstance::Stt(Box::new(LevelGateStt::new("turn on the lights"))),
    );
    let (llm, _) = Component::with_service(
        Capability::TextGeneration,
        ServiceInstance::TextGeneration(Box::new(ScriptedLlm::new(vec![
            "Okay, turning on the lights.".to_string(),
        ]))),
    );
    let (tts, _) =
        Component::with_service(Capability::Tts, ServiceInstance::Tts(Box::new(SineTts)));

    pipeline.set_vad(vad).unwrap();
    pipeline.set_stt(stt).unwrap();
    pipeline.set_llm(llm).unwrap();
    pipeline.set_tts(tts).unwrap();
    (pipeline, handle)
}

#[test]
fn speech_followed_by_silence_completes_a_turn() {
    let (pipeline, _handle) = assembled_pipeline();
    assert!(pipeline.readiness().all());

    let mut audio_chunks = 0usize;
    let mut turn = None;

    // 300 ms leading silence, 600 ms speech, then a second of silence.
    let mut feed = silence(300, TEST_SAMPLE_RATE);
    feed.extend(sine_tone(600, TEST_SAMPLE_RATE, 0.5));
    feed.extend(silence(1000, TEST_SAMPLE_RATE));

    for frame in frames(&feed) {
        let outcome = pipeline
            .process_audio(&frame, &mut |chunk| {
                audio_chunks += chunk.len();
                true
            })
            .unwrap();
        if let Some(result) = outcome {
            turn = Some(result);
            break;
        }
    }

    let turn = turn.expect("a turn should have completed");
    assert_eq!(turn.transcript, "turn on the lights");
    assert_eq!(turn.response, "Okay, turning on the lights.");
    assert!(!turn.audio.is_empty());
    assert_eq!(audio_chunks, turn.audio.samples.len());
    assert_eq!(pipeline.phase(), TurnPhase::Listening);
}

#[test]
fn silence_alone_never_triggers_a_turn() {
    let (pipeline, _handle) = assembled_pipeline();

    for frame in frames(&silence(2000, TEST_SAMPLE_RATE)) {
        let outcome = pipeline.process_audio(&frame, &mut |_| true).unwrap();
        assert!(outcome.is_none());
    }
    assert_eq!(pipeline.phase(), TurnPhase::Listening);
}

#[test]
fn short_silence_does_not_end_the_turn() {
    let (pipeline, _handle) = assembled_pipeline();

    // Speech, a 200 ms pause (under the 500 ms rule), more speech.
    let mut feed = sine_tone(400, TEST_SAMPLE_RATE, 0.5);
    feed.extend(silence(200, TEST_SAMPLE_RATE));
    feed.extend(sine_tone(400, TEST_SAMPLE_RATE, 0.5));

    for frame in frames(&feed) {
        let outcome = pipeline.process_audio(&frame, &mut |_| true).unwrap();
        assert!(outcome.is_none(), "turn must not fire during a short pause");
    }
}

#[test]
fn audio_callback_false_aborts_the_turn_back_to_listening() {
    let (pipeline, _handle) = assembled_pipeline();

    let mut feed = sine_tone(600, TEST_SAMPLE_RATE, 0.5);
    feed.extend(silence(1000, TEST_SAMPLE_RATE));

    let mut aborted = false;
    for frame in frames(&feed) {
        match pipeline.process_audio(&frame, &mut |_| false) {
            Ok(None) => {}
            Ok(Some(_)) => panic!("turn should have been aborted"),
            Err(err) => {
                assert!(err.is_cancellation(), "unexpected error: {err}");
                aborted = true;
                break;
            }
        }
    }
    assert!(aborted, "rejecting audio chunks must abort the turn");
    assert_eq!(pipeline.phase(), TurnPhase::Listening);
}

#[test]
fn readiness_reports_per_component() {
    let (pipeline, _handle) = VoiceAgentPipeline::create(VoiceAgentConfig::default());
    let readiness = pipeline.readiness();
    assert!(!readiness.vad && !readiness.stt && !readiness.llm && !readiness.tts);

    let (vad, _) =
        Component::with_service(Capability::Vad, ServiceInstance::Vad(Box::new(RmsVad::new())));
    pipeline.set_vad(vad).unwrap();

    let readiness = pipeline.readiness();
    assert!(readiness.vad);
    assert!(!readiness.all());
}

#[test]
fn wrong_capability_attachment_is_rejected() {
    let (pipeline, _handle) = VoiceAgentPipeline::create(VoiceAgentConfig::default());
    let (tts, _) =
        Component::with_service(Capability::Tts, ServiceInstance::Tts(Box::new(SineTts)));
    assert!(pipeline.set_stt(tts).is_err());
}
