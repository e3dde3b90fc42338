//! TTS synthesis into WAV framing.

mod common;

use common::SineTts;
use edgerun_core::audio::{float32_to_wav, wav_to_float32};
use edgerun_core::service::tts::SynthesisOptions;
use edgerun_core::service::ServiceInstance;
use edgerun_core::{Capability, Component};

#[test]
fn synthesize_then_wrap_as_wav() {
    let (component, _handle) =
        Component::with_service(Capability::Tts, ServiceInstance::Tts(Box::new(SineTts)));

    let options = SynthesisOptions {
        voice_id: Some("default".into()),
        ..Default::default()
    };
    let audio = component.synthesize("Hello, world.", &options).unwrap();
    assert!(!audio.is_empty(), "synthesis produced no samples");

    let wav = float32_to_wav(&audio.samples, 22_050).unwrap();
    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");
    assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1, "mono");
    assert_eq!(
        u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]),
        22_050
    );
    assert_eq!(u16::from_le_bytes([wav[34], wav[35]]), 16, "bits per sample");

    let (decoded, rate) = wav_to_float32(&wav).unwrap();
    assert_eq!(rate, 22_050);
    assert_eq!(decoded.len(), audio.samples.len());
}

#[test]
fn streaming_synthesis_chunks_cover_the_buffer() {
    let (component, _handle) =
        Component::with_service(Capability::Tts, ServiceInstance::Tts(Box::new(SineTts)));

    let options = SynthesisOptions::default();
    let full = component.synthesize("Hello there.", &options).unwrap();

    let mut streamed: Vec<f32> = Vec::new();
    component
        .synthesize_stream("Hello there.", &options, &mut |chunk| {
            streamed.extend_from_slice(chunk);
            true
        })
        .unwrap();
    assert_eq!(streamed.len(), full.samples.len());
}

#[test]
fn chunk_callback_false_cancels_synthesis() {
    let (component, _handle) =
        Component::with_service(Capability::Tts, ServiceInstance::Tts(Box::new(SineTts)));

    let mut chunks = 0u32;
    let err = component
        .synthesize_stream(
            "A long enough sentence to produce several chunks of audio.",
            &SynthesisOptions::default(),
            &mut |_chunk| {
                chunks += 1;
                chunks < 2
            },
        )
        .unwrap_err();
    assert!(err.is_cancellation());
    assert_eq!(chunks, 2);
}

#[test]
fn voices_lists_the_default() {
    let (component, _handle) =
        Component::with_service(Capability::Tts, ServiceInstance::Tts(Box::new(SineTts)));
    let voices = component.voices().unwrap();
    assert_eq!(voices.len(), 1);
    assert_eq!(voices[0].id, "default");
}
