//! Runtime plumbing: provider selection, model registry round trips,
//! component load failure semantics, builtin provider path.

mod common;

use common::ScriptedLlm;
use edgerun_core::error::RuntimeError;
use edgerun_core::registry::models::{self, ModelDescriptor};
use edgerun_core::registry::providers::{
    providers, ProviderFactory, ProviderRegistration, ServiceConfig,
};
use edgerun_core::service::ServiceInstance;
use edgerun_core::{Capability, Component, Framework, LifecycleState};
use std::sync::Arc;

struct ScriptedLlmFactory;

impl ProviderFactory for ScriptedLlmFactory {
    fn create(
        &self,
        _model: &ModelDescriptor,
        _config: &ServiceConfig,
    ) -> edgerun_core::Result<ServiceInstance> {
        Ok(ServiceInstance::TextGeneration(Box::new(
            ScriptedLlm::counting(8),
        )))
    }
}

fn registration(id: &str, framework: Framework, priority: i32) -> ProviderRegistration {
    ProviderRegistration {
        provider_id: id.into(),
        capability: Capability::TextGeneration,
        framework,
        priority,
        factory: Arc::new(ScriptedLlmFactory),
    }
}

#[test]
fn framework_hint_and_priority_drive_selection() {
    // Frameworks unused elsewhere in this binary keep the global registry
    // assertions deterministic.
    providers().register(registration("provider-mlx", Framework::Mlx, 10));
    providers().register(registration("provider-coreml", Framework::Coreml, 20));

    let model = ModelDescriptor::from_path(
        "/models/any.gguf",
        Framework::Mlx,
        Capability::TextGeneration,
    );

    let hinted = providers()
        .select(Capability::TextGeneration, Some(Framework::Mlx), &model)
        .unwrap();
    assert_eq!(hinted.provider_id, "provider-mlx");

    let best = providers()
        .select(Capability::TextGeneration, Some(Framework::Coreml), &model)
        .unwrap();
    assert_eq!(best.provider_id, "provider-coreml");

    // Re-registration is idempotent by provider id.
    providers().register(registration("provider-mlx", Framework::Mlx, 10));
    let count = providers()
        .list()
        .iter()
        .filter(|p| p.provider_id == "provider-mlx")
        .count();
    assert_eq!(count, 1);
}

#[test]
fn model_registry_roundtrip_laws() {
    let descriptor = ModelDescriptor {
        model_id: "roundtrip-model".into(),
        display_name: "Roundtrip".into(),
        local_path: Some("/models/roundtrip.gguf".into()),
        framework: Framework::Llamacpp,
        capability: Capability::TextGeneration,
        size_bytes: 42,
        quantization: None,
        context_length: 2048,
        is_downloaded: true,
    };

    models::models().put(descriptor.clone());
    let found = models::models().get("roundtrip-model").unwrap();
    assert_eq!(found.model_id, descriptor.model_id);
    assert_eq!(found.size_bytes, 42);

    assert!(models::models().remove("roundtrip-model"));
    assert!(models::models().get("roundtrip-model").is_none());
}

#[test]
fn load_via_registered_provider_reaches_ready() {
    providers().register(registration("provider-fluid", Framework::FluidAudio, 5));
    models::models().put(ModelDescriptor {
        model_id: "fluid-model".into(),
        display_name: "Fluid".into(),
        local_path: None,
        framework: Framework::FluidAudio,
        capability: Capability::TextGeneration,
        size_bytes: 0,
        quantization: None,
        context_length: 1024,
        is_downloaded: true,
    });

    let (component, _handle) = Component::create(Capability::TextGeneration);
    assert_eq!(component.state(), LifecycleState::Idle);

    component
        .load("fluid-model", Some(Framework::FluidAudio), &ServiceConfig::default())
        .unwrap();
    assert_eq!(component.state(), LifecycleState::Ready);

    // Loading the same model again is a no-op success.
    component
        .load("fluid-model", Some(Framework::FluidAudio), &ServiceConfig::default())
        .unwrap();
    assert_eq!(component.state(), LifecycleState::Ready);
}

#[test]
fn missing_model_parks_component_in_error_until_unload() {
    let (component, _handle) = Component::create(Capability::TextGeneration);

    let err = component
        .load("no-such-model", None, &ServiceConfig::default())
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ModelNotFound(_)));
    assert_eq!(component.state(), LifecycleState::Error);

    // Calls are invalid in error state; unload recovers to idle.
    let call_err = component
        .generate("hi", &Default::default())
        .unwrap_err();
    assert!(matches!(call_err, RuntimeError::InvalidState(_)));

    component.unload();
    assert_eq!(component.state(), LifecycleState::Idle);
}

#[test]
fn builtin_providers_serve_vad_and_embeddings() {
    edgerun_core::init();

    let (embeddings, _handle) = Component::create(Capability::Embeddings);
    embeddings
        .load("builtin", Some(Framework::Builtin), &ServiceConfig::default())
        .unwrap();
    let vector = embeddings.embed("hello world").unwrap();
    assert_eq!(vector.len(), 384);
    assert_eq!(embeddings.embedding_dimension().unwrap(), 384);

    let (vad, _handle) = Component::create(Capability::Vad);
    vad.load("builtin", Some(Framework::Builtin), &ServiceConfig::default())
        .unwrap();
    assert!(!vad.vad_process(&vec![0.0f32; 480], 16_000).unwrap());
}

#[test]
fn calls_before_load_are_invalid_state() {
    let (component, _handle) = Component::create(Capability::TextGeneration);
    let err = component.generate("hi", &Default::default()).unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidState(_)));
}
