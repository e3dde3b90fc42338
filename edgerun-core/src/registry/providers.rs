//! Provider registry.
//!
//! Backends register one entry per (capability, framework) they implement,
//! with a priority and a `can_handle` predicate. Selection filters by
//! capability, optionally by an exact framework hint, sorts by priority
//! descending and returns the first provider that accepts the model.
//!
//! The registry owns metadata and factories only, never backend instances.
//! It is effectively static after backend registration, so reads clone a
//! snapshot and never hold the lock across a factory call.

use crate::error::{Result, RuntimeError};
use crate::registry::models::{Capability, Framework, ModelDescriptor};
use crate::service::ServiceInstance;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-instance configuration passed to a provider factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub context_length: u32,
    pub threads: u32,
    pub gpu_layers: u32,
    /// Optional execution-provider hint (e.g. "qnn", "nnapi", "coreml").
    /// Providers that do not recognize the hint ignore it and stay on CPU.
    pub execution_provider: Option<String>,
    /// Opaque backend-specific parameters.
    pub extra: serde_json::Value,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            context_length: 4096,
            threads: 0,
            gpu_layers: 0,
            execution_provider: None,
            extra: serde_json::Value::Null,
        }
    }
}

/// Factory + acceptance predicate a backend registers per capability.
pub trait ProviderFactory: Send + Sync {
    /// Whether this provider can serve the given model. Defaults to yes.
    fn can_handle(&self, model: &ModelDescriptor) -> bool {
        let _ = model;
        true
    }

    /// Instantiate a backend service for the model.
    fn create(&self, model: &ModelDescriptor, config: &ServiceConfig) -> Result<ServiceInstance>;
}

pub struct ProviderRegistration {
    pub provider_id: String,
    pub capability: Capability,
    pub framework: Framework,
    pub priority: i32,
    pub factory: Arc<dyn ProviderFactory>,
}

impl std::fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("provider_id", &self.provider_id)
            .field("capability", &self.capability)
            .field("framework", &self.framework)
            .field("priority", &self.priority)
            .finish()
    }
}

pub struct ProviderRegistry {
    entries: RwLock<Vec<Arc<ProviderRegistration>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a provider. Idempotent by `provider_id`: re-registering
    /// replaces the previous entry and succeeds.
    pub fn register(&self, registration: ProviderRegistration) {
        let mut entries = self.entries.write();
        entries.retain(|e| e.provider_id != registration.provider_id);
        entries.push(Arc::new(registration));
    }

    /// Select a provider for a capability request.
    pub fn select(
        &self,
        capability: Capability,
        framework_hint: Option<Framework>,
        model: &ModelDescriptor,
    ) -> Result<Arc<ProviderRegistration>> {
        let mut candidates: Vec<Arc<ProviderRegistration>> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.capability == capability)
            .filter(|e| framework_hint.map_or(true, |hint| e.framework == hint))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        candidates
            .into_iter()
            .find(|e| e.factory.can_handle(model))
            .ok_or_else(|| RuntimeError::ProviderNotFound {
                capability: capability.as_str().to_string(),
                hint: framework_hint
                    .map(|f| f.as_str().to_string())
                    .unwrap_or_else(|| "any".to_string()),
            })
    }

    pub fn list(&self) -> Vec<Arc<ProviderRegistration>> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all registrations. Used by `shutdown` for test isolation.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static PROVIDERS: Lazy<ProviderRegistry> = Lazy::new(ProviderRegistry::new);

/// The process-wide provider registry.
pub fn providers() -> &'static ProviderRegistry {
    &PROVIDERS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::embeddings::Embeddings;

    struct NullEmbeddings;

    impl Embeddings for NullEmbeddings {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 4])
        }
        fn dimension(&self) -> usize {
            4
        }
        fn is_ready(&self) -> bool {
            true
        }
    }

    struct TestFactory {
        accepts: bool,
    }

    impl ProviderFactory for TestFactory {
        fn can_handle(&self, _model: &ModelDescriptor) -> bool {
            self.accepts
        }
        fn create(
            &self,
            _model: &ModelDescriptor,
            _config: &ServiceConfig,
        ) -> Result<ServiceInstance> {
            Ok(ServiceInstance::Embeddings(Box::new(NullEmbeddings)))
        }
    }

    fn registration(id: &str, framework: Framework, priority: i32, accepts: bool) -> ProviderRegistration {
        ProviderRegistration {
            provider_id: id.into(),
            capability: Capability::TextGeneration,
            framework,
            priority,
            factory: Arc::new(TestFactory { accepts }),
        }
    }

    fn any_model() -> ModelDescriptor {
        ModelDescriptor::from_path("/m/x.gguf", Framework::Llamacpp, Capability::TextGeneration)
    }

    #[test]
    fn hint_filters_to_exact_framework() {
        let registry = ProviderRegistry::new();
        registry.register(registration("a", Framework::Llamacpp, 10, true));
        registry.register(registration("b", Framework::Onnx, 20, true));

        let selected = registry
            .select(Capability::TextGeneration, Some(Framework::Llamacpp), &any_model())
            .unwrap();
        assert_eq!(selected.provider_id, "a");

        let selected = registry
            .select(Capability::TextGeneration, None, &any_model())
            .unwrap();
        assert_eq!(selected.provider_id, "b", "highest priority wins without a hint");
    }

    #[test]
    fn can_handle_skips_to_next_priority() {
        let registry = ProviderRegistry::new();
        registry.register(registration("picky", Framework::Llamacpp, 50, false));
        registry.register(registration("fallback", Framework::Llamacpp, 1, true));

        let selected = registry
            .select(Capability::TextGeneration, None, &any_model())
            .unwrap();
        assert_eq!(selected.provider_id, "fallback");
    }

    #[test]
    fn registration_is_idempotent_by_id() {
        let registry = ProviderRegistry::new();
        registry.register(registration("p", Framework::Llamacpp, 1, true));
        registry.register(registration("p", Framework::Llamacpp, 2, true));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list()[0].priority, 2);
    }

    #[test]
    fn no_match_reports_provider_not_found() {
        let registry = ProviderRegistry::new();
        let err = registry
            .select(Capability::TextGeneration, Some(Framework::Mlx), &any_model())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ProviderNotFound { .. }));
    }
}
