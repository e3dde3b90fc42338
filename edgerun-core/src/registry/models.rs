//! In-memory model registry.
//!
//! Persistence-free store of model descriptors keyed by `model_id`, with
//! secondary indices by capability and framework. Reads are lock-free on a
//! copy-on-write snapshot: writers rebuild the snapshot and swap the `Arc`,
//! readers holding the old one are unaffected.

use crate::error::{Result, RuntimeError};
use crate::platform;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Inference engine family a model targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Llamacpp,
    Onnx,
    Whispercpp,
    Sdcpp,
    FoundationModels,
    SystemTts,
    FluidAudio,
    Builtin,
    None,
    Mlx,
    Coreml,
    Unknown,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Llamacpp => "llamacpp",
            Framework::Onnx => "onnx",
            Framework::Whispercpp => "whispercpp",
            Framework::Sdcpp => "sdcpp",
            Framework::FoundationModels => "foundation_models",
            Framework::SystemTts => "system_tts",
            Framework::FluidAudio => "fluid_audio",
            Framework::Builtin => "builtin",
            Framework::None => "none",
            Framework::Mlx => "mlx",
            Framework::Coreml => "coreml",
            Framework::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Framework {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "llamacpp" => Ok(Framework::Llamacpp),
            "onnx" => Ok(Framework::Onnx),
            "whispercpp" => Ok(Framework::Whispercpp),
            "sdcpp" => Ok(Framework::Sdcpp),
            "foundation_models" => Ok(Framework::FoundationModels),
            "system_tts" => Ok(Framework::SystemTts),
            "fluid_audio" => Ok(Framework::FluidAudio),
            "builtin" => Ok(Framework::Builtin),
            "none" => Ok(Framework::None),
            "mlx" => Ok(Framework::Mlx),
            "coreml" => Ok(Framework::Coreml),
            "unknown" => Ok(Framework::Unknown),
            other => Err(RuntimeError::InvalidArgument(format!(
                "unknown framework tag {other}"
            ))),
        }
    }
}

/// Abstract operation class a model (or component) provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextGeneration,
    VisionLanguage,
    Embeddings,
    Stt,
    Tts,
    Vad,
    Diarization,
    WakeWord,
    Memory,
    Diffusion,
    Rag,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::TextGeneration => "text_generation",
            Capability::VisionLanguage => "vision_language",
            Capability::Embeddings => "embeddings",
            Capability::Stt => "stt",
            Capability::Tts => "tts",
            Capability::Vad => "vad",
            Capability::Diarization => "diarization",
            Capability::WakeWord => "wake_word",
            Capability::Memory => "memory",
            Capability::Diffusion => "diffusion",
            Capability::Rag => "rag",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text_generation" => Ok(Capability::TextGeneration),
            "vision_language" => Ok(Capability::VisionLanguage),
            "embeddings" => Ok(Capability::Embeddings),
            "stt" => Ok(Capability::Stt),
            "tts" => Ok(Capability::Tts),
            "vad" => Ok(Capability::Vad),
            "diarization" => Ok(Capability::Diarization),
            "wake_word" => Ok(Capability::WakeWord),
            "memory" => Ok(Capability::Memory),
            "diffusion" => Ok(Capability::Diffusion),
            "rag" => Ok(Capability::Rag),
            other => Err(RuntimeError::InvalidArgument(format!(
                "unknown capability tag {other}"
            ))),
        }
    }
}

/// Shared-immutable model metadata. Unique by `model_id` within the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model_id: String,
    pub display_name: String,
    pub local_path: Option<String>,
    pub framework: Framework,
    pub capability: Capability,
    pub size_bytes: u64,
    pub quantization: Option<String>,
    pub context_length: u32,
    pub is_downloaded: bool,
}

impl ModelDescriptor {
    /// Minimal descriptor for a model addressed directly by file path.
    pub fn from_path(path: &str, framework: Framework, capability: Capability) -> Self {
        let stem = std::path::Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Self {
            model_id: stem.clone(),
            display_name: stem,
            local_path: Some(path.to_string()),
            framework,
            capability,
            size_bytes: 0,
            quantization: None,
            context_length: 0,
            is_downloaded: true,
        }
    }
}

#[derive(Default)]
struct Snapshot {
    by_id: HashMap<String, Arc<ModelDescriptor>>,
    by_capability: HashMap<Capability, Vec<Arc<ModelDescriptor>>>,
    by_framework: HashMap<Framework, Vec<Arc<ModelDescriptor>>>,
}

impl Snapshot {
    fn rebuild(by_id: HashMap<String, Arc<ModelDescriptor>>) -> Self {
        let mut by_capability: HashMap<Capability, Vec<Arc<ModelDescriptor>>> = HashMap::new();
        let mut by_framework: HashMap<Framework, Vec<Arc<ModelDescriptor>>> = HashMap::new();
        for desc in by_id.values() {
            by_capability
                .entry(desc.capability)
                .or_default()
                .push(desc.clone());
            by_framework
                .entry(desc.framework)
                .or_default()
                .push(desc.clone());
        }
        for list in by_capability.values_mut() {
            list.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        }
        for list in by_framework.values_mut() {
            list.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        }
        Self {
            by_id,
            by_capability,
            by_framework,
        }
    }
}

/// Copy-on-write model registry. Writes are serialized; reads take a snapshot.
pub struct ModelRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn put(&self, descriptor: ModelDescriptor) {
        let mut guard = self.snapshot.write();
        let mut by_id = guard.by_id.clone();
        by_id.insert(descriptor.model_id.clone(), Arc::new(descriptor));
        *guard = Arc::new(Snapshot::rebuild(by_id));
    }

    pub fn get(&self, model_id: &str) -> Option<Arc<ModelDescriptor>> {
        self.snapshot.read().by_id.get(model_id).cloned()
    }

    pub fn remove(&self, model_id: &str) -> bool {
        let mut guard = self.snapshot.write();
        if !guard.by_id.contains_key(model_id) {
            return false;
        }
        let mut by_id = guard.by_id.clone();
        by_id.remove(model_id);
        *guard = Arc::new(Snapshot::rebuild(by_id));
        true
    }

    pub fn list_by_capability(&self, capability: Capability) -> Vec<Arc<ModelDescriptor>> {
        self.snapshot
            .read()
            .by_capability
            .get(&capability)
            .cloned()
            .unwrap_or_default()
    }

    pub fn list_by_framework(&self, framework: Framework) -> Vec<Arc<ModelDescriptor>> {
        self.snapshot
            .read()
            .by_framework
            .get(&framework)
            .cloned()
            .unwrap_or_default()
    }

    pub fn list_all(&self) -> Vec<Arc<ModelDescriptor>> {
        let mut all: Vec<_> = self.snapshot.read().by_id.values().cloned().collect();
        all.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        all
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.snapshot.write() = Arc::new(Snapshot::default());
    }

    /// Scan a directory through the platform adapter and register descriptors
    /// for recognized model files. Framework and capability are inferred from
    /// the extension and filename. Returns the ids of newly added models.
    pub fn discover_downloaded(&self, directory: &str) -> Result<Vec<String>> {
        let entries = platform::list_dir(directory)?;
        let mut added = Vec::new();
        for path in entries {
            let Some(descriptor) = synthesize_descriptor(&path) else {
                continue;
            };
            if self.get(&descriptor.model_id).is_none() {
                added.push(descriptor.model_id.clone());
                self.put(descriptor);
            }
        }
        Ok(added)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Infer a descriptor from a model file path. Unrecognized extensions yield
/// `None` and are skipped during discovery.
fn synthesize_descriptor(path: &str) -> Option<ModelDescriptor> {
    let lower = path.to_lowercase();
    let name = std::path::Path::new(&lower)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (framework, capability) = if name.ends_with(".gguf") {
        (Framework::Llamacpp, Capability::TextGeneration)
    } else if name.ends_with(".onnx") {
        let capability = if name.contains("vad") {
            Capability::Vad
        } else if name.contains("tts") || name.contains("kokoro") {
            Capability::Tts
        } else if name.contains("whisper") || name.contains("stt") || name.contains("asr") {
            Capability::Stt
        } else if name.contains("wake") {
            Capability::WakeWord
        } else {
            Capability::Embeddings
        };
        (Framework::Onnx, capability)
    } else if name.ends_with(".bin") && name.contains("whisper") {
        (Framework::Whispercpp, Capability::Stt)
    } else if name.ends_with(".safetensors") {
        (Framework::Sdcpp, Capability::Diffusion)
    } else {
        return None;
    };

    Some(ModelDescriptor::from_path(path, framework, capability))
}

static MODELS: Lazy<ModelRegistry> = Lazy::new(ModelRegistry::new);

/// The process-wide model registry.
pub fn models() -> &'static ModelRegistry {
    &MODELS
}

/// Resolve a model reference: a registered `model_id` first, then a raw file
/// path (checked through the platform adapter when one is installed).
pub fn resolve(reference: &str, capability: Capability) -> Result<Arc<ModelDescriptor>> {
    if let Some(descriptor) = models().get(reference) {
        return Ok(descriptor);
    }
    // Built-in backends need no model file.
    if reference == "builtin" {
        return Ok(Arc::new(ModelDescriptor {
            model_id: "builtin".into(),
            display_name: "builtin".into(),
            local_path: None,
            framework: Framework::Builtin,
            capability,
            size_bytes: 0,
            quantization: None,
            context_length: 0,
            is_downloaded: true,
        }));
    }
    let looks_like_path = reference.contains('/') || reference.contains('.');
    if looks_like_path {
        if let Ok(false) = platform::file_exists(reference) {
            return Err(RuntimeError::ModelNotFound(reference.to_string()));
        }
        if let Some(descriptor) = synthesize_descriptor(reference) {
            return Ok(Arc::new(ModelDescriptor {
                capability,
                ..descriptor
            }));
        }
        return Ok(Arc::new(ModelDescriptor::from_path(
            reference,
            Framework::Unknown,
            capability,
        )));
    }
    Err(RuntimeError::ModelNotFound(reference.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, framework: Framework, capability: Capability) -> ModelDescriptor {
        ModelDescriptor {
            model_id: id.into(),
            display_name: id.into(),
            local_path: Some(format!("/models/{id}.gguf")),
            framework,
            capability,
            size_bytes: 1024,
            quantization: Some("Q4_K_M".into()),
            context_length: 4096,
            is_downloaded: true,
        }
    }

    #[test]
    fn put_get_remove_roundtrip() {
        let registry = ModelRegistry::new();
        let desc = descriptor("tiny-llm", Framework::Llamacpp, Capability::TextGeneration);
        registry.put(desc.clone());

        let found = registry.get("tiny-llm").unwrap();
        assert_eq!(found.model_id, desc.model_id);
        assert_eq!(found.framework, desc.framework);

        assert!(registry.remove("tiny-llm"));
        assert!(registry.get("tiny-llm").is_none());
        assert!(!registry.remove("tiny-llm"));
    }

    #[test]
    fn secondary_indices_track_writes() {
        let registry = ModelRegistry::new();
        registry.put(descriptor("a", Framework::Llamacpp, Capability::TextGeneration));
        registry.put(descriptor("b", Framework::Onnx, Capability::Stt));
        registry.put(descriptor("c", Framework::Onnx, Capability::Tts));

        assert_eq!(registry.list_by_framework(Framework::Onnx).len(), 2);
        assert_eq!(registry.list_by_capability(Capability::Stt).len(), 1);

        registry.remove("b");
        assert_eq!(registry.list_by_framework(Framework::Onnx).len(), 1);
        assert!(registry.list_by_capability(Capability::Stt).is_empty());
    }

    #[test]
    fn put_replaces_existing_id() {
        let registry = ModelRegistry::new();
        registry.put(descriptor("m", Framework::Llamacpp, Capability::TextGeneration));
        registry.put(descriptor("m", Framework::Onnx, Capability::Embeddings));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("m").unwrap().framework, Framework::Onnx);
    }

    #[test]
    fn synthesize_recognizes_extensions() {
        let gguf = synthesize_descriptor("/models/phi-3-mini.Q4.gguf").unwrap();
        assert_eq!(gguf.framework, Framework::Llamacpp);
        assert_eq!(gguf.capability, Capability::TextGeneration);

        let vad = synthesize_descriptor("/models/silero_vad.onnx").unwrap();
        assert_eq!(vad.capability, Capability::Vad);

        let whisper = synthesize_descriptor("/models/ggml-whisper-base.bin").unwrap();
        assert_eq!(whisper.framework, Framework::Whispercpp);

        assert!(synthesize_descriptor("/models/readme.txt").is_none());
    }
}
