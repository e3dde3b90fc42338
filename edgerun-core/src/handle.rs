//! Opaque handle allocation and the process-wide handle registry.
//!
//! Everything the core owns on behalf of an embedder (components, memory
//! indices, pipelines, stats collectors, stream sessions) lives behind a
//! 64-bit typed handle. Handles are monotonically assigned and never reissued;
//! destroying one invalidates it atomically for all threads.
//!
//! Lookup is wait-free on a sharded concurrent map. Destruction removes the
//! entry first (so concurrent lookups fail fast with `InvalidHandle`) and then
//! quiesces the object under its own lock before dropping it.

use crate::component::Component;
use crate::error::{Result, RuntimeError};
use crate::index::MemoryIndexObject;
use crate::rag::RagPipeline;
use crate::registry::models::Capability;
use crate::service::stt::SttStream;
use crate::voice::VoiceAgentPipeline;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque 64-bit identifier handed across the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type tag checked on every lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleType {
    Component(Capability),
    MemoryIndex,
    Rag,
    VoiceAgent,
    BenchmarkStats,
    SttStream,
}

impl HandleType {
    pub fn name(&self) -> &'static str {
        match self {
            HandleType::Component(_) => "component",
            HandleType::MemoryIndex => "memory_index",
            HandleType::Rag => "rag",
            HandleType::VoiceAgent => "voice_agent",
            HandleType::BenchmarkStats => "benchmark_stats",
            HandleType::SttStream => "stt_stream",
        }
    }
}

/// The tagged variants the registry can own.
#[derive(Clone)]
pub enum CoreObject {
    Component(Arc<Component>),
    MemoryIndex(Arc<MemoryIndexObject>),
    Rag(Arc<RagPipeline>),
    VoiceAgent(Arc<VoiceAgentPipeline>),
    Stats(Arc<crate::benchmark::StatsCollector>),
    SttStream(Arc<Mutex<Box<dyn SttStream>>>),
}

impl std::fmt::Debug for CoreObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreObject::Component(_) => f.write_str("CoreObject::Component"),
            CoreObject::MemoryIndex(_) => f.write_str("CoreObject::MemoryIndex"),
            CoreObject::Rag(_) => f.write_str("CoreObject::Rag"),
            CoreObject::VoiceAgent(_) => f.write_str("CoreObject::VoiceAgent"),
            CoreObject::Stats(_) => f.write_str("CoreObject::Stats"),
            CoreObject::SttStream(_) => f.write_str("CoreObject::SttStream"),
        }
    }
}

impl CoreObject {
    /// Bring the object to rest before it is dropped. Runs after the entry
    /// has been removed from the map, so no new operations can start.
    fn quiesce(&self) {
        match self {
            CoreObject::Component(c) => c.shutdown(),
            CoreObject::VoiceAgent(v) => v.cancel(),
            CoreObject::SttStream(s) => {
                s.lock().input_finished();
            }
            _ => {}
        }
    }
}

struct Entry {
    tag: HandleType,
    object: CoreObject,
}

/// Process-wide table mapping opaque ids to core-owned objects.
pub struct HandleRegistry {
    entries: DashMap<u64, Entry>,
    next_id: AtomicU64,
}

impl HandleRegistry {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            // 0 is reserved as the invalid handle
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self, object: CoreObject, tag: HandleType) -> Handle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, Entry { tag, object });
        Handle(id)
    }

    /// O(1) average lookup with a tag check. Clones the inner `Arc`.
    pub fn lookup(&self, handle: Handle, expected: HandleType) -> Result<CoreObject> {
        let entry = self
            .entries
            .get(&handle.raw())
            .ok_or(RuntimeError::InvalidHandle(handle.raw()))?;
        if entry.tag != expected {
            return Err(RuntimeError::InvalidArgument(format!(
                "handle {} is a {}, expected {}",
                handle,
                entry.tag.name(),
                expected.name()
            )));
        }
        Ok(entry.object.clone())
    }

    /// Remove and tear down. Idempotent: destroying an already-destroyed
    /// handle is a success. In-flight operations finish under the object's
    /// own lock before resources are released.
    pub fn destroy(&self, handle: Handle) -> Result<()> {
        if let Some((_, entry)) = self.entries.remove(&handle.raw()) {
            entry.object.quiesce();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything. Used by `shutdown` for test isolation.
    pub fn clear(&self) {
        let ids: Vec<u64> = self.entries.iter().map(|e| *e.key()).collect();
        for id in ids {
            let _ = self.destroy(Handle(id));
        }
    }
}

static REGISTRY: Lazy<HandleRegistry> = Lazy::new(HandleRegistry::new);

/// The process-wide handle registry.
pub fn registry() -> &'static HandleRegistry {
    &REGISTRY
}

/// Convenience: look up a component handle of the given capability.
pub fn lookup_component(handle: Handle, capability: Capability) -> Result<Arc<Component>> {
    match registry().lookup(handle, HandleType::Component(capability))? {
        CoreObject::Component(c) => Ok(c),
        _ => Err(RuntimeError::InvalidHandle(handle.raw())),
    }
}
