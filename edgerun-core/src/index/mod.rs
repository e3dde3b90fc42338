//! Memory (vector) index.
//!
//! Two backends behind one vtable: a brute-force flat scan and an HNSW
//! graph. Distance metric is fixed at creation; scores returned from
//! `search` are always normalized to larger-is-better regardless of metric.
//! Concurrency: many readers, exclusive writers, enforced by the
//! [`MemoryIndexObject`] wrapper the handle registry owns.

pub mod bm25;
pub mod flat;
pub mod hnsw;

pub use bm25::Bm25Index;
pub use flat::FlatIndex;
pub use hnsw::{HnswIndex, HnswParams};

use crate::error::{Result, RuntimeError};
use crate::handle::{CoreObject, Handle, HandleType};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    L2,
    Cosine,
    InnerProduct,
}

impl DistanceMetric {
    /// Raw distance, smaller is better. Cosine assumes both vectors are
    /// already L2-normalized (the indices normalize on insert and query).
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>(),
            DistanceMetric::Cosine => 1.0 - dot(a, b),
            DistanceMetric::InnerProduct => -dot(a, b),
        }
    }

    /// Convert a raw distance into the externally visible score, oriented so
    /// larger is always better.
    pub fn score(&self, distance: f32) -> f32 {
        match self {
            DistanceMetric::L2 => -distance,
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::InnerProduct => -distance,
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// L2-normalize in place; zero vectors are left untouched.
pub(crate) fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexConfig {
    pub dimension: usize,
    pub metric: DistanceMetric,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub metadata: Option<serde_json::Value>,
}

/// Predicate applied to candidates before they enter the result set.
pub type SearchFilter<'a> = &'a dyn Fn(&str, Option<&serde_json::Value>) -> bool;

/// Portable snapshot: flat entries, graph structure rebuilt on restore.
/// Taking a snapshot also physically compacts tombstoned entries away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub config: IndexConfig,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Option<serde_json::Value>,
}

/// Common vtable over the flat and HNSW backends.
pub trait VectorIndex: Send + Sync {
    fn add(
        &mut self,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<()>;

    fn update(
        &mut self,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<()>;

    /// Returns whether the id existed.
    fn delete_by_id(&mut self, id: &str) -> Result<bool>;

    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<SearchFilter<'_>>,
    ) -> Result<Vec<SearchHit>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);

    fn snapshot(&self) -> Result<IndexSnapshot>;

    fn restore(&mut self, snapshot: &IndexSnapshot) -> Result<()>;

    fn config(&self) -> IndexConfig;
}

pub(crate) fn check_dimension(config: &IndexConfig, vector: &[f32]) -> Result<()> {
    if vector.len() != config.dimension {
        return Err(RuntimeError::InvalidArgument(format!(
            "vector has dimension {}, index expects {}",
            vector.len(),
            config.dimension
        )));
    }
    Ok(())
}

/// Backend selector at index creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    Flat,
    Hnsw,
}

/// Registry-owned wrapper enforcing the reader/writer policy.
pub struct MemoryIndexObject {
    inner: RwLock<Box<dyn VectorIndex>>,
}

impl MemoryIndexObject {
    pub fn create(backend: IndexBackend, config: IndexConfig) -> (Arc<Self>, Handle) {
        let index: Box<dyn VectorIndex> = match backend {
            IndexBackend::Flat => Box::new(FlatIndex::new(config)),
            IndexBackend::Hnsw => Box::new(HnswIndex::new(config, HnswParams::default())),
        };
        let object = Arc::new(Self {
            inner: RwLock::new(index),
        });
        let handle = crate::handle::registry()
            .register(CoreObject::MemoryIndex(object.clone()), HandleType::MemoryIndex);
        (object, handle)
    }

    pub fn add(
        &self,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        self.inner.write().add(id, vector, text, metadata)
    }

    pub fn update(
        &self,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        self.inner.write().update(id, vector, text, metadata)
    }

    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        self.inner.write().delete_by_id(id)
    }

    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<SearchFilter<'_>>,
    ) -> Result<Vec<SearchHit>> {
        self.inner.read().search(query, k, filter)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.write().clear()
    }

    pub fn snapshot(&self) -> Result<IndexSnapshot> {
        self.inner.read().snapshot()
    }

    pub fn restore(&self, snapshot: &IndexSnapshot) -> Result<()> {
        self.inner.write().restore(snapshot)
    }
}
