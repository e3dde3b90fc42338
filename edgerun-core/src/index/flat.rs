//! Brute-force flat index.
//!
//! Entries live in contiguous arrays; insert is O(1) amortized, search scans
//! every entry and keeps the top-k in a bounded heap, O(N·D) per query.
//! Large scans parallelize across rayon workers with per-worker heaps.

use crate::error::{Result, RuntimeError};
use crate::index::{
    check_dimension, normalize, DistanceMetric, IndexConfig, IndexSnapshot, SearchFilter,
    SearchHit, SnapshotEntry, VectorIndex,
};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Scans larger than this use rayon.
const PARALLEL_SCAN_THRESHOLD: usize = 8192;

/// (distance, slot) max-heap entry: the worst candidate sits on top so it can
/// be evicted when a closer one arrives.
#[derive(PartialEq)]
struct HeapEntry {
    distance: f32,
    slot: usize,
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

pub struct FlatIndex {
    config: IndexConfig,
    ids: Vec<String>,
    vectors: Vec<f32>,
    texts: Vec<String>,
    metadata: Vec<Option<serde_json::Value>>,
    id_to_slot: HashMap<String, usize>,
}

impl FlatIndex {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            ids: Vec::new(),
            vectors: Vec::new(),
            texts: Vec::new(),
            metadata: Vec::new(),
            id_to_slot: HashMap::new(),
        }
    }

    fn prepare(&self, vector: &[f32]) -> Result<Vec<f32>> {
        check_dimension(&self.config, vector)?;
        let mut v = vector.to_vec();
        if self.config.metric == DistanceMetric::Cosine {
            normalize(&mut v);
        }
        Ok(v)
    }

    fn vector_at(&self, slot: usize) -> &[f32] {
        let dim = self.config.dimension;
        &self.vectors[slot * dim..(slot + 1) * dim]
    }

    fn scan_range(
        &self,
        range: std::ops::Range<usize>,
        query: &[f32],
        k: usize,
        filter: Option<SearchFilter<'_>>,
    ) -> BinaryHeap<HeapEntry> {
        let mut heap = BinaryHeap::with_capacity(k + 1);
        for slot in range {
            if let Some(filter) = filter {
                if !filter(&self.ids[slot], self.metadata[slot].as_ref()) {
                    continue;
                }
            }
            let distance = self.config.metric.distance(query, self.vector_at(slot));
            heap.push(HeapEntry { distance, slot });
            if heap.len() > k {
                heap.pop();
            }
        }
        heap
    }
}

impl VectorIndex for FlatIndex {
    fn add(
        &mut self,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        if self.id_to_slot.contains_key(id) {
            return Err(RuntimeError::InvalidArgument(format!(
                "duplicate chunk id {id}"
            )));
        }
        let v = self.prepare(vector)?;
        let slot = self.ids.len();
        self.ids.push(id.to_string());
        self.vectors.extend_from_slice(&v);
        self.texts.push(text.to_string());
        self.metadata.push(metadata);
        self.id_to_slot.insert(id.to_string(), slot);
        Ok(())
    }

    fn update(
        &mut self,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let slot = *self
            .id_to_slot
            .get(id)
            .ok_or_else(|| RuntimeError::InvalidArgument(format!("unknown chunk id {id}")))?;
        let v = self.prepare(vector)?;
        let dim = self.config.dimension;
        self.vectors[slot * dim..(slot + 1) * dim].copy_from_slice(&v);
        self.texts[slot] = text.to_string();
        self.metadata[slot] = metadata;
        Ok(())
    }

    fn delete_by_id(&mut self, id: &str) -> Result<bool> {
        let Some(slot) = self.id_to_slot.remove(id) else {
            return Ok(false);
        };
        let last = self.ids.len() - 1;
        let dim = self.config.dimension;

        self.ids.swap_remove(slot);
        self.texts.swap_remove(slot);
        self.metadata.swap_remove(slot);
        if slot != last {
            // Move the last vector into the vacated slot.
            let (head, tail) = self.vectors.split_at_mut(last * dim);
            head[slot * dim..(slot + 1) * dim].copy_from_slice(&tail[..dim]);
            self.id_to_slot.insert(self.ids[slot].clone(), slot);
        }
        self.vectors.truncate(last * dim);
        Ok(true)
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<SearchFilter<'_>>,
    ) -> Result<Vec<SearchHit>> {
        check_dimension(&self.config, query)?;
        if k == 0 {
            return Err(RuntimeError::InvalidArgument("k must be >= 1".into()));
        }
        if self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut q = query.to_vec();
        if self.config.metric == DistanceMetric::Cosine {
            normalize(&mut q);
        }

        let n = self.ids.len();
        let heap = if n >= PARALLEL_SCAN_THRESHOLD && filter.is_none() {
            let chunk = n.div_ceil(rayon::current_num_threads().max(1));
            let heaps: Vec<BinaryHeap<HeapEntry>> = (0..n)
                .into_par_iter()
                .step_by(chunk)
                .map(|start| self.scan_range(start..(start + chunk).min(n), &q, k, None))
                .collect();
            let mut merged = BinaryHeap::with_capacity(k + 1);
            for heap in heaps {
                for entry in heap {
                    merged.push(entry);
                    if merged.len() > k {
                        merged.pop();
                    }
                }
            }
            merged
        } else {
            self.scan_range(0..n, &q, k, filter)
        };

        let mut hits: Vec<SearchHit> = heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| SearchHit {
                id: self.ids[entry.slot].clone(),
                score: self.config.metric.score(entry.distance),
                text: self.texts[entry.slot].clone(),
                metadata: self.metadata[entry.slot].clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.vectors.clear();
        self.texts.clear();
        self.metadata.clear();
        self.id_to_slot.clear();
    }

    fn snapshot(&self) -> Result<IndexSnapshot> {
        let dim = self.config.dimension;
        let entries = self
            .ids
            .iter()
            .enumerate()
            .map(|(slot, id)| SnapshotEntry {
                id: id.clone(),
                vector: self.vectors[slot * dim..(slot + 1) * dim].to_vec(),
                text: self.texts[slot].clone(),
                metadata: self.metadata[slot].clone(),
            })
            .collect();
        Ok(IndexSnapshot {
            config: self.config,
            entries,
        })
    }

    fn restore(&mut self, snapshot: &IndexSnapshot) -> Result<()> {
        if snapshot.config.dimension != self.config.dimension {
            return Err(RuntimeError::InvalidArgument(format!(
                "snapshot dimension {} does not match index dimension {}",
                snapshot.config.dimension, self.config.dimension
            )));
        }
        self.clear();
        for entry in &snapshot.entries {
            self.add(
                &entry.id,
                &entry.vector,
                &entry.text,
                entry.metadata.clone(),
            )?;
        }
        Ok(())
    }

    fn config(&self) -> IndexConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cosine_index(dim: usize) -> FlatIndex {
        FlatIndex::new(IndexConfig {
            dimension: dim,
            metric: DistanceMetric::Cosine,
        })
    }

    fn random_unit(rng: &mut StdRng, dim: usize) -> Vec<f32> {
        let mut v: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect();
        normalize(&mut v);
        v
    }

    #[test]
    fn exact_match_ranks_first_with_near_unit_score() {
        let mut index = cosine_index(64);
        let mut rng = StdRng::seed_from_u64(42);
        let vectors: Vec<Vec<f32>> = (0..1000).map(|_| random_unit(&mut rng, 64)).collect();
        for (i, v) in vectors.iter().enumerate() {
            index
                .add(&i.to_string(), v, "", Some(serde_json::json!({ "i": i })))
                .unwrap();
        }

        let hits = index.search(&vectors[42], 5, None).unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].id, "42");
        assert!(hits[0].score >= 0.9999, "score {}", hits[0].score);
        assert_eq!(hits[0].metadata.as_ref().unwrap()["i"], 42);
    }

    #[test]
    fn l2_scores_are_larger_is_better() {
        let mut index = FlatIndex::new(IndexConfig {
            dimension: 2,
            metric: DistanceMetric::L2,
        });
        index.add("near", &[0.1, 0.0], "", None).unwrap();
        index.add("far", &[5.0, 5.0], "", None).unwrap();

        let hits = index.search(&[0.0, 0.0], 2, None).unwrap();
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn delete_swaps_and_preserves_remaining() {
        let mut index = cosine_index(4);
        index.add("a", &[1.0, 0.0, 0.0, 0.0], "ta", None).unwrap();
        index.add("b", &[0.0, 1.0, 0.0, 0.0], "tb", None).unwrap();
        index.add("c", &[0.0, 0.0, 1.0, 0.0], "tc", None).unwrap();

        assert!(index.delete_by_id("a").unwrap());
        assert!(!index.delete_by_id("a").unwrap());
        assert_eq!(index.len(), 2);

        let hits = index.search(&[0.0, 0.0, 1.0, 0.0], 1, None).unwrap();
        assert_eq!(hits[0].id, "c");
        assert_eq!(hits[0].text, "tc");
    }

    #[test]
    fn filter_excludes_candidates() {
        let mut index = cosine_index(2);
        index
            .add("keep", &[1.0, 0.0], "", Some(serde_json::json!({"keep": true})))
            .unwrap();
        index
            .add("skip", &[1.0, 0.0], "", Some(serde_json::json!({"keep": false})))
            .unwrap();

        let filter = |_id: &str, meta: Option<&serde_json::Value>| {
            meta.map(|m| m["keep"] == true).unwrap_or(false)
        };
        let hits = index.search(&[1.0, 0.0], 5, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "keep");
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let mut index = cosine_index(3);
        index.add("x", &[1.0, 2.0, 3.0], "x text", None).unwrap();
        index.add("y", &[3.0, 2.0, 1.0], "y text", None).unwrap();

        let snapshot = index.snapshot().unwrap();
        let mut restored = cosine_index(3);
        restored.restore(&snapshot).unwrap();
        assert_eq!(restored.len(), 2);

        let hits = restored.search(&[1.0, 2.0, 3.0], 1, None).unwrap();
        assert_eq!(hits[0].id, "x");
        assert_eq!(hits[0].text, "x text");
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = cosine_index(4);
        assert!(index.add("a", &[1.0, 2.0], "", None).is_err());
        index.add("a", &[1.0, 0.0, 0.0, 0.0], "", None).unwrap();
        assert!(index.search(&[1.0], 1, None).is_err());
    }

    #[test]
    fn duplicate_id_is_rejected_update_is_not() {
        let mut index = cosine_index(2);
        index.add("a", &[1.0, 0.0], "one", None).unwrap();
        assert!(index.add("a", &[0.0, 1.0], "two", None).is_err());
        index.update("a", &[0.0, 1.0], "two", None).unwrap();
        let hits = index.search(&[0.0, 1.0], 1, None).unwrap();
        assert_eq!(hits[0].text, "two");
    }
}
