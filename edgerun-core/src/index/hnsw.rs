//! HNSW approximate nearest-neighbor index.
//!
//! Arena representation: nodes are indices into parallel vectors, per-layer
//! neighbor lists are `Vec<u32>` into the same arena, so the conceptually
//! cyclic graph needs no reference counting. Deletion is tombstone-based:
//! tombstoned nodes keep routing traffic but never appear in results;
//! physical compaction happens when a snapshot is taken.

use crate::error::{Result, RuntimeError};
use crate::index::{
    check_dimension, normalize, DistanceMetric, IndexConfig, IndexSnapshot, SearchFilter,
    SearchHit, SnapshotEntry, VectorIndex,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Neighbors kept per node per layer (layer 0 keeps 2·M).
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

struct Node {
    id: String,
    level: usize,
    deleted: bool,
    /// neighbors[layer] -> arena indices.
    neighbors: Vec<Vec<u32>>,
}

/// (distance, node) ordered by distance, used both ways via `Reverse`.
#[derive(PartialEq)]
struct Candidate {
    distance: f32,
    node: u32,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

pub struct HnswIndex {
    config: IndexConfig,
    params: HnswParams,
    nodes: Vec<Node>,
    vectors: Vec<f32>,
    texts: Vec<String>,
    metadata: Vec<Option<serde_json::Value>>,
    id_to_slot: HashMap<String, u32>,
    entry_point: Option<u32>,
    max_level: usize,
    /// Level multiplier 1/ln(M) for the geometric level draw.
    level_mult: f64,
    live_count: usize,
    rng: StdRng,
}

impl HnswIndex {
    pub fn new(config: IndexConfig, params: HnswParams) -> Self {
        let m = params.m.max(2);
        Self {
            config,
            params: HnswParams { m, ..params },
            nodes: Vec::new(),
            vectors: Vec::new(),
            texts: Vec::new(),
            metadata: Vec::new(),
            id_to_slot: HashMap::new(),
            entry_point: None,
            max_level: 0,
            level_mult: 1.0 / (m as f64).ln(),
            live_count: 0,
            rng: StdRng::seed_from_u64(0x9e3779b97f4a7c15),
        }
    }

    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.params.ef_search = ef_search.max(1);
    }

    fn vector_at(&self, slot: u32) -> &[f32] {
        let dim = self.config.dimension;
        let base = slot as usize * dim;
        &self.vectors[base..base + dim]
    }

    fn distance_to(&self, query: &[f32], slot: u32) -> f32 {
        self.config.metric.distance(query, self.vector_at(slot))
    }

    fn max_neighbors(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    fn draw_level(&mut self) -> usize {
        let uniform: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        (-uniform.ln() * self.level_mult).floor() as usize
    }

    /// Amortized capacity: grow all arenas by a factor of 2 when full.
    fn ensure_capacity(&mut self) {
        if self.nodes.len() < self.nodes.capacity() {
            return;
        }
        let additional = self.nodes.capacity().max(64);
        self.nodes.reserve(additional);
        self.texts.reserve(additional);
        self.metadata.reserve(additional);
        self.vectors.reserve(additional * self.config.dimension);
    }

    /// Greedy descent: the single closest node at `layer`.
    fn greedy_step(&self, query: &[f32], start: u32, layer: usize) -> u32 {
        let mut current = start;
        let mut current_dist = self.distance_to(query, current);
        loop {
            let mut improved = false;
            for &neighbor in &self.nodes[current as usize].neighbors[layer] {
                let d = self.distance_to(query, neighbor);
                if d < current_dist {
                    current = neighbor;
                    current_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Best-first search within one layer; returns up to `ef` candidates
    /// sorted ascending by distance. Tombstoned nodes participate in routing.
    fn search_layer(&self, query: &[f32], entry: u32, ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        visited.insert(entry);

        let entry_dist = self.distance_to(query, entry);
        // Min-heap of nodes to expand.
        let mut to_expand: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();
        to_expand.push(std::cmp::Reverse(Candidate {
            distance: entry_dist,
            node: entry,
        }));
        // Max-heap of the best `ef` found so far (worst on top).
        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();
        best.push(Candidate {
            distance: entry_dist,
            node: entry,
        });

        while let Some(std::cmp::Reverse(candidate)) = to_expand.pop() {
            let worst_best = best.peek().map(|c| c.distance).unwrap_or(f32::INFINITY);
            if candidate.distance > worst_best && best.len() >= ef {
                break;
            }
            for &neighbor in &self.nodes[candidate.node as usize].neighbors[layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = self.distance_to(query, neighbor);
                let worst = best.peek().map(|c| c.distance).unwrap_or(f32::INFINITY);
                if best.len() < ef || d < worst {
                    to_expand.push(std::cmp::Reverse(Candidate {
                        distance: d,
                        node: neighbor,
                    }));
                    best.push(Candidate {
                        distance: d,
                        node: neighbor,
                    });
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut result = best.into_vec();
        result.sort();
        result
    }

    /// Connect `slot` to its selected neighbors at `layer`, pruning both
    /// sides to the layer's neighbor budget.
    fn link(&mut self, slot: u32, candidates: &[Candidate], layer: usize) {
        let limit = self.max_neighbors(layer);
        let selected: Vec<u32> = candidates.iter().take(limit).map(|c| c.node).collect();
        self.nodes[slot as usize].neighbors[layer] = selected.clone();

        for neighbor in selected {
            let list = &mut self.nodes[neighbor as usize].neighbors[layer];
            if !list.contains(&slot) {
                list.push(slot);
            }
            if list.len() > limit {
                // Keep the closest `limit` links.
                let anchor = neighbor;
                let mut scored: Vec<Candidate> = self.nodes[anchor as usize].neighbors[layer]
                    .iter()
                    .map(|&n| Candidate {
                        distance: self
                            .config
                            .metric
                            .distance(self.vector_at(anchor), self.vector_at(n)),
                        node: n,
                    })
                    .collect();
                scored.sort();
                self.nodes[anchor as usize].neighbors[layer] =
                    scored.into_iter().take(limit).map(|c| c.node).collect();
            }
        }
    }
}

impl VectorIndex for HnswIndex {
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
        check_dimension(&self.config, vector)?;
        let mut v = vector.to_vec();
        if self.config.metric == DistanceMetric::Cosine {
            normalize(&mut v);
        }

        self.ensure_capacity();
        let slot = self.nodes.len() as u32;
        let level = self.draw_level();
        self.nodes.push(Node {
            id: id.to_string(),
            level,
            deleted: false,
            neighbors: vec![Vec::new(); level + 1],
        });
        self.vectors.extend_from_slice(&v);
        self.texts.push(text.to_string());
        self.metadata.push(metadata);
        self.id_to_slot.insert(id.to_string(), slot);
        self.live_count += 1;

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(slot);
            self.max_level = level;
            return Ok(());
        };

        // Descend through layers above the new node's level.
        let mut current = entry;
        let mut layer = self.max_level;
        while layer > level {
            current = self.greedy_step(&v, current, layer);
            layer -= 1;
        }

        // Insert with ef_construction search on each shared layer.
        let top = level.min(self.max_level);
        for layer in (0..=top).rev() {
            let candidates = self.search_layer(&v, current, self.params.ef_construction, layer);
            if let Some(closest) = candidates.first() {
                current = closest.node;
            }
            self.link(slot, &candidates, layer);
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(slot);
        }
        Ok(())
    }

    fn update(
        &mut self,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        if !self.id_to_slot.contains_key(id) {
            return Err(RuntimeError::InvalidArgument(format!("unknown chunk id {id}")));
        }
        self.delete_by_id(id)?;
        self.add(id, vector, text, metadata)
    }

    fn delete_by_id(&mut self, id: &str) -> Result<bool> {
        let Some(slot) = self.id_to_slot.remove(id) else {
            return Ok(false);
        };
        let node = &mut self.nodes[slot as usize];
        if !node.deleted {
            node.deleted = true;
            self.live_count -= 1;
        }
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
        if self.live_count == 0 {
            return Ok(Vec::new());
        }
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };

        let mut q = query.to_vec();
        if self.config.metric == DistanceMetric::Cosine {
            normalize(&mut q);
        }

        let mut current = entry;
        for layer in (1..=self.max_level).rev() {
            current = self.greedy_step(&q, current, layer);
        }

        let ef = self.params.ef_search.max(k);
        let candidates = self.search_layer(&q, current, ef + ef, 0);

        let mut hits = Vec::with_capacity(k);
        for candidate in candidates {
            let node = &self.nodes[candidate.node as usize];
            if node.deleted {
                continue;
            }
            let slot = candidate.node as usize;
            if let Some(filter) = filter {
                if !filter(&node.id, self.metadata[slot].as_ref()) {
                    continue;
                }
            }
            hits.push(SearchHit {
                id: node.id.clone(),
                score: self.config.metric.score(candidate.distance),
                text: self.texts[slot].clone(),
                metadata: self.metadata[slot].clone(),
            });
            if hits.len() >= k {
                break;
            }
        }
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.live_count
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.vectors.clear();
        self.texts.clear();
        self.metadata.clear();
        self.id_to_slot.clear();
        self.entry_point = None;
        self.max_level = 0;
        self.live_count = 0;
    }

    /// Compacting snapshot: tombstoned nodes are dropped; the graph is
    /// rebuilt from flat entries on restore.
    fn snapshot(&self) -> Result<IndexSnapshot> {
        let dim = self.config.dimension;
        let entries = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !node.deleted)
            .map(|(slot, node)| SnapshotEntry {
                id: node.id.clone(),
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
