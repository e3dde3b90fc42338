//! Retrieval-augmented generation pipeline.
//!
//! Composes a dense vector index, a BM25 keyword index, the chunker, an
//! embeddings component and an LLM component. Retrieval is hybrid and
//! sentence-level: dense search selects parent chunks, their sentences are
//! re-scored against the query, BM25 chunk scores are fused in by score
//! normalization, and the top sentences feed an adaptive accumulation loop
//! that appends one sentence at a time, probing the LLM's self-assessed
//! confidence until the threshold is reached.

pub mod chunker;

pub use chunker::{ChunkerConfig, DocumentChunker, TextChunk};

use crate::component::Component;
use crate::error::{Result, RuntimeError};
use crate::events::{self, EventCategory, EventSeverity};
use crate::handle::{CoreObject, Handle, HandleType};
use crate::index::{
    Bm25Index, DistanceMetric, FlatIndex, HnswIndex, HnswParams, IndexBackend, IndexConfig,
    VectorIndex,
};
use crate::platform;
use crate::registry::models::Capability;
use crate::service::embeddings::cosine_similarity;
use crate::service::llm::{FinishReason, GenerationOptions, GenerationResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Contrastive in-context-learning prompt injected before every query: two
/// worked examples teaching the model to judge whether retrieved context is
/// sufficient to answer.
pub const ICL_SYSTEM_PROMPT: &str = "You are a question-answering assistant. Given context passages and a question, \
determine if the passages contain enough information to answer the question.\n\n\
Example 1 (Sufficient context):\n\
Context: \"The Eiffel Tower was completed in 1889 for the World's Fair in Paris.\"\n\
Question: \"When was the Eiffel Tower built?\"\n\
Assessment: Yes - the context directly states the completion year.\n\n\
Example 2 (Insufficient context):\n\
Context: \"Paris is the capital of France and known for its cuisine.\"\n\
Question: \"When was the Eiffel Tower built?\"\n\
Assessment: No - the context discusses Paris but not the Eiffel Tower's construction date.\n";

pub const NO_CONTEXT_RESPONSE: &str =
    "I don't have enough information to answer that question.";

/// Parent chunks pulled by dense search before sentence re-scoring.
const PARENT_CHUNK_COUNT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub embedding_dimension: usize,
    /// Sentences kept after fusion.
    pub top_k: usize,
    /// Dense similarity floor for parent chunks.
    pub similarity_threshold: f32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Adaptive loop stops once probe confidence exceeds this.
    pub confidence_threshold: f32,
    /// When false (strict filtering), a query whose confidence never reaches
    /// the threshold returns the canned no-context response.
    pub keep_partial_context: bool,
    /// Weight of the BM25 score in fusion; dense gets `1 - bm25_weight`.
    pub bm25_weight: f32,
    pub icl_system_prompt: String,
    pub no_context_response: String,
    pub backend: IndexBackend,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 384,
            top_k: 10,
            similarity_threshold: 0.15,
            chunk_size: 180,
            chunk_overlap: 30,
            confidence_threshold: 0.5,
            keep_partial_context: false,
            bm25_weight: 0.5,
            icl_system_prompt: ICL_SYSTEM_PROMPT.to_string(),
            no_context_response: NO_CONTEXT_RESPONSE.to_string(),
            backend: IndexBackend::Flat,
        }
    }
}

/// A retrieved, fused-scored sentence.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedSentence {
    pub id: String,
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
    pub dense_score: f32,
    pub sparse_score: f32,
    pub metadata: Option<serde_json::Value>,
}

/// Final answer plus retrieval metadata.
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub result: GenerationResult,
    pub metadata: serde_json::Value,
}

pub struct RagPipeline {
    config: RagConfig,
    chunker: DocumentChunker,
    dense: Mutex<Box<dyn VectorIndex>>,
    sparse: Mutex<Bm25Index>,
    embeddings: Arc<Component>,
    llm: Arc<Component>,
    next_chunk_id: AtomicU64,
}

impl RagPipeline {
    /// Build a pipeline over pre-created service components and register it
    /// in the handle registry.
    pub fn create(
        config: RagConfig,
        llm: Arc<Component>,
        embeddings: Arc<Component>,
    ) -> Result<(Arc<Self>, Handle)> {
        if llm.capability() != Capability::TextGeneration {
            return Err(RuntimeError::InvalidArgument(
                "rag pipeline needs a text generation component".into(),
            ));
        }
        if embeddings.capability() != Capability::Embeddings {
            return Err(RuntimeError::InvalidArgument(
                "rag pipeline needs an embeddings component".into(),
            ));
        }

        let index_config = IndexConfig {
            dimension: config.embedding_dimension,
            metric: DistanceMetric::Cosine,
        };
        let dense: Box<dyn VectorIndex> = match config.backend {
            IndexBackend::Flat => Box::new(FlatIndex::new(index_config)),
            IndexBackend::Hnsw => Box::new(HnswIndex::new(index_config, HnswParams::default())),
        };

        let chunker = DocumentChunker::new(ChunkerConfig {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            chars_per_token: 4,
        });

        let pipeline = Arc::new(Self {
            config,
            chunker,
            dense: Mutex::new(dense),
            sparse: Mutex::new(Bm25Index::new()),
            embeddings,
            llm,
            next_chunk_id: AtomicU64::new(0),
        });
        let handle = crate::handle::registry()
            .register(CoreObject::Rag(pipeline.clone()), HandleType::Rag);
        Ok((pipeline, handle))
    }

    pub fn document_count(&self) -> usize {
        self.dense.lock().len()
    }

    pub fn clear(&self) {
        self.dense.lock().clear();
        self.sparse.lock().clear();
        self.next_chunk_id.store(0, Ordering::Relaxed);
    }

    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "chunks": self.document_count(),
            "config": self.config,
        })
    }

    /// Chunk, embed and index a document. Returns the number of chunks added.
    pub fn add_document(&self, text: &str, metadata: serde_json::Value) -> Result<usize> {
        if text.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty document".into()));
        }

        let chunks = self.chunker.chunk_document(text);
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embeddings.embed_batch(&texts)?;

        let source_prefix: String = text.chars().take(100).collect();
        let mut added = 0usize;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            if embedding.len() != self.config.embedding_dimension {
                platform::log(
                    platform::LogLevel::Warn,
                    "rag",
                    &format!(
                        "embedding dimension mismatch: got {}, expected {}",
                        embedding.len(),
                        self.config.embedding_dimension
                    ),
                );
                continue;
            }
            let chunk_id = format!("chunk_{}", self.next_chunk_id.fetch_add(1, Ordering::Relaxed));
            let mut chunk_meta = metadata.clone();
            if !chunk_meta.is_object() {
                chunk_meta = serde_json::json!({});
            }
            chunk_meta["source_text"] = serde_json::Value::String(source_prefix.clone());

            self.dense
                .lock()
                .add(&chunk_id, &embedding, &chunk.text, Some(chunk_meta))?;
            self.sparse.lock().add_chunk(&chunk_id, &chunk.text);
            added += 1;
        }

        events::emit(
            EventCategory::Memory,
            EventSeverity::Info,
            serde_json::json!({
                "kind": "rag_document_added",
                "chunks": added,
                "total_chunks": self.document_count(),
            }),
        );
        Ok(added)
    }

    /// Hybrid sentence-level retrieval.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedSentence>> {
        if query.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty query".into()));
        }

        let query_embedding = self.embeddings.embed(query)?;
        if query_embedding.len() != self.config.embedding_dimension {
            return Err(RuntimeError::InferenceFailed(
                "query embedding dimension mismatch".into(),
            ));
        }

        // Dense parent retrieval with the similarity floor.
        let parents: Vec<_> = self
            .dense
            .lock()
            .search(&query_embedding, PARENT_CHUNK_COUNT, None)?
            .into_iter()
            .filter(|hit| hit.score >= self.config.similarity_threshold)
            .collect();
        if parents.is_empty() {
            return Ok(Vec::new());
        }

        // Sparse chunk scores for fusion.
        let sparse_scores: HashMap<String, f32> = self
            .sparse
            .lock()
            .search(query, PARENT_CHUNK_COUNT * 4)
            .into_iter()
            .collect();

        struct ScoredSentence {
            text: String,
            dense: f32,
            sparse: f32,
            chunk_id: String,
            metadata: Option<serde_json::Value>,
        }

        let mut sentences: Vec<ScoredSentence> = Vec::new();
        for parent in &parents {
            let parent_sparse = sparse_scores.get(&parent.id).copied().unwrap_or(0.0);
            let split = self.chunker.split_into_sentences(&parent.text);
            let candidates: Vec<String> =
                split.into_iter().filter(|s| s.len() >= 3).collect();
            if candidates.is_empty() {
                continue;
            }
            let embeddings = self.embeddings.embed_batch(&candidates)?;
            for (sentence, embedding) in candidates.into_iter().zip(embeddings) {
                sentences.push(ScoredSentence {
                    dense: cosine_similarity(&query_embedding, &embedding),
                    sparse: parent_sparse,
                    text: sentence,
                    chunk_id: parent.id.clone(),
                    metadata: parent.metadata.clone(),
                });
            }
        }
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        // Score-normalized fusion with the configured weight.
        let (dense_lo, dense_hi) = min_max(sentences.iter().map(|s| s.dense));
        let (sparse_lo, sparse_hi) = min_max(sentences.iter().map(|s| s.sparse));
        let w_sparse = self.config.bm25_weight.clamp(0.0, 1.0);
        let w_dense = 1.0 - w_sparse;

        let mut fused: Vec<(f32, ScoredSentence)> = sentences
            .into_iter()
            .map(|s| {
                let dn = normalize_score(s.dense, dense_lo, dense_hi);
                let sn = normalize_score(s.sparse, sparse_lo, sparse_hi);
                (w_dense * dn + w_sparse * sn, s)
            })
            .collect();
        fused.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        fused.truncate(top_k.max(1));

        Ok(fused
            .into_iter()
            .enumerate()
            .map(|(rank, (score, s))| RetrievedSentence {
                id: format!("{}_s{rank}", s.chunk_id),
                chunk_id: s.chunk_id,
                text: s.text,
                score,
                dense_score: s.dense,
                sparse_score: s.sparse,
                metadata: s.metadata,
            })
            .collect())
    }

    /// End-to-end query with adaptive context accumulation.
    pub fn query(&self, question: &str, options: &GenerationOptions) -> Result<RagResponse> {
        if question.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty question".into()));
        }
        options.validate()?;

        self.llm.clear_context()?;
        let injected = self.llm.inject_system_prompt(&self.config.icl_system_prompt)?;
        if !injected {
            platform::log(
                platform::LogLevel::Info,
                "rag",
                "inject_system_prompt unsupported by generator, continuing",
            );
        }

        let retrieved = self.search(question, self.config.top_k)?;
        if retrieved.is_empty() {
            return Ok(self.no_context_response("no_context"));
        }

        let mut confidence = 0.0f32;
        let mut sentences_used = 0usize;
        for sentence in &retrieved {
            let append_text = if sentences_used == 0 {
                sentence.text.clone()
            } else {
                format!("\n{}", sentence.text)
            };
            self.llm.append_context(&append_text)?;
            sentences_used += 1;

            confidence = self.llm.probe_confidence(question)?;
            events::emit(
                EventCategory::Memory,
                EventSeverity::Debug,
                serde_json::json!({
                    "kind": "rag_adaptive_step",
                    "sentence": sentences_used,
                    "total": retrieved.len(),
                    "confidence": confidence,
                    "threshold": self.config.confidence_threshold,
                }),
            );
            if confidence > self.config.confidence_threshold {
                break;
            }
        }

        let threshold_reached = confidence > self.config.confidence_threshold;

        if !self.config.keep_partial_context && !threshold_reached {
            // Strict filtering: the accumulated context never became
            // sufficient, so it is discarded entirely.
            self.llm.clear_context()?;
            let _ = self.llm.inject_system_prompt(&self.config.icl_system_prompt)?;
            let mut response = self.no_context_response("no_context");
            response.metadata["final_confidence"] =
                serde_json::json!(confidence);
            response.metadata["total_sentences"] = serde_json::json!(retrieved.len());
            return Ok(response);
        }

        let suffix = format!("\n\nQuestion: {question}\n\nAnswer:");
        let result = self.llm.generate_from_context(&suffix, options)?;

        let sources: Vec<serde_json::Value> = retrieved
            .iter()
            .take(sentences_used)
            .map(|s| {
                serde_json::json!({
                    "id": s.id,
                    "score": s.score,
                    "source": s.metadata.as_ref().and_then(|m| m.get("source_text")),
                })
            })
            .collect();

        Ok(RagResponse {
            result,
            metadata: serde_json::json!({
                "sentences_used": sentences_used,
                "final_confidence": confidence,
                "threshold_reached": threshold_reached,
                "total_sentences": retrieved.len(),
                "keep_partial_context": self.config.keep_partial_context,
                "sources": sources,
            }),
        })
    }

    fn no_context_response(&self, reason: &str) -> RagResponse {
        RagResponse {
            result: GenerationResult {
                text: self.config.no_context_response.clone(),
                finish_reason: FinishReason::Stop,
                ..Default::default()
            },
            metadata: serde_json::json!({
                "reason": reason,
                "sentences_used": 0,
                "threshold_reached": false,
                "keep_partial_context": self.config.keep_partial_context,
            }),
        }
    }
}

fn min_max(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    (lo, hi)
}

/// Min-max normalization; a degenerate range maps to 1.0 so a lone source
/// neither dominates nor vanishes.
fn normalize_score(value: f32, lo: f32, hi: f32) -> f32 {
    if !(hi > lo) {
        return 1.0;
    }
    (value - lo) / (hi - lo)
}
