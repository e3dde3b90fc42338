//! Okapi BM25 sparse keyword index.
//!
//! Runs alongside the dense index to catch exact keywords, acronyms, ids and
//! rare terms that embeddings blur. No persistence; rebuilt from the chunk
//! store on load. Parameters are the classic k1=1.2, b=0.75.

use std::collections::HashMap;

const K1: f32 = 1.2;
const B: f32 = 0.75;

#[derive(Default)]
pub struct Bm25Index {
    /// term -> chunk ids containing the term.
    inverted: HashMap<String, Vec<String>>,
    /// chunk id -> term -> frequency.
    term_freqs: HashMap<String, HashMap<String, usize>>,
    /// chunk id -> token count.
    lengths: HashMap<String, usize>,
    total_length: usize,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower-cased whitespace tokens with punctuation stripped.
    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
            })
            .filter(|w| !w.is_empty())
            .collect()
    }

    pub fn add_chunk(&mut self, chunk_id: &str, text: &str) {
        if self.term_freqs.contains_key(chunk_id) {
            self.remove_chunk(chunk_id);
        }
        let tokens = Self::tokenize(text);
        let mut freqs: HashMap<String, usize> = HashMap::new();
        for token in &tokens {
            *freqs.entry(token.clone()).or_insert(0) += 1;
        }
        for term in freqs.keys() {
            self.inverted
                .entry(term.clone())
                .or_default()
                .push(chunk_id.to_string());
        }
        self.total_length += tokens.len();
        self.lengths.insert(chunk_id.to_string(), tokens.len());
        self.term_freqs.insert(chunk_id.to_string(), freqs);
    }

    pub fn add_chunks_batch(&mut self, chunks: &[(String, String)]) {
        for (id, text) in chunks {
            self.add_chunk(id, text);
        }
    }

    pub fn remove_chunk(&mut self, chunk_id: &str) {
        let Some(freqs) = self.term_freqs.remove(chunk_id) else {
            return;
        };
        for term in freqs.keys() {
            if let Some(postings) = self.inverted.get_mut(term) {
                postings.retain(|id| id != chunk_id);
                if postings.is_empty() {
                    self.inverted.remove(term);
                }
            }
        }
        if let Some(len) = self.lengths.remove(chunk_id) {
            self.total_length -= len;
        }
    }

    pub fn clear(&mut self) {
        self.inverted.clear();
        self.term_freqs.clear();
        self.lengths.clear();
        self.total_length = 0;
    }

    pub fn len(&self) -> usize {
        self.term_freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.term_freqs.is_empty()
    }

    /// Score every chunk containing any query term; top-k descending.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32)> {
        let n = self.term_freqs.len();
        if n == 0 || top_k == 0 {
            return Vec::new();
        }
        let avg_len = self.total_length as f32 / n as f32;
        let query_terms = Self::tokenize(query);

        let mut scores: HashMap<&str, f32> = HashMap::new();
        for term in &query_terms {
            let Some(postings) = self.inverted.get(term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = ((n as f32 - df + 0.5) / (df + 0.5) + 1.0).ln();

            for chunk_id in postings {
                let tf = self
                    .term_freqs
                    .get(chunk_id)
                    .and_then(|freqs| freqs.get(term))
                    .copied()
                    .unwrap_or(0) as f32;
                let len = *self.lengths.get(chunk_id).unwrap_or(&0) as f32;
                let denom = tf + K1 * (1.0 - B + B * len / avg_len.max(1e-6));
                let score = idf * tf * (K1 + 1.0) / denom.max(1e-6);
                *scores.entry(chunk_id.as_str()).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(String, f32)> = scores
            .into_iter()
            .map(|(id, score)| (id.to_string(), score))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Bm25Index {
        let mut index = Bm25Index::new();
        index.add_chunk("doc1", "The Eiffel Tower was completed in 1889 for the World's Fair.");
        index.add_chunk("doc2", "Paris is the capital of France, known for its cuisine.");
        index.add_chunk("doc3", "The Tokyo Tower was inspired by the Eiffel Tower design.");
        index.add_chunk("doc4", "Rust guarantees memory safety without garbage collection.");
        index
    }

    #[test]
    fn verbatim_substring_document_ranks_in_top_10() {
        let index = corpus();
        let results = index.search("completed in 1889", 10);
        assert!(
            results.iter().any(|(id, _)| id == "doc1"),
            "doc1 should match its own words: {results:?}"
        );
        assert_eq!(results[0].0, "doc1");
    }

    #[test]
    fn rare_terms_outweigh_common_ones() {
        let index = corpus();
        let results = index.search("eiffel", 10);
        // Both Eiffel docs match, unrelated ones do not.
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert!(ids.contains(&"doc1"));
        assert!(ids.contains(&"doc3"));
        assert!(!ids.contains(&"doc4"));
    }

    #[test]
    fn punctuation_and_case_are_normalized() {
        let index = corpus();
        let results = index.search("WORLD'S fair!", 10);
        assert_eq!(results[0].0, "doc1");
    }

    #[test]
    fn remove_chunk_unindexes_terms() {
        let mut index = corpus();
        index.remove_chunk("doc1");
        assert_eq!(index.len(), 3);
        let results = index.search("1889", 10);
        assert!(results.is_empty());
    }

    #[test]
    fn re_adding_a_chunk_replaces_it() {
        let mut index = corpus();
        index.add_chunk("doc1", "completely different content now");
        assert_eq!(index.len(), 4);
        assert!(index.search("1889", 10).is_empty());
        assert!(!index.search("different content", 10).is_empty());
    }

    #[test]
    fn no_query_terms_yields_empty() {
        let index = corpus();
        assert!(index.search("zzz qqq", 10).is_empty());
        assert!(index.search("", 10).is_empty());
    }
}
