//! Recursive document chunker.
//!
//! Splits on a separator hierarchy (paragraphs, lines, sentence enders,
//! clauses, words, characters), batching splits up to the chunk budget and
//! carrying a token-window overlap between consecutive chunks. Token counts
//! are approximated at 4 characters per token.

use serde::Serialize;

/// Separator hierarchy for standard English text.
const SEPARATORS: [&str; 9] = ["\n\n", "\n", ". ", "? ", "! ", "; ", ", ", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Chunk budget in approximate tokens.
    pub chunk_size: usize,
    /// Overlap carried between consecutive chunks, in approximate tokens.
    pub chunk_overlap: usize,
    pub chars_per_token: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 180,
            chunk_overlap: 30,
            chars_per_token: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TextChunk {
    pub text: String,
    /// Byte offset of the chunk start in the original document.
    pub start: usize,
    pub end: usize,
    pub index: usize,
}

pub struct DocumentChunker {
    config: ChunkerConfig,
}

impl DocumentChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn estimate_tokens(&self, text: &str) -> usize {
        text.len() / self.config.chars_per_token.max(1)
    }

    pub fn chunk_document(&self, text: &str) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }
        let size = self.config.chunk_size * self.config.chars_per_token;
        let overlap = self.config.chunk_overlap * self.config.chars_per_token;

        let mut chunks = Vec::new();
        let mut index = 0usize;
        recurse(text, 0, &SEPARATORS, size.max(1), overlap, &mut chunks, &mut index);
        chunks
    }

    /// Sentence boundaries at `.` `!` `?` `\n` followed by whitespace.
    pub fn split_into_sentences(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let bytes = text.as_bytes();
        let mut boundaries = vec![0usize];
        for (i, &b) in bytes.iter().enumerate() {
            if matches!(b, b'.' | b'!' | b'?' | b'\n')
                && i + 1 < bytes.len()
                && bytes[i + 1].is_ascii_whitespace()
            {
                boundaries.push(i + 1);
            }
        }
        boundaries.push(text.len());

        let mut sentences = Vec::new();
        for pair in boundaries.windows(2) {
            let sentence = text[pair[0]..pair[1]].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }
}

impl Default for DocumentChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

fn push_chunk(
    text: &str,
    base: usize,
    start: usize,
    end: usize,
    out: &mut Vec<TextChunk>,
    index: &mut usize,
) {
    let slice = &text[start..end];
    let leading = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    out.push(TextChunk {
        text: trimmed.to_string(),
        start: base + start + leading,
        end: base + start + leading + trimmed.len(),
        index: *index,
    });
    *index += 1;
}

/// Largest char-boundary offset <= `at`.
fn floor_boundary(text: &str, mut at: usize) -> usize {
    at = at.min(text.len());
    while at > 0 && !text.is_char_boundary(at) {
        at -= 1;
    }
    at
}

/// Split `text` inclusively on `sep`, yielding (byte_offset, piece) pairs.
fn split_keep(text: &str, sep: &str) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut start = 0usize;
    while let Some(found) = text[start..].find(sep) {
        let end = start + found + sep.len();
        pieces.push((start, end));
        start = end;
    }
    if start < text.len() {
        pieces.push((start, text.len()));
    }
    pieces
}

fn recurse(
    text: &str,
    base: usize,
    separators: &[&str],
    size: usize,
    overlap: usize,
    out: &mut Vec<TextChunk>,
    index: &mut usize,
) {
    if text.is_empty() {
        return;
    }
    if text.len() <= size {
        push_chunk(text, base, 0, text.len(), out, index);
        return;
    }

    // First separator that actually occurs; "" (char split) always matches.
    let position = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len() - 1);
    let separator = separators[position];
    let next_separators = &separators[position + 1..];

    let pieces: Vec<(usize, usize)> = if separator.is_empty() {
        let mut fixed = Vec::new();
        let mut start = 0usize;
        while start < text.len() {
            let end = floor_boundary(text, start + size).max(start + 1);
            fixed.push((start, end));
            start = end;
        }
        fixed
    } else {
        split_keep(text, separator)
    };

    // Batch pieces up to the budget, carrying the overlap window forward.
    let mut batch: Vec<(usize, usize)> = Vec::new();
    let mut batch_len = 0usize;

    let flush = |batch: &mut Vec<(usize, usize)>,
                 batch_len: &mut usize,
                 out: &mut Vec<TextChunk>,
                 index: &mut usize| {
        if let (Some(&(first, _)), Some(&(_, last))) = (batch.first(), batch.last()) {
            push_chunk(text, base, first, last, out, index);
        }
        let _ = batch_len;
    };

    for &(start, end) in &pieces {
        let piece_len = end - start;

        if piece_len > size {
            flush(&mut batch, &mut batch_len, out, index);
            batch.clear();
            batch_len = 0;
            if !next_separators.is_empty() {
                recurse(
                    &text[start..end],
                    base + start,
                    next_separators,
                    size,
                    overlap,
                    out,
                    index,
                );
            } else {
                push_chunk(text, base, start, end, out, index);
            }
            continue;
        }

        if batch_len + piece_len > size && !batch.is_empty() {
            flush(&mut batch, &mut batch_len, out, index);
            // Retain a tail of pieces as the overlap window.
            while batch.len() > 1
                && (batch_len > overlap || batch_len + piece_len > size)
            {
                let (first, second) = (batch[0], batch[1]);
                batch_len -= second.0 - first.0;
                batch.remove(0);
            }
            if !batch.is_empty() && batch_len + piece_len > size {
                let removed = batch.remove(0);
                batch_len -= removed.1 - removed.0;
            }
        }

        batch.push((start, end));
        batch_len += piece_len;
    }
    flush(&mut batch, &mut batch_len, out, index);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = DocumentChunker::default();
        let chunks = chunker.chunk_document("A short paragraph.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A short paragraph.");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn long_text_splits_within_budget() {
        let chunker = DocumentChunker::new(ChunkerConfig {
            chunk_size: 10,
            chunk_overlap: 2,
            chars_per_token: 4,
        });
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let text = sentence.repeat(20);
        let chunks = chunker.chunk_document(&text);

        assert!(chunks.len() > 1);
        let budget = 10 * 4;
        for chunk in &chunks {
            assert!(
                chunk.text.len() <= budget + sentence.len(),
                "chunk overruns budget: {} bytes",
                chunk.text.len()
            );
        }
    }

    #[test]
    fn offsets_point_back_into_document() {
        let chunker = DocumentChunker::new(ChunkerConfig {
            chunk_size: 12,
            chunk_overlap: 0,
            chars_per_token: 4,
        });
        let text = "First paragraph here.\n\nSecond paragraph follows it.\n\nThird one ends.";
        for chunk in chunker.chunk_document(text) {
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }

    #[test]
    fn chunk_indices_are_sequential() {
        let chunker = DocumentChunker::new(ChunkerConfig {
            chunk_size: 8,
            chunk_overlap: 0,
            chars_per_token: 4,
        });
        let text = "one two three four five six seven eight nine ten. ".repeat(10);
        let chunks = chunker.chunk_document(&text);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn unicode_never_splits_mid_codepoint() {
        let chunker = DocumentChunker::new(ChunkerConfig {
            chunk_size: 2,
            chunk_overlap: 0,
            chars_per_token: 4,
        });
        let text = "日本語のテキストは分割されるときに壊れてはいけない".repeat(4);
        // Every produced chunk must be valid UTF-8 slices of the original.
        for chunk in chunker.chunk_document(&text) {
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }

    #[test]
    fn sentences_split_on_terminators() {
        let chunker = DocumentChunker::default();
        let sentences = chunker.split_into_sentences(
            "The Eiffel Tower was completed in 1889. It stands 330 meters tall. Impressive? Yes!",
        );
        assert_eq!(sentences.len(), 4);
        assert_eq!(sentences[0], "The Eiffel Tower was completed in 1889.");
        assert_eq!(sentences[1], "It stands 330 meters tall.");
    }

    #[test]
    fn sentences_handle_newlines_and_empties() {
        let chunker = DocumentChunker::default();
        let sentences = chunker.split_into_sentences("Line one\n Line two\n\n");
        assert_eq!(sentences, vec!["Line one", "Line two"]);
        assert!(chunker.split_into_sentences("").is_empty());
    }
}
