//! Incremental UTF-8 boundary reassembly.
//!
//! LLM tokenizers emit byte sequences that can split a codepoint across two
//! tokens. The assembler validates incrementally: the longest valid prefix is
//! released, an incomplete trailing sequence is carried into the next push,
//! and byte sequences that can never become valid are discarded.

/// Streaming UTF-8 validator. Holds at most one partial codepoint (3 bytes).
#[derive(Default)]
pub struct Utf8Assembler {
    pending: Vec<u8>,
}

impl Utf8Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns the newly completed valid text (possibly empty).
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid_len = err.valid_up_to();
                    // Safe: validated by from_utf8 up to valid_len.
                    out.push_str(std::str::from_utf8(&self.pending[..valid_len]).unwrap());
                    match err.error_len() {
                        Some(bad_len) => {
                            // A sequence that can never become valid: skip it
                            // and keep scanning the remainder.
                            self.pending.drain(..valid_len + bad_len);
                        }
                        None => {
                            // Incomplete trailing sequence: hold it for the
                            // next push.
                            self.pending.drain(..valid_len);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Bytes currently held back waiting for a continuation.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// End of stream: drop any invalid trailing bytes.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        let mut asm = Utf8Assembler::new();
        assert_eq!(asm.push(b"hello"), "hello");
        assert_eq!(asm.pending_len(), 0);
    }

    #[test]
    fn codepoint_split_across_pushes() {
        let mut asm = Utf8Assembler::new();
        // "日" is E6 97 A5
        assert_eq!(asm.push(&[0xE6, 0x97]), "");
        assert_eq!(asm.pending_len(), 2);
        assert_eq!(asm.push(&[0xA5]), "日");
        assert_eq!(asm.pending_len(), 0);
    }

    #[test]
    fn emoji_split_three_ways() {
        // "🦀" is F0 9F A6 80
        let mut asm = Utf8Assembler::new();
        assert_eq!(asm.push(&[0xF0]), "");
        assert_eq!(asm.push(&[0x9F, 0xA6]), "");
        assert_eq!(asm.push(&[0x80, b'x']), "🦀x");
    }

    #[test]
    fn invalid_sequence_is_skipped() {
        let mut asm = Utf8Assembler::new();
        // 0xFF can never start a valid sequence.
        assert_eq!(asm.push(&[b'a', 0xFF, b'b']), "ab");
        assert_eq!(asm.pending_len(), 0);
    }

    #[test]
    fn concatenation_equals_valid_prefix_of_underlying_stream() {
        let text = "mixé 日本語 🦀 end";
        let bytes = text.as_bytes();
        // Feed one byte at a time, the worst-case splitting.
        let mut asm = Utf8Assembler::new();
        let mut collected = String::new();
        for b in bytes {
            collected.push_str(&asm.push(std::slice::from_ref(b)));
        }
        assert_eq!(collected, text);
    }

    #[test]
    fn reset_drops_incomplete_tail() {
        let mut asm = Utf8Assembler::new();
        assert_eq!(asm.push(&[0xE6]), "");
        asm.reset();
        assert_eq!(asm.pending_len(), 0);
        assert_eq!(asm.push(b"ok"), "ok");
    }
}
