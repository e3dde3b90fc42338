//! Cooperative streaming engine.
//!
//! Streaming is callback-based, not async: the same contract works across
//! every embedding language. A backend pushes raw token bytes into a
//! [`TokenStream`]; the stream reassembles UTF-8 across token boundaries,
//! checks cancellation between tokens, and forwards completed text to the
//! caller's `on_token` callback. The callback's boolean return and a
//! concurrent [`CancelToken::cancel`] both request cooperative cancellation,
//! which the backend observes at its next suspension point.

pub mod utf8;

pub use utf8::Utf8Assembler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag. Safe to set from any thread; idempotent.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Per-call token conduit handed to streaming backends.
///
/// Tokens are delivered in strict issue order. `push_*` returns `false` when
/// the backend should stop producing: either the consumer returned `false`
/// from `on_token` or the cancel token fired.
pub struct TokenStream<'a> {
    cancel: CancelToken,
    assembler: Utf8Assembler,
    on_token: Box<dyn FnMut(&str) -> bool + Send + 'a>,
    delivered: u32,
    stopped: bool,
}

impl<'a> TokenStream<'a> {
    pub fn new(cancel: CancelToken, on_token: Box<dyn FnMut(&str) -> bool + Send + 'a>) -> Self {
        Self {
            cancel,
            assembler: Utf8Assembler::new(),
            on_token,
            delivered: 0,
            stopped: false,
        }
    }

    /// Push raw tokenizer bytes. Bytes that end mid-codepoint are held back
    /// and prepended to the next push.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> bool {
        if self.stopped || self.cancel.is_cancelled() {
            self.stopped = true;
            return false;
        }
        let completed = self.assembler.push(bytes);
        if completed.is_empty() {
            // Nothing deliverable yet; keep producing.
            return true;
        }
        self.delivered += 1;
        let keep_going = (self.on_token)(&completed);
        if !keep_going {
            self.cancel.cancel();
            self.stopped = true;
        }
        keep_going
    }

    /// Push an already-valid UTF-8 token.
    pub fn push_str(&mut self, token: &str) -> bool {
        self.push_bytes(token.as_bytes())
    }

    /// Number of `on_token` invocations so far.
    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// End of stream: any buffered incomplete bytes are dropped.
    pub fn finish(&mut self) {
        self.assembler.reset();
        self.stopped = true;
    }
}
