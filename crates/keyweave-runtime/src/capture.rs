#![forbid(unsafe_code)]

//! Ambient dependency capture.
//!
//! While a computation evaluates, every keypath read through the store (or
//! through a computation node asked to capture) is recorded into the
//! innermost open [`CaptureScope`]. Scopes nest: a computation evaluated
//! while another is being evaluated collects its own reads, and the outer
//! one only sees the keypath of the nested computation itself.
//!
//! The stack is thread-local; the runtime is single-threaded.

use std::cell::RefCell;

use indexmap::IndexSet;
use keyweave_core::Keypath;

thread_local! {
    static CAPTURE_STACK: RefCell<Vec<IndexSet<Keypath>>> = const { RefCell::new(Vec::new()) };
}

/// Record a read of `keypath` against the innermost open scope, if any.
pub fn record(keypath: &Keypath) {
    CAPTURE_STACK.with(|stack| {
        if let Some(frame) = stack.borrow_mut().last_mut() {
            frame.insert(keypath.clone());
        }
    });
}

/// Whether a capture scope is open on this thread.
#[must_use]
pub fn is_capturing() -> bool {
    CAPTURE_STACK.with(|stack| !stack.borrow().is_empty())
}

/// RAII guard for one capture frame.
///
/// Dropping the guard without calling [`finish`](CaptureScope::finish)
/// discards the frame, so a panicking getter cannot leave a stale frame
/// behind.
#[derive(Debug)]
pub struct CaptureScope {
    depth: usize,
    finished: bool,
}

impl CaptureScope {
    /// Open a new innermost frame.
    #[must_use]
    pub fn start() -> Self {
        let depth = CAPTURE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(IndexSet::new());
            stack.len()
        });
        Self {
            depth,
            finished: false,
        }
    }

    /// Close the frame and return the keypaths read, in first-read order.
    #[must_use]
    pub fn finish(mut self) -> Vec<Keypath> {
        self.finished = true;
        self.pop().map(|set| set.into_iter().collect()).unwrap_or_default()
    }

    fn pop(&self) -> Option<IndexSet<Keypath>> {
        CAPTURE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            // Frames opened inside this one and leaked are discarded with it.
            if stack.len() < self.depth {
                return None;
            }
            stack.truncate(self.depth);
            stack.pop()
        })
    }
}

impl Drop for CaptureScope {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.pop();
        }
    }
}

/// Run `f` inside a fresh scope, returning its result and the captured
/// keypaths.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<Keypath>) {
    let scope = CaptureScope::start();
    let out = f();
    (out, scope.finish())
}
