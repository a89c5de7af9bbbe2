//! Cleanup collector: aggregate effect handles and teardown closures,
//! release them all at once.
//!
//! Components that create several effects and hold other resources
//! register everything with one collector and call [`cleanup`] (or just
//! drop the collector) when they go away. One broken teardown does not
//! block the rest: closure panics are caught per item and logged.
//!
//! [`cleanup`]: CleanupCollector::cleanup

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::effect::Effect;
use crate::error::panic_message;

/// Collects disposers and teardown closures for bulk release.
#[derive(Default)]
pub struct CleanupCollector {
    effects: Vec<Effect>,
    teardowns: Vec<Box<dyn FnOnce() + Send>>,
}

impl CleanupCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an effect handle; it is disposed on cleanup.
    pub fn track(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Register an arbitrary teardown closure, run once on cleanup.
    pub fn defer(&mut self, teardown: impl FnOnce() + Send + 'static) {
        self.teardowns.push(Box::new(teardown));
    }

    /// Number of items still held.
    pub fn len(&self) -> usize {
        self.effects.len() + self.teardowns.len()
    }

    /// True once everything has been released (or nothing was registered).
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.teardowns.is_empty()
    }

    /// Dispose every tracked effect and run every deferred teardown, in
    /// registration order. A panicking teardown is caught and logged; the
    /// remaining items still run. Idempotent: the collector is empty
    /// afterwards and can be reused.
    pub fn cleanup(&mut self) {
        for effect in self.effects.drain(..) {
            effect.dispose();
        }
        for teardown in self.teardowns.drain(..) {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(teardown)) {
                cov_mark::hit!(teardown_panic_isolated);
                tracing::warn!(
                    cause = %panic_message(payload.as_ref()),
                    "teardown panicked during cleanup"
                );
            }
        }
    }
}

impl Drop for CleanupCollector {
    fn drop(&mut self) {
        self.cleanup();
    }
}
