//! Batching: defer effect runs until a group of related mutations settles.
//!
//! [`Engine::batch`] opens a transaction: while one is open, triggered
//! effects are parked in the pending queue instead of running inline.
//! Batches nest by sharing one depth counter; only the outermost exit
//! flushes, so an effect reading several mutated keys observes the fully
//! settled state exactly once.
//!
//! Grouping is an explicit caller contract: the engine never infers that
//! two mutations are related. Bulk helpers built on top of the engine
//! wrap their mutation sequence in `batch` themselves.
//!
//! # Example
//!
//! ```ignore
//! engine.batch(|| {
//!     state.set("count", 1);
//!     state.set("title", "B");
//!     engine.batch(|| state.set("flag", true)); // inner exit: no flush
//! });
//! // outer exit: one flush, each affected effect runs once
//! ```

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use crate::arena::{EffectId, EffectState};
use crate::engine::{Engine, EngineInner};
use crate::error::{EngineError, ITERATION_LIMIT};
use crate::hash::FastHashBuilder;

impl Engine {
    /// Run `f` inside a transaction, returning its result.
    ///
    /// The depth decrement and the outermost flush happen in a guard that
    /// runs on all exit paths: if `f` panics, bookkeeping still completes,
    /// already-applied mutations are flushed to their subscribers, and the
    /// panic then continues unwinding to the caller. (A flush never panics
    /// itself - rerun failures are caught per effect.)
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.batch_depth.fetch_add(1, Ordering::AcqRel);
        let _guard = BatchGuard { inner: &self.inner };
        f()
    }
}

/// RAII guard for one open batch level. Dropping decrements the shared
/// depth; the 1 -> 0 transition flushes, on normal exit and unwind alike.
struct BatchGuard<'a> {
    inner: &'a EngineInner,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.inner.batch_depth.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.flush();
        }
    }
}

impl EngineInner {
    /// Drain the pending queue until it stays empty.
    ///
    /// Each pass takes a snapshot of the queue (first-enqueued order,
    /// deduplicated) and runs every non-disposed effect in it once.
    /// Effects enqueued by those runs - cascading reactions - are picked
    /// up by the next pass of the same flush, synchronously.
    ///
    /// Two ceilings keep this terminating: an effect rerun more than
    /// [`ITERATION_LIMIT`] times is throttled with `ReentrancyOverflow`,
    /// and a queue still non-empty after [`ITERATION_LIMIT`] passes is
    /// abandoned with `FlushDivergence`. Both are reported, never thrown:
    /// there is no synchronous caller at flush time.
    pub(crate) fn flush(&self) {
        // A batch opened and closed inside a running flush must not start
        // a nested flush; the outer drain loop picks its effects up.
        if self.flushing.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut runs: HashMap<EffectId, usize, FastHashBuilder> =
            HashMap::with_hasher(FastHashBuilder);
        let mut passes = 0usize;
        let mut executed = 0usize;

        loop {
            let wave: Vec<EffectId> = {
                let mut pending = self.pending.lock();
                pending.drain(..).collect()
            };
            if wave.is_empty() {
                break;
            }
            passes += 1;

            for effect in wave {
                if self.effect_state(effect) == EffectState::Disposed {
                    cov_mark::hit!(disposed_skipped_at_flush);
                    continue;
                }
                let count = runs.entry(effect).or_insert(0);
                *count += 1;
                if *count > ITERATION_LIMIT {
                    if *count == ITERATION_LIMIT + 1 {
                        cov_mark::hit!(flush_rerun_throttled);
                        self.report(&EngineError::ReentrancyOverflow {
                            effect: effect.index(),
                            limit: ITERATION_LIMIT,
                        });
                    }
                    continue;
                }
                self.run_effect(effect, true);
                executed += 1;
            }

            if passes > ITERATION_LIMIT {
                let mut pending = self.pending.lock();
                if !pending.is_empty() {
                    cov_mark::hit!(flush_divergence_bailed);
                    pending.clear();
                    drop(pending);
                    self.report(&EngineError::FlushDivergence { passes });
                }
                break;
            }
        }

        self.flushing.store(false, Ordering::Release);
        tracing::debug!(passes, effects = executed, "flush complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn batch_returns_the_body_value() {
        let engine = Engine::new();
        assert_eq!(engine.batch(|| 42), 42);
        assert_eq!(engine.batch(|| "hello"), "hello");
    }

    #[test]
    fn depth_recovers_after_a_panicking_body() {
        let engine = Engine::new();
        let state = engine.wrap(Value::map()).unwrap();
        state.set("x", 0);

        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let state_clone = state.clone();
        let _effect = engine.effect(move || {
            let _ = state_clone.get("x");
            runs_clone.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(runs.load(Ordering::Relaxed), 1);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            engine.batch(|| {
                state.set("x", 1);
                panic!("halfway");
            })
        }));
        assert!(result.is_err());

        // Depth bookkeeping completed and the applied mutation flushed.
        assert_eq!(engine.inner.batch_depth.load(Ordering::Acquire), 0);
        assert_eq!(runs.load(Ordering::Relaxed), 2);

        // The engine is still fully operational.
        state.set("x", 2);
        assert_eq!(runs.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn inner_batch_exit_does_not_flush() {
        let engine = Engine::new();
        let state = engine.wrap(Value::map()).unwrap();
        state.set("x", 0);

        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let state_clone = state.clone();
        let _effect = engine.effect(move || {
            let _ = state_clone.get("x");
            runs_clone.fetch_add(1, Ordering::Relaxed);
        });

        engine.batch(|| {
            state.set("x", 1);
            engine.batch(|| {
                state.set("x", 2);
            });
            // Inner batch exited; nothing has flushed yet.
            assert_eq!(runs.load(Ordering::Relaxed), 1);
        });
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn cascade_deeper_than_the_pass_ceiling_is_reported_not_hung() {
        cov_mark::check!(flush_divergence_bailed);

        let engine = Engine::new();
        let state = engine.wrap(Value::map()).unwrap();

        let reported = Arc::new(AtomicUsize::new(0));
        let reported_clone = reported.clone();
        engine.set_error_handler(move |err| {
            if matches!(err, EngineError::FlushDivergence { .. }) {
                reported_clone.fetch_add(1, Ordering::Relaxed);
            }
        });

        // A linear chain longer than the pass ceiling: effect i reads
        // k{i} and writes k{i+1}, so each flush pass advances one link.
        // Every effect stays far under its own rerun ceiling; the pass
        // ceiling is what fires.
        let mut chain = Vec::new();
        for i in 0..ITERATION_LIMIT + 5 {
            let s = state.clone();
            let from = format!("k{i}");
            let to = format!("k{}", i + 1);
            chain.push(engine.effect(move || {
                let n = s.get(from.as_str()).and_then(|e| e.as_i64()).unwrap_or(0);
                s.set(to.as_str(), n + 1);
            }));
        }

        engine.batch(|| {
            state.set("k0", 1);
        });

        // Terminated with a report instead of hanging, queue cleared.
        assert_eq!(reported.load(Ordering::Relaxed), 1);
        assert_eq!(engine.pending_effects(), 0);
    }
}
