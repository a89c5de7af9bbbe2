//! Effects: re-runnable units of work with auto-tracked dependencies.
//!
//! An effect runs once, eagerly, when created - that first run is how its
//! initial dependencies are discovered; there is no declarative dependency
//! list. Every subsequent run rebuilds the dependency set from scratch, so
//! a key that stops being read stops triggering the effect.
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::new();
//! let state = engine.wrap(Value::from_iter([("name", Value::from("ada"))]))?;
//!
//! let effect = engine.effect({
//!     let state = state.clone();
//!     move || println!("hello {:?}", state.get("name"))
//! });
//!
//! state.set("name", "grace");   // effect reruns synchronously
//! effect.dispose();             // idempotent; further writes are ignored
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::arena::{EffectId, EffectMeta, EffectState};
use crate::engine::{Engine, EngineInner, FrameGuard};
use crate::error::{panic_message, EngineError, ITERATION_LIMIT};

/// Handle to a running effect; the disposer of the reactive system.
///
/// Dropping the handle disposes the effect. [`dispose`](Effect::dispose)
/// is idempotent and immediately effective for future triggers; a trigger
/// already parked in an open batch is skipped lazily at flush time.
pub struct Effect {
    engine: Engine,
    id: EffectId,
}

impl Engine {
    /// Create an effect and run it once, synchronously.
    ///
    /// Reads through any [`Container`](crate::Container) during the run
    /// subscribe the effect to those keys. A panic during this first run
    /// propagates to the caller - setup failed - and the half-built effect
    /// is disposed during unwinding.
    pub fn effect<F>(&self, f: F) -> Effect
    where
        F: FnMut() + Send + 'static,
    {
        let id = {
            let mut arena = self.inner.effects.write();
            EffectId::new(arena.insert(EffectMeta::new(Box::new(f))) as u32)
        };
        tracing::trace!(effect = id.index(), "created effect");

        // First-run failures unwind to the caller; the guard disposes the
        // effect so no subscriptions from the partial run survive.
        let mut guard = FirstRunGuard {
            inner: &self.inner,
            id,
            armed: true,
        };
        self.inner.run_effect(id, false);
        guard.armed = false;

        Effect {
            engine: self.clone(),
            id,
        }
    }
}

struct FirstRunGuard<'a> {
    inner: &'a EngineInner,
    id: EffectId,
    armed: bool,
}

impl Drop for FirstRunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.dispose_effect(self.id);
        }
    }
}

impl Effect {
    /// Permanently unsubscribe this effect. Idempotent.
    pub fn dispose(&self) {
        self.engine.inner.dispose_effect(self.id);
    }

    /// True once the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.engine.inner.effect_state(self.id) == EffectState::Disposed
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.engine.inner.dispose_effect(self.id);
    }
}

impl EngineInner {
    /// Immediate (unbatched) rerun path, entered when a trigger fires with
    /// no open batch. Nested immediate runs share a per-chain run counter;
    /// an effect exceeding the ceiling is throttled and reported rather
    /// than allowed to recurse without bound.
    pub(crate) fn run_immediate(&self, effect: EffectId) {
        self.sync_depth.fetch_add(1, std::sync::atomic::Ordering::AcqRel);

        let runs = {
            let mut counts = self.sync_runs.lock();
            let count = counts.entry(effect).or_insert(0);
            *count += 1;
            *count
        };
        if runs > ITERATION_LIMIT {
            if runs == ITERATION_LIMIT + 1 {
                cov_mark::hit!(immediate_rerun_throttled);
                self.report(&EngineError::ReentrancyOverflow {
                    effect: effect.index(),
                    limit: ITERATION_LIMIT,
                });
            }
        } else {
            self.run_effect(effect, true);
        }

        // Counters live for one top-level trigger chain.
        if self
            .sync_depth
            .fetch_sub(1, std::sync::atomic::Ordering::AcqRel)
            == 1
        {
            self.sync_runs.lock().clear();
        }
    }

    /// Run one effect: retire the previous run's subscriptions, execute
    /// the body under an active frame, and loop while the body keeps
    /// retriggering itself (bounded by the iteration ceiling).
    ///
    /// With `isolate` set (reruns), a panicking body is caught, reported
    /// through the sink as [`EngineError::EffectFailed`], and does not
    /// disturb sibling effects or the dependency graph. Without it (first
    /// run), the panic unwinds to the `effect()` caller.
    pub(crate) fn run_effect(&self, effect: EffectId, isolate: bool) {
        {
            let effects = self.effects.read();
            let Some(meta) = effects.get(effect.index()) else {
                return;
            };
            match meta.state() {
                EffectState::Disposed => return,
                // Self-trigger while mid-run: the callback is currently
                // taken out of the arena, so flag the run to loop instead
                // of recursing into nothing.
                EffectState::Running => {
                    cov_mark::hit!(rerun_requested_while_running);
                    meta.request_rerun();
                    return;
                }
                EffectState::Active => meta.set_state(EffectState::Running),
            }
        }

        let mut iterations = 0usize;
        loop {
            iterations += 1;
            if iterations > ITERATION_LIMIT {
                cov_mark::hit!(inline_rerun_throttled);
                self.report(&EngineError::ReentrancyOverflow {
                    effect: effect.index(),
                    limit: ITERATION_LIMIT,
                });
                break;
            }

            // Retire the previous run's subscriptions; the fresh set is
            // rebuilt by the reads the body performs.
            let stale = {
                let effects = self.effects.read();
                match effects.get(effect.index()) {
                    Some(meta) => meta.take_sources(),
                    None => break,
                }
            };
            {
                let mut arena = self.containers.write();
                for (container, key) in &stale {
                    if let Some(meta) = arena.get_mut(container.index()) {
                        meta.remove_subscriber(key, effect);
                    }
                }
            }

            {
                let _frame = FrameGuard::push(self, Some(effect));
                let mut callback = CallbackGuard::take(self, effect);
                if isolate {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback.run())) {
                        self.report(&EngineError::EffectFailed {
                            effect: effect.index(),
                            message: panic_message(payload.as_ref()),
                        });
                        break;
                    }
                } else {
                    callback.run();
                }
            }

            let again = {
                let effects = self.effects.read();
                effects
                    .get(effect.index())
                    .map(EffectMeta::take_rerun)
                    .unwrap_or(false)
            };
            if !again {
                break;
            }
        }

        // Running -> Active, unless the body disposed its own effect.
        let effects = self.effects.read();
        if let Some(meta) = effects.get(effect.index()) {
            meta.transition(EffectState::Running, EffectState::Active);
        }
    }

    /// Dispose an effect: tombstone the arena slot, drop the body, and
    /// remove every subscription. Queued triggers are skipped lazily at
    /// flush time rather than purged here.
    pub(crate) fn dispose_effect(&self, effect: EffectId) {
        {
            let effects = self.effects.read();
            let Some(meta) = effects.get(effect.index()) else {
                return;
            };
            if meta.state() == EffectState::Disposed {
                cov_mark::hit!(dispose_idempotent);
                return;
            }
            meta.set_state(EffectState::Disposed);
            // Drop the body now so captured resources are released even
            // though the slot itself is retained as a tombstone.
            meta.callback.lock().take();
        }

        let stale = {
            let effects = self.effects.read();
            match effects.get(effect.index()) {
                Some(meta) => meta.take_sources(),
                None => return,
            }
        };
        {
            let mut arena = self.containers.write();
            for (container, key) in &stale {
                if let Some(meta) = arena.get_mut(container.index()) {
                    meta.remove_subscriber(key, effect);
                }
            }
        }

        #[cfg(debug_assertions)]
        self.debug_verify_unsubscribed(effect);

        tracing::trace!(effect = effect.index(), "disposed effect");
    }
}

/// Guard that takes the effect body out of the arena for the duration of
/// a run and restores it on drop, panic included. Taking the callback out
/// releases the arena for the body itself, which may create effects and
/// containers of its own.
struct CallbackGuard<'a> {
    inner: &'a EngineInner,
    effect: EffectId,
    callback: Option<Box<dyn FnMut() + Send>>,
}

impl<'a> CallbackGuard<'a> {
    fn take(inner: &'a EngineInner, effect: EffectId) -> Self {
        let callback = {
            let effects = inner.effects.read();
            effects
                .get(effect.index())
                .and_then(|meta| meta.callback.lock().take())
        };
        Self {
            inner,
            effect,
            callback,
        }
    }

    fn run(&mut self) {
        if let Some(cb) = &mut self.callback {
            cb();
        }
    }
}

impl Drop for CallbackGuard<'_> {
    fn drop(&mut self) {
        let Some(cb) = self.callback.take() else {
            return;
        };
        let effects = self.inner.effects.read();
        if let Some(meta) = effects.get(self.effect.index()) {
            // An effect disposed from within its own body keeps the slot
            // tombstoned; the callback is dropped instead of restored.
            if meta.state() != EffectState::Disposed {
                *meta.callback.lock() = Some(cb);
            }
        }
    }
}
