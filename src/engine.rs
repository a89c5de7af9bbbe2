//! The reactive engine: dependency graph, scheduler state, and batch
//! context, packaged as one explicit value.
//!
//! An [`Engine`] owns everything that would otherwise be hidden global
//! state: the container and effect arenas, the active-effect stack, the
//! batch depth, the pending queue, and the error sink. Applications hold
//! one engine; tests hold one engine each, so suites stay hermetic.
//!
//! # How updates propagate
//!
//! 1. Reads through a [`Container`](crate::Container) call [`track`],
//!    which subscribes the innermost active effect to the `(container,
//!    key)` dependency node.
//! 2. Writes call [`trigger`], which snapshots the node's subscriber set
//!    and hands each non-disposed effect to the scheduler.
//! 3. The scheduler reruns effects immediately when no batch is open, or
//!    parks them in the pending queue until the outermost batch exits.
//!
//! Locks guard only short metadata sections and are never held across
//! user callbacks; re-entrancy safety comes from subscriber snapshotting
//! and the [`ITERATION_LIMIT`] ceilings, not from locking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use slab::Slab;

use crate::arena::{ContainerId, ContainerMeta, DepKey, EffectId, EffectMeta, EffectState};
use crate::container::Container;
use crate::error::EngineError;
use crate::hash::FastHashBuilder;
use crate::value::Value;

/// Sink for errors that have no synchronous caller (rerun failures,
/// ceiling overflows, flush divergence).
pub(crate) type ErrorSink = Box<dyn Fn(&EngineError) + Send + Sync>;

/// A self-contained reactive engine.
///
/// Cheap to clone (a shared handle); all clones address the same arenas
/// and batch context. Create one per application, or one per test.
///
/// # Example
///
/// ```ignore
/// let engine = Engine::new();
/// let state = engine.wrap(Value::from_iter([("count", Value::Int(0))]))?;
///
/// let effect = engine.effect({
///     let state = state.clone();
///     move || println!("count = {:?}", state.get("count"))
/// });
///
/// engine.batch(|| {
///     state.set("count", 1);
///     state.set("count", 2);
/// });
/// // Effect ran once more, observing the settled value 2.
/// ```
#[derive(Clone, Default)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    /// Container arena: data slots, dependency nodes, version markers.
    pub(crate) containers: RwLock<Slab<ContainerMeta>>,
    /// Effect arena: callbacks, states, source sets. Slots are tombstoned
    /// on disposal, never reused.
    pub(crate) effects: RwLock<Slab<EffectMeta>>,
    /// Active-effect stack. The innermost `Some` frame receives tracked
    /// reads; a `None` frame opens an untracked window.
    pub(crate) active: Mutex<Vec<Option<EffectId>>>,
    /// Open transaction depth. Flush happens on the 1 -> 0 transition.
    pub(crate) batch_depth: AtomicUsize,
    /// True while a flush is draining; triggers raised by running effects
    /// go back into the pending queue instead of running inline.
    pub(crate) flushing: AtomicBool,
    /// Pending effects, insertion-ordered and deduplicated.
    pub(crate) pending: Mutex<IndexSet<EffectId, FastHashBuilder>>,
    /// Depth of nested immediate (unbatched) runs.
    pub(crate) sync_depth: AtomicUsize,
    /// Per-effect run counts for the current immediate trigger chain;
    /// cleared when the chain unwinds to depth zero.
    pub(crate) sync_runs: Mutex<HashMap<EffectId, usize, FastHashBuilder>>,
    /// Configured error sink; `None` falls back to `tracing::error!`.
    pub(crate) sink: RwLock<Option<ErrorSink>>,
}

impl Default for EngineInner {
    fn default() -> Self {
        Self {
            containers: RwLock::new(Slab::new()),
            effects: RwLock::new(Slab::new()),
            active: Mutex::new(Vec::new()),
            batch_depth: AtomicUsize::new(0),
            flushing: AtomicBool::new(false),
            pending: Mutex::new(IndexSet::default()),
            sync_depth: AtomicUsize::new(0),
            sync_runs: Mutex::new(HashMap::with_hasher(FastHashBuilder)),
            sink: RwLock::new(None),
        }
    }
}

impl Engine {
    /// Create a fresh engine with empty arenas and no open batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a composite value into a reactive container.
    ///
    /// Nested composites inside `value` stay raw until first read (lazy
    /// wrapping), so memory stays proportional to the traversed portion of
    /// the graph. Primitives cannot be wrapped and are rejected with
    /// [`EngineError::InvalidTarget`].
    pub fn wrap(&self, value: Value) -> Result<Container, EngineError> {
        if !value.is_composite() {
            return Err(EngineError::InvalidTarget { kind: value.kind() });
        }
        let id = {
            let mut arena = self.inner.containers.write();
            ContainerId::new(arena.insert(ContainerMeta::from_value(value)) as u32)
        };
        tracing::trace!(container = id.index(), "wrapped root container");
        Ok(Container::from_raw(self.clone(), id))
    }

    /// Run a closure without tracking dependencies.
    ///
    /// Reads inside the closure establish no subscriptions, even when an
    /// effect is currently executing. Useful for one-shot reads and for
    /// breaking read-write cycles.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = FrameGuard::push(&self.inner, None);
        f()
    }

    /// Install the error sink that receives rerun failures and ceiling
    /// overflows. Replaces any previously installed sink.
    pub fn set_error_handler(&self, handler: impl Fn(&EngineError) + Send + Sync + 'static) {
        *self.inner.sink.write() = Some(Box::new(handler));
    }

    /// Number of effects currently parked in the pending queue.
    pub fn pending_effects(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl EngineInner {
    /// The innermost active effect, if reads are currently tracked.
    pub(crate) fn current_effect(&self) -> Option<EffectId> {
        self.active.lock().last().copied().flatten()
    }

    /// Register the active effect (if any) as a subscriber of
    /// `(container, key)` and record the node in the effect's source set.
    pub(crate) fn track(&self, container: ContainerId, key: DepKey) {
        let Some(effect) = self.current_effect() else {
            return;
        };
        // An effect that disposed itself mid-run may keep reading; those
        // reads must not resubscribe it after disposal emptied its nodes.
        if self.effect_state(effect) == EffectState::Disposed {
            cov_mark::hit!(track_after_dispose_ignored);
            return;
        }
        {
            let mut arena = self.containers.write();
            let Some(meta) = arena.get_mut(container.index()) else {
                return;
            };
            meta.add_subscriber(key.clone(), effect);
        }
        let effects = self.effects.read();
        if let Some(meta) = effects.get(effect.index()) {
            meta.add_source(container, key.clone());
        }
        tracing::trace!(
            container = container.index(),
            effect = effect.index(),
            ?key,
            "tracked dependency"
        );
    }

    /// Notify the subscribers of `(container, key)` that its value
    /// changed. The subscriber set is snapshotted before iteration;
    /// subscribers mutate during re-entrant tracking, so iterating the
    /// live set is not an option.
    pub(crate) fn trigger(&self, container: ContainerId, key: &DepKey) {
        let subscribers = {
            let arena = self.containers.read();
            match arena.get(container.index()) {
                Some(meta) => meta.subscribers(key),
                None => return,
            }
        };
        if subscribers.is_empty() {
            return;
        }
        tracing::trace!(
            container = container.index(),
            ?key,
            count = subscribers.len(),
            "triggering subscribers"
        );
        for effect in subscribers {
            self.schedule(effect);
        }
    }

    /// Hand a triggered effect to the scheduler: disposed effects are
    /// ignored; with an open batch (or mid-flush) the effect is parked in
    /// the pending queue; otherwise it reruns immediately.
    pub(crate) fn schedule(&self, effect: EffectId) {
        if self.effect_state(effect) == EffectState::Disposed {
            return;
        }
        if self.batch_depth.load(Ordering::Acquire) > 0 || self.flushing.load(Ordering::Acquire) {
            self.pending.lock().insert(effect);
        } else {
            self.run_immediate(effect);
        }
    }

    /// Current lifecycle state; tombstoned or missing slots read as
    /// Disposed.
    pub(crate) fn effect_state(&self, effect: EffectId) -> EffectState {
        self.effects
            .read()
            .get(effect.index())
            .map(EffectMeta::state)
            .unwrap_or(EffectState::Disposed)
    }

    /// Free a container subtree after structural removal: drop each
    /// arena entry, then detach the reverse source entries so a recycled
    /// slab index can never receive a stale trigger.
    pub(crate) fn free_subtree(&self, root: ContainerId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let meta = {
                let mut arena = self.containers.write();
                if arena.contains(id.index()) {
                    Some(arena.remove(id.index()))
                } else {
                    None
                }
            };
            let Some(meta) = meta else {
                continue;
            };
            stack.extend(meta.data.child_ids());

            let effects = self.effects.read();
            for (key, subscribers) in &meta.deps {
                for effect in subscribers {
                    if let Some(em) = effects.get(effect.index()) {
                        em.remove_source(id, key);
                    }
                }
            }
        }
    }

    /// Deep, untracked copy of a container's current data.
    pub(crate) fn snapshot(&self, id: ContainerId) -> Value {
        let arena = self.containers.read();
        snapshot_inner(&arena, id)
    }

    /// Deliver an error to the configured sink, or log it. Errors are
    /// reported, never silently dropped.
    pub(crate) fn report(&self, err: &EngineError) {
        let sink = self.sink.read();
        match &*sink {
            Some(handler) => handler(err),
            None => tracing::error!(error = %err, "reactive engine error"),
        }
    }

    /// Debug-build assertion: after disposal or a source refresh, no
    /// dependency node may still list the effect. A violation is the
    /// `StaleSubscription` invariant breach and is reported, then
    /// repaired.
    #[cfg(debug_assertions)]
    pub(crate) fn debug_verify_unsubscribed(&self, effect: EffectId) {
        let mut stale = false;
        {
            let mut arena = self.containers.write();
            for (_, meta) in arena.iter_mut() {
                meta.deps.retain(|_, subs| {
                    if subs.swap_remove(&effect) {
                        stale = true;
                    }
                    !subs.is_empty()
                });
            }
        }
        if stale {
            self.report(&EngineError::StaleSubscription {
                effect: effect.index(),
            });
        }
    }
}

fn snapshot_inner(arena: &Slab<ContainerMeta>, id: ContainerId) -> Value {
    use crate::arena::{ContainerData, Slot};

    let slot_value = |slot: &Slot| match slot {
        Slot::Leaf(v) | Slot::Raw(v) => v.clone(),
        Slot::Child(child) => snapshot_inner(arena, *child),
    };
    match arena.get(id.index()) {
        None => Value::Null,
        Some(meta) => match &meta.data {
            ContainerData::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, slot)| (k.clone(), slot_value(slot)))
                    .collect(),
            ),
            ContainerData::List(list) => Value::List(list.iter().map(slot_value).collect()),
        },
    }
}

/// RAII frame on the active-effect stack. Pushed before running an effect
/// body (`Some`) or opening an untracked window (`None`); the drop pops
/// the frame even when the body panics.
pub(crate) struct FrameGuard<'a> {
    inner: &'a EngineInner,
}

impl<'a> FrameGuard<'a> {
    pub(crate) fn push(inner: &'a EngineInner, frame: Option<EffectId>) -> Self {
        inner.active.lock().push(frame);
        Self { inner }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.inner.active.lock().pop();
    }
}
