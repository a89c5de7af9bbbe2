// Effect arena - storage for effect metadata
//
// EffectMeta contains:
// - state: Active / Running / Disposed, stored as an AtomicU8
// - callback: the effect body, stored directly in the arena so the public
//   Effect type is a thin id wrapper
// - sources: the (container, key) pairs read during the most recent run
//
// Disposal tombstones the slot: the state flips to Disposed and the
// callback and sources are dropped, but the slab entry itself is never
// removed. A queued EffectId therefore can never alias a newly created
// effect, which is what makes skip-on-dequeue disposal sound.

use indexmap::IndexSet;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::hash::FastHashBuilder;

use super::{ContainerId, DepKey};

/// Effect lifecycle states - u8 for AtomicU8 compatibility.
///
/// `Active -> Running -> Active` on every run; `Disposed` is terminal.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EffectState {
    /// Idle, subscribed to its sources.
    Active = 0,
    /// Body currently executing.
    Running = 1,
    /// Terminal: never runs again.
    Disposed = 2,
}

impl EffectState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => EffectState::Active,
            1 => EffectState::Running,
            _ => EffectState::Disposed,
        }
    }
}

/// Unique identifier for an effect in the arena.
///
/// A zero-cost wrapper around a slab index. Slots are tombstoned rather
/// than removed on disposal, so an EffectId stays valid (and reports
/// `Disposed`) for the lifetime of the engine.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) struct EffectId(u32);

impl EffectId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Metadata for one effect, stored in the arena.
pub(crate) struct EffectMeta {
    /// Lifecycle state. Atomic so that state checks never need the
    /// surrounding arena lock in write mode.
    state: AtomicU8,

    /// The effect body. Taken out of the arena for the duration of a run
    /// (see `CallbackGuard`) so the body can itself create effects and
    /// containers without re-entering this slot.
    pub(crate) callback: Mutex<Option<Box<dyn FnMut() + Send>>>,

    /// Dependency list of the most recent run: exactly the (container,
    /// key) pairs read during that run, recomputed from scratch each run.
    pub(crate) sources: Mutex<IndexSet<(ContainerId, DepKey), FastHashBuilder>>,

    /// Set when the effect triggers itself while Running; the in-progress
    /// run loops once more instead of recursing into its own (currently
    /// taken) callback.
    rerun: AtomicBool,
}

impl EffectMeta {
    pub(crate) fn new(callback: Box<dyn FnMut() + Send>) -> Self {
        Self {
            state: AtomicU8::new(EffectState::Active as u8),
            callback: Mutex::new(Some(callback)),
            sources: Mutex::new(IndexSet::default()),
            rerun: AtomicBool::new(false),
        }
    }

    /// Flag that the current run must loop once more (self-trigger while
    /// Running).
    pub(crate) fn request_rerun(&self) {
        self.rerun.store(true, Ordering::Release);
    }

    /// Consume the rerun request, if any.
    pub(crate) fn take_rerun(&self) -> bool {
        self.rerun.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn state(&self) -> EffectState {
        EffectState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: EffectState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Transition `from -> to`; returns false if the current state is not
    /// `from`. Used so a run never resurrects an effect disposed from
    /// within its own body.
    pub(crate) fn transition(&self, from: EffectState, to: EffectState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn add_source(&self, container: ContainerId, key: DepKey) {
        self.sources.lock().insert((container, key));
    }

    pub(crate) fn remove_source(&self, container: ContainerId, key: &DepKey) {
        self.sources.lock().swap_remove(&(container, key.clone()));
    }

    /// Drain the dependency list, returning the pairs from the previous
    /// run. Called before every rerun and on disposal so the old
    /// subscriptions can be removed from their nodes.
    pub(crate) fn take_sources(&self) -> Vec<(ContainerId, DepKey)> {
        self.sources.lock().drain(..).collect()
    }
}
