//! Reactive containers: the interception layer over plain data.
//!
//! A [`Container`] is a handle to a wrapped list or map. Reads go through
//! `get`/`contains`/`len`/`keys` and are tracked: when an effect is
//! running, each read subscribes it to the key it touched. Writes go
//! through `set`/`remove`/`push`/`pop`/`insert_at`/`remove_at` and trigger
//! exactly the subscribers whose keys changed.
//!
//! Two properties the rest of the system leans on:
//!
//! - **Identity-stable nesting.** A composite member is wrapped at most
//!   once, on first read; every later read returns a handle to the same
//!   underlying container, so handle equality means "same data".
//! - **Version marker.** Structural mutations (key add/delete, list
//!   push/pop/insert/remove) bump a per-container counter that
//!   `len`/`keys`/`version` subscribe to, so shape-dependent effects do
//!   not need a subscription per index.

use std::mem;

use crate::arena::{ContainerData, ContainerId, ContainerMeta, DepKey, Key, Slot};
use crate::engine::Engine;
use crate::value::{Entry, Value};

/// The shape of a container's data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    /// String-keyed map.
    Map,
    /// Positionally indexed list.
    List,
}

/// Handle to a reactive container.
///
/// Cloning the handle does not clone the data; all clones address the same
/// arena entry. Equality compares identity, not contents.
#[derive(Clone)]
pub struct Container {
    engine: Engine,
    id: ContainerId,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Container").field(&self.id.index()).finish()
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && std::sync::Arc::ptr_eq(&self.engine.inner, &other.engine.inner)
    }
}

impl Eq for Container {}

/// Result of classifying a read under the arena lock, before tracking.
enum Probe {
    Miss,
    Primitive(Value),
    Wrapped(ContainerId),
    NeedsWrap(Value),
}

/// What a write did, decided under the arena lock and acted on after it.
enum WriteOutcome {
    Unchanged,
    Changed {
        /// Shape changed: bump + trigger the version marker.
        structural: bool,
        /// Replaced child subtree to free.
        freed: Option<ContainerId>,
        /// Additional member keys whose observable value changed
        /// (padded or shifted list indices).
        extra: Vec<Key>,
    },
}

impl WriteOutcome {
    fn changed(structural: bool, freed: Option<ContainerId>) -> Self {
        WriteOutcome::Changed {
            structural,
            freed,
            extra: Vec::new(),
        }
    }
}

impl Container {
    pub(crate) fn from_raw(engine: Engine, id: ContainerId) -> Self {
        Self { engine, id }
    }

    /// The engine this container belongs to.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Map or list.
    pub fn kind(&self) -> ContainerKind {
        let arena = self.engine.inner.containers.read();
        match arena.get(self.id.index()).map(|meta| &meta.data) {
            Some(ContainerData::List(_)) => ContainerKind::List,
            _ => ContainerKind::Map,
        }
    }

    /// Tracked read of one member.
    ///
    /// Subscribes the active effect to the key even when the member is
    /// absent, so a later insertion of that key retriggers the effect.
    /// Composite members are wrapped lazily and memoized: the first read
    /// converts the stored raw value into a child container, and every
    /// read after that returns the same child.
    pub fn get(&self, key: impl Into<Key>) -> Option<Entry> {
        let key = key.into();
        let inner = &self.engine.inner;

        let entry = {
            let mut arena = inner.containers.write();
            let probe = match arena.get_mut(self.id.index()) {
                None => Probe::Miss,
                Some(meta) => match meta.data.slot_mut(&key) {
                    None => Probe::Miss,
                    Some(Slot::Leaf(v)) => Probe::Primitive(v.clone()),
                    Some(Slot::Child(child)) => Probe::Wrapped(*child),
                    Some(slot @ Slot::Raw(_)) => {
                        let Slot::Raw(v) = mem::replace(slot, Slot::Leaf(Value::Null)) else {
                            unreachable!()
                        };
                        Probe::NeedsWrap(v)
                    }
                },
            };
            match probe {
                Probe::Miss => None,
                Probe::Primitive(v) => Some(Entry::Value(v)),
                Probe::Wrapped(child) => Some(Entry::Container(Container::from_raw(
                    self.engine.clone(),
                    child,
                ))),
                Probe::NeedsWrap(v) => {
                    cov_mark::hit!(lazy_child_wrapped);
                    let child = ContainerId::new(arena.insert(ContainerMeta::from_value(v)) as u32);
                    if let Some(meta) = arena.get_mut(self.id.index()) {
                        if let Some(slot) = meta.data.slot_mut(&key) {
                            *slot = Slot::Child(child);
                        }
                    }
                    Some(Entry::Container(Container::from_raw(
                        self.engine.clone(),
                        child,
                    )))
                }
            }
        };

        inner.track(self.id, DepKey::Member(key));
        entry
    }

    /// Write one member.
    ///
    /// Identity-equal primitive rewrites are a no-op: nothing triggers.
    /// Inserting a new map key, or writing a list index at or past the
    /// end, is structural and additionally bumps the version marker.
    /// Writing past the end pads the gap with nulls.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let inner = &self.engine.inner;

        let outcome = {
            let mut arena = inner.containers.write();
            let Some(meta) = arena.get_mut(self.id.index()) else {
                return;
            };
            let outcome = match (&mut meta.data, &key) {
                (ContainerData::Map(map), Key::Field(name)) => match map.get_mut(name) {
                    Some(slot) => write_slot(slot, value),
                    None => {
                        map.insert(name.clone(), Slot::from_value(value));
                        WriteOutcome::changed(true, None)
                    }
                },
                (ContainerData::List(list), Key::Index(i)) => {
                    if *i < list.len() {
                        write_slot(&mut list[*i], value)
                    } else {
                        // Extend: pad the gap, then append.
                        let padded = (list.len()..*i).map(Key::Index).collect::<Vec<_>>();
                        while list.len() < *i {
                            list.push(Slot::Leaf(Value::Null));
                        }
                        list.push(Slot::from_value(value));
                        WriteOutcome::Changed {
                            structural: true,
                            freed: None,
                            extra: padded,
                        }
                    }
                }
                _ => {
                    tracing::warn!(?key, "key kind does not match container kind; write ignored");
                    WriteOutcome::Unchanged
                }
            };
            if let WriteOutcome::Changed {
                structural: true, ..
            } = outcome
            {
                meta.bump_version();
            }
            outcome
        };

        self.apply_write(key, outcome);
    }

    /// Tracked membership test. Subscribes to the key, so both insertion
    /// and deletion of the member are observable.
    pub fn contains(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        let inner = &self.engine.inner;
        let present = {
            let arena = inner.containers.read();
            arena
                .get(self.id.index())
                .is_some_and(|meta| meta.data.slot(&key).is_some())
        };
        inner.track(self.id, DepKey::Member(key));
        present
    }

    /// Remove a member, returning a detached snapshot of its value.
    ///
    /// Structural: triggers the key's node (field removal is observable)
    /// and the version marker. A removed child subtree is freed.
    pub fn remove(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        match key {
            Key::Index(i) => self.remove_at(i),
            Key::Field(name) => {
                let inner = &self.engine.inner;
                let slot = {
                    let mut arena = inner.containers.write();
                    let meta = arena.get_mut(self.id.index())?;
                    let ContainerData::Map(map) = &mut meta.data else {
                        return None;
                    };
                    let slot = map.shift_remove(&name)?;
                    meta.bump_version();
                    slot
                };
                let value = self.detach(slot);
                inner.trigger(self.id, &DepKey::Member(Key::Field(name)));
                inner.trigger(self.id, &DepKey::Version);
                Some(value)
            }
        }
    }

    /// Append to a list. Structural.
    pub fn push(&self, value: impl Into<Value>) {
        let len = {
            let arena = self.engine.inner.containers.read();
            match arena.get(self.id.index()).map(|meta| &meta.data) {
                Some(ContainerData::List(list)) => list.len(),
                _ => {
                    tracing::warn!("push on a non-list container ignored");
                    return;
                }
            }
        };
        self.set(len, value);
    }

    /// Remove and return the last list element. Structural.
    pub fn pop(&self) -> Option<Value> {
        let inner = &self.engine.inner;
        let (slot, index) = {
            let mut arena = inner.containers.write();
            let meta = arena.get_mut(self.id.index())?;
            let ContainerData::List(list) = &mut meta.data else {
                return None;
            };
            let slot = list.pop()?;
            let index = list.len();
            meta.bump_version();
            (slot, index)
        };
        let value = self.detach(slot);
        inner.trigger(self.id, &DepKey::Member(Key::Index(index)));
        inner.trigger(self.id, &DepKey::Version);
        Some(value)
    }

    /// Insert into a list at `index` (clamped to the end), shifting later
    /// elements. Structural; every shifted index triggers.
    pub fn insert_at(&self, index: usize, value: impl Into<Value>) {
        let inner = &self.engine.inner;
        let value = value.into();
        let shifted = {
            let mut arena = inner.containers.write();
            let Some(meta) = arena.get_mut(self.id.index()) else {
                return;
            };
            let ContainerData::List(list) = &mut meta.data else {
                tracing::warn!("insert_at on a non-list container ignored");
                return;
            };
            let at = index.min(list.len());
            list.insert(at, Slot::from_value(value));
            let shifted = (at..list.len()).map(Key::Index).collect::<Vec<_>>();
            meta.bump_version();
            shifted
        };
        for key in shifted {
            inner.trigger(self.id, &DepKey::Member(key));
        }
        inner.trigger(self.id, &DepKey::Version);
    }

    /// Remove a list element by position, shifting later elements down.
    /// Structural; every shifted index (including the vacated tail
    /// position) triggers.
    pub fn remove_at(&self, index: usize) -> Option<Value> {
        let inner = &self.engine.inner;
        let (slot, shifted) = {
            let mut arena = inner.containers.write();
            let meta = arena.get_mut(self.id.index())?;
            let ContainerData::List(list) = &mut meta.data else {
                return None;
            };
            if index >= list.len() {
                return None;
            }
            let slot = list.remove(index);
            let shifted = (index..=list.len()).map(Key::Index).collect::<Vec<_>>();
            meta.bump_version();
            (slot, shifted)
        };
        let value = self.detach(slot);
        for key in shifted {
            inner.trigger(self.id, &DepKey::Member(key));
        }
        inner.trigger(self.id, &DepKey::Version);
        Some(value)
    }

    /// Tracked length read; subscribes to the version marker.
    pub fn len(&self) -> usize {
        let inner = &self.engine.inner;
        let len = {
            let arena = inner.containers.read();
            arena
                .get(self.id.index())
                .map(|meta| meta.data.len())
                .unwrap_or(0)
        };
        inner.track(self.id, DepKey::Version);
        len
    }

    /// Tracked emptiness read; subscribes to the version marker.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked key listing for maps (empty for lists); subscribes to the
    /// version marker.
    pub fn keys(&self) -> Vec<String> {
        let inner = &self.engine.inner;
        let keys = {
            let arena = inner.containers.read();
            match arena.get(self.id.index()).map(|meta| &meta.data) {
                Some(ContainerData::Map(map)) => map.keys().cloned().collect(),
                _ => Vec::new(),
            }
        };
        inner.track(self.id, DepKey::Version);
        keys
    }

    /// Tracked read of the structural version marker. Dependents that only
    /// care about shape subscribe here instead of per key.
    pub fn version(&self) -> u64 {
        let inner = &self.engine.inner;
        let version = {
            let arena = inner.containers.read();
            arena
                .get(self.id.index())
                .map(|meta| meta.version)
                .unwrap_or(0)
        };
        inner.track(self.id, DepKey::Version);
        version
    }

    /// Deep, untracked snapshot of the raw data - the "get raw" utility.
    ///
    /// Establishes no dependency: an effect that only calls `raw` never
    /// reruns on later mutation.
    pub fn raw(&self) -> Value {
        self.engine.inner.snapshot(self.id)
    }

    /// Turn a removed slot into a detached value, freeing any wrapped
    /// subtree it held.
    fn detach(&self, slot: Slot) -> Value {
        match slot {
            Slot::Leaf(v) | Slot::Raw(v) => v,
            Slot::Child(child) => {
                let value = self.engine.inner.snapshot(child);
                self.engine.inner.free_subtree(child);
                value
            }
        }
    }

    /// Fire the triggers a completed write calls for.
    fn apply_write(&self, key: Key, outcome: WriteOutcome) {
        let inner = &self.engine.inner;
        match outcome {
            WriteOutcome::Unchanged => {
                cov_mark::hit!(noop_write_skipped);
            }
            WriteOutcome::Changed {
                structural,
                freed,
                extra,
            } => {
                if let Some(child) = freed {
                    inner.free_subtree(child);
                }
                inner.trigger(self.id, &DepKey::Member(key));
                for extra_key in extra {
                    inner.trigger(self.id, &DepKey::Member(extra_key));
                }
                if structural {
                    inner.trigger(self.id, &DepKey::Version);
                }
            }
        }
    }
}

/// Overwrite an existing slot, classifying the result. Identity-equal
/// primitive rewrites report `Unchanged`; everything else replaces the
/// slot, remembering a displaced child subtree for freeing.
fn write_slot(slot: &mut Slot, value: Value) -> WriteOutcome {
    if let Slot::Leaf(old) = &*slot {
        if !value.is_composite() && old.identical(&value) {
            return WriteOutcome::Unchanged;
        }
    }
    let freed = match slot {
        Slot::Child(child) => Some(*child),
        _ => None,
    };
    *slot = Slot::from_value(value);
    WriteOutcome::changed(false, freed)
}
