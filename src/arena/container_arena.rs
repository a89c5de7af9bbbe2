// Container arena - storage for container metadata
//
// A ContainerMeta holds three things:
// - slots: the actual data, one Slot per key/index
// - deps: the dependency nodes, one subscriber set per tracked key
// - version: a counter bumped on structural mutation (key add/delete,
//   list push/pop/insert/remove), so shape-dependent reads (len, keys,
//   iteration) can subscribe to a single node instead of every index
//
// Composite slot values start out Raw and are wrapped into a Child
// container on first read. The Raw -> Child conversion happens at most
// once per slot, which is what makes nested container handles
// identity-stable: re-reading the same field always yields the same
// ContainerId.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::hash::FastHashBuilder;
use crate::value::Value;

use super::EffectId;

/// Unique identifier for a container node in the arena.
///
/// A zero-cost wrapper around a slab index. Entries are removed when their
/// parent slot is structurally deleted (or when the engine drops), making
/// the id stale; stale access through the engine returns `None`.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) struct ContainerId(u32);

impl ContainerId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A key addressing one member of a container: a named field for maps, a
/// position for lists.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Key {
    /// Map field name.
    Field(String),
    /// List position.
    Index(usize),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Field(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Field(s)
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

/// Internal dependency-node key: either a member key or the container's
/// version marker.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) enum DepKey {
    /// A tracked member read (`get`, `contains`).
    Member(Key),
    /// The version marker (`len`, `keys`, `version`).
    Version,
}

/// One stored member of a container.
#[derive(Debug)]
pub(crate) enum Slot {
    /// A primitive value.
    Leaf(Value),
    /// A composite value that has not been read yet, kept raw so that
    /// memory stays proportional to the traversed portion of the graph.
    Raw(Value),
    /// A composite value that has been wrapped on a previous read.
    Child(ContainerId),
}

impl Slot {
    /// Build a slot for an incoming raw value: composites stay raw until
    /// first read, primitives become leaves.
    pub(crate) fn from_value(value: Value) -> Self {
        if value.is_composite() {
            Slot::Raw(value)
        } else {
            Slot::Leaf(value)
        }
    }
}

/// The data half of a container: map or list of slots.
#[derive(Debug)]
pub(crate) enum ContainerData {
    Map(IndexMap<String, Slot>),
    List(Vec<Slot>),
}

impl ContainerData {
    pub(crate) fn slot(&self, key: &Key) -> Option<&Slot> {
        match (self, key) {
            (ContainerData::Map(map), Key::Field(name)) => map.get(name),
            (ContainerData::List(list), Key::Index(i)) => list.get(*i),
            _ => None,
        }
    }

    pub(crate) fn slot_mut(&mut self, key: &Key) -> Option<&mut Slot> {
        match (self, key) {
            (ContainerData::Map(map), Key::Field(name)) => map.get_mut(name),
            (ContainerData::List(list), Key::Index(i)) => list.get_mut(*i),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            ContainerData::Map(map) => map.len(),
            ContainerData::List(list) => list.len(),
        }
    }

    /// Child container ids held directly by this data, used when freeing a
    /// subtree.
    pub(crate) fn child_ids(&self) -> Vec<ContainerId> {
        let collect = |slot: &Slot| match slot {
            Slot::Child(id) => Some(*id),
            _ => None,
        };
        match self {
            ContainerData::Map(map) => map.values().filter_map(collect).collect(),
            ContainerData::List(list) => list.iter().filter_map(collect).collect(),
        }
    }
}

/// Metadata for one reactive container.
pub(crate) struct ContainerMeta {
    /// The stored members.
    pub(crate) data: ContainerData,
    /// Structural version marker. Bumped on key add/delete and list
    /// push/pop/insert/remove; never on plain value replacement.
    pub(crate) version: u64,
    /// Dependency nodes: per-key subscriber sets. A node is created on
    /// first track and pruned once its subscriber set empties, so dynamic
    /// keys (array indices, deleted fields) do not leak map entries.
    pub(crate) deps: HashMap<DepKey, IndexSet<EffectId, FastHashBuilder>, FastHashBuilder>,
}

impl ContainerMeta {
    /// Build a container from a composite value. The caller guarantees the
    /// value is composite; primitives are rejected earlier by `wrap`.
    pub(crate) fn from_value(value: Value) -> Self {
        let data = match value {
            Value::Map(map) => ContainerData::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Slot::from_value(v)))
                    .collect(),
            ),
            Value::List(list) => {
                ContainerData::List(list.into_iter().map(Slot::from_value).collect())
            }
            primitive => unreachable!("wrap rejects primitives, got {}", primitive.kind()),
        };
        Self {
            data,
            version: 0,
            deps: HashMap::with_hasher(FastHashBuilder),
        }
    }

    /// Register a subscriber on a dependency node, creating the node on
    /// first track.
    pub(crate) fn add_subscriber(&mut self, key: DepKey, effect: EffectId) {
        self.deps.entry(key).or_default().insert(effect);
    }

    /// Remove a subscriber from a node, pruning the node once empty.
    pub(crate) fn remove_subscriber(&mut self, key: &DepKey, effect: EffectId) {
        if let Some(subs) = self.deps.get_mut(key) {
            subs.swap_remove(&effect);
            if subs.is_empty() {
                cov_mark::hit!(empty_node_pruned);
                self.deps.remove(key);
            }
        }
    }

    /// Snapshot a node's subscriber set. Snapshotting before iteration is
    /// mandatory: re-entrant tracking mutates the live set while a trigger
    /// is delivering to it.
    pub(crate) fn subscribers(&self, key: &DepKey) -> Vec<EffectId> {
        self.deps
            .get(key)
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }
}
