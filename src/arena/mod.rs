// Arena-based storage for reactive node metadata
//
// This module provides the two metadata arenas owned by an Engine:
// - Container arena: stores ContainerMeta (slots, dependency nodes, version)
// - Effect arena: stores EffectMeta (callback, state, source set)
//
// Unlike a global-static design, both slabs live inside EngineInner so that
// independent engines can coexist (one per test, typically). ContainerId
// and EffectId are lightweight newtypes that index into the slabs.

pub(crate) mod container_arena;
pub(crate) mod effect_arena;

pub(crate) use container_arena::{ContainerData, ContainerId, ContainerMeta, DepKey, Slot};
pub(crate) use effect_arena::{EffectId, EffectMeta, EffectState};

pub use container_arena::Key;
