//! Fixed-seed hashing for the engine's internal collections.
//!
//! Dependency nodes, source sets, and the pending queue are keyed by
//! arena indices we mint ourselves, so HashDoS resistance buys nothing
//! here. A zero-sized foldhash builder with a fixed seed keeps the maps
//! allocation-lean and their iteration order deterministic across runs.

use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};

/// Zero-sized `BuildHasher` over foldhash with a fixed seed.
///
/// Every instance hashes identically, so sets and maps built with it cost
/// no per-collection state.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x9e3779b97f4a7c15).build_hasher()
    }
}
