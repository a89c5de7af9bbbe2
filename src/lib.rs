#![deny(missing_docs)]

//! # reflow
//!
//! A fine-grained reactive state engine: wrap keyed data in containers,
//! read it inside effects, and mutations rerun exactly the effects that
//! depend on them.
//!
//! ## Core pieces
//!
//! - [`Engine`] - one explicit value owning the dependency graph, the
//!   scheduler, and the batch context. No process-wide singletons;
//!   independent engines coexist.
//! - [`Container`] - reactive handle over a map or list. Reads track,
//!   writes trigger, nested composites are wrapped lazily with stable
//!   identity.
//! - [`Effect`] - a re-runnable body whose dependency set is rediscovered
//!   on every run. Disposal is idempotent and final.
//! - [`Engine::batch`] - group related mutations; affected effects run
//!   once, after the outermost batch exits, observing the settled state.
//!
//! ## Example
//!
//! ```ignore
//! use reflow::{Engine, Value};
//!
//! let engine = Engine::new();
//! let state = engine.wrap(Value::from_iter([
//!     ("count", Value::Int(0)),
//!     ("label", Value::from("clicks")),
//! ]))?;
//!
//! let effect = engine.effect({
//!     let state = state.clone();
//!     move || {
//!         let count = state.get("count").and_then(|e| e.as_i64()).unwrap_or(0);
//!         println!("{count} clicks");
//!     }
//! });
//!
//! engine.batch(|| {
//!     state.set("count", 1);
//!     state.set("count", 2);
//! }); // prints "2 clicks", once
//!
//! effect.dispose();
//! ```
//!
//! ## Failure model
//!
//! A panic during an effect's first run propagates to the [`effect`]
//! caller. Panics during reruns are isolated per effect and delivered to
//! the engine's error sink ([`Engine::set_error_handler`], default
//! `tracing::error!`), as are the runaway-cascade ceilings
//! ([`EngineError::ReentrancyOverflow`], [`EngineError::FlushDivergence`]).
//! The dependency graph survives all of them.
//!
//! The [`boundary`], [`cleanup`], and [`bridge`] modules are thin
//! collaborators built on the public surface: retry/fallback policy,
//! bulk teardown, and reactive access to external key-value stores.
//!
//! [`effect`]: Engine::effect

mod arena;
mod batch;
pub mod boundary;
pub mod bridge;
pub mod cleanup;
mod container;
mod effect;
mod engine;
mod error;
mod hash;
mod value;

pub use arena::Key;
pub use boundary::{BoundaryContext, Decision, ErrorBoundary};
pub use bridge::{StorageBackend, StorageBridge};
pub use cleanup::CleanupCollector;
pub use container::{Container, ContainerKind};
pub use effect::Effect;
pub use engine::Engine;
pub use error::{EngineError, ITERATION_LIMIT};
pub use value::{Entry, Value};

#[cfg(test)]
mod tests;
