//! Error taxonomy for the reactive engine.
//!
//! Errors fall into two delivery paths:
//!
//! - Synchronous: [`EngineError::InvalidTarget`] is returned from
//!   [`Engine::wrap`](crate::Engine::wrap), and a panic during an effect's
//!   first run unwinds to the `effect()` caller.
//! - Reported: failures during reruns have no synchronous caller, so they
//!   are delivered to the engine's configurable error sink instead of
//!   thrown. The default sink logs at error level via `tracing`.

use thiserror::Error;

/// Iteration ceiling shared by the self-recursion guard and the flush loop.
///
/// An effect that retriggers itself more than this many times in one flush
/// (or one synchronous trigger chain) is throttled with
/// [`EngineError::ReentrancyOverflow`]. A flush that needs more than this
/// many passes to stabilize is abandoned with
/// [`EngineError::FlushDivergence`]. The bound is a correctness requirement:
/// it converts an unbounded cascade into a reported error instead of a hang.
pub const ITERATION_LIMIT: usize = 100;

/// Errors produced by the reactive engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `wrap()` was called with a primitive value. Only composites (lists
    /// and maps) can be wrapped; primitives are passed through unwrapped.
    #[error("cannot wrap primitive value of type {kind}")]
    InvalidTarget {
        /// Type name of the rejected value.
        kind: &'static str,
    },

    /// An effect retriggered itself past [`ITERATION_LIMIT`]. The effect is
    /// throttled for the remainder of the current flush or trigger chain.
    #[error("effect {effect} exceeded the rerun ceiling of {limit} iterations")]
    ReentrancyOverflow {
        /// Arena index of the offending effect.
        effect: usize,
        /// The ceiling that was exceeded.
        limit: usize,
    },

    /// A flush cascade never stabilized: after [`ITERATION_LIMIT`] passes
    /// the pending set was still non-empty. The queue is cleared and the
    /// flush abandoned.
    #[error("flush did not stabilize after {passes} passes")]
    FlushDivergence {
        /// Number of passes executed before giving up.
        passes: usize,
    },

    /// Internal invariant violation: a disposed or re-run effect retained a
    /// subscription to a node it no longer reads. Never expected in correct
    /// builds; verified in debug builds after disposal.
    #[error("effect {effect} retained a stale subscription")]
    StaleSubscription {
        /// Arena index of the effect holding the stale subscription.
        effect: usize,
    },

    /// An effect body panicked during a rerun. The panic is caught so that
    /// sibling effects in the same flush keep running; the payload message
    /// is captured here and delivered to the error sink.
    #[error("effect {effect} failed during rerun: {message}")]
    EffectFailed {
        /// Arena index of the failed effect.
        effect: usize,
        /// Panic payload, if it was a string.
        message: String,
    },
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
