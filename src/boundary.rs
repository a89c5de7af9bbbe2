//! Error boundary: wrap an effect body with retry/fallback policy.
//!
//! The boundary sits between application code and [`Engine::effect`]: it
//! catches a panicking body, hands the failure to a handler as context
//! metadata, and acts on the explicit [`Decision`] the handler returns.
//! The core sees an ordinary body and knows nothing about retries.
//!
//! # Example
//!
//! ```ignore
//! let body = ErrorBoundary::new("sync-widget")
//!     .on_error(|ctx| {
//!         if ctx.failures < 3 { Decision::Retry } else { Decision::Fallback }
//!     })
//!     .with_fallback(|| show_offline_badge())
//!     .wrap(move || render_widget(&state));
//! let effect = engine.effect(body);
//! ```
//!
//! [`Engine::effect`]: crate::Engine::effect

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{panic_message, ITERATION_LIMIT};

/// What the boundary does after a body failure. Returned by the handler;
/// there is no thrown/caught control flow at this layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Swallow the failure; the effect stays subscribed and waits for the
    /// next trigger.
    Continue,
    /// Run the body again within this same invocation.
    Retry,
    /// Run the fallback closure, then behave like `Continue`.
    Fallback,
}

/// Failure metadata handed to the boundary handler.
pub struct BoundaryContext<'a> {
    /// Name given to the boundary at construction.
    pub name: &'a str,
    /// Total body failures seen by this boundary, this one included.
    /// Persists across effect runs, so handlers can cap lifetime retries.
    pub failures: usize,
    /// Panic payload rendered as a message.
    pub message: &'a str,
}

type Handler = Box<dyn FnMut(&BoundaryContext) -> Decision + Send>;

/// Builder for a guarded effect body.
pub struct ErrorBoundary {
    name: String,
    handler: Handler,
    fallback: Option<Box<dyn FnMut() + Send>>,
}

impl ErrorBoundary {
    /// A boundary that logs failures and continues. Attach a handler with
    /// [`on_error`](ErrorBoundary::on_error) for retry/fallback policy.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: Box::new(|_| Decision::Continue),
            fallback: None,
        }
    }

    /// Set the failure handler. It receives the context and returns the
    /// decision for that failure.
    pub fn on_error(
        mut self,
        handler: impl FnMut(&BoundaryContext) -> Decision + Send + 'static,
    ) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Set the closure run when the handler returns
    /// [`Decision::Fallback`]. Without one, `Fallback` degrades to
    /// `Continue`.
    pub fn with_fallback(mut self, fallback: impl FnMut() + Send + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Consume the boundary and wrap `body` into a guarded effect body.
    ///
    /// Each invocation runs `body`; on panic the handler decides. `Retry`
    /// loops within the invocation (capped at [`ITERATION_LIMIT`] retries,
    /// after which the failure is logged and dropped). Reads the body
    /// performs during a retry are tracked normally, so the final
    /// successful attempt defines the dependency set.
    pub fn wrap(self, mut body: impl FnMut() + Send + 'static) -> impl FnMut() + Send + 'static {
        let ErrorBoundary {
            name,
            mut handler,
            mut fallback,
        } = self;
        let mut failures = 0usize;

        move || {
            let mut attempts = 0usize;
            loop {
                let Err(payload) = catch_unwind(AssertUnwindSafe(&mut body)) else {
                    return;
                };
                failures += 1;
                attempts += 1;
                let message = panic_message(payload.as_ref());
                tracing::warn!(boundary = %name, failures, cause = %message, "effect body failed");

                let decision = handler(&BoundaryContext {
                    name: &name,
                    failures,
                    message: &message,
                });
                match decision {
                    Decision::Continue => return,
                    Decision::Fallback => {
                        if let Some(fallback) = fallback.as_mut() {
                            cov_mark::hit!(boundary_fallback_ran);
                            fallback();
                        }
                        return;
                    }
                    Decision::Retry => {
                        if attempts > ITERATION_LIMIT {
                            cov_mark::hit!(boundary_retry_capped);
                            tracing::warn!(boundary = %name, "retry ceiling reached");
                            return;
                        }
                    }
                }
            }
        }
    }
}
