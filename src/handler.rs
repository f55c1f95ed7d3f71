//! Middleware trait, type erasure and the continuation.
//!
//! # How handlers are stored
//!
//! A chain holds steps built from *different* closure types in one `Vec`.
//! Rust collections can only hold one concrete type, so every handler is
//! hidden behind the object-safe [`Middleware`] trait and stored as an
//! `Arc<dyn Middleware>`:
//!
//! ```text
//! |req, res, next| async move { … }            ← user writes this
//!        ↓ Step::new("auth", handler)
//! Arc::new(FnMiddleware(handler))              ← heap-allocated wrapper
//!        ↓  stored as BoxedMiddleware = Arc<dyn Middleware>
//! middleware.call(req, res, next)  per step    ← one vtable dispatch
//!        ↓
//! Box::pin(async { handler(..).await.into_step_result() })  ← BoxFuture
//! ```
//!
//! Types that need state of their own can implement [`Middleware`] directly.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::guard::ScopedResponse;
use crate::request::Request;
use crate::scheduler::{Settle, Signal};

/// Error type a handler's future may resolve to.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A heap-allocated, type-erased handler future.
///
/// `Send + 'static` because the scheduler spawns it: it must be free to keep
/// running after its step's window has closed.
pub type BoxFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'static>>;

/// One unit of work in a chain.
///
/// A call signals completion through exactly one of:
///
/// - [`Next::proceed`]: hand over to the next step;
/// - [`Next::fail`]: stop the chain with an error;
/// - writing a body through `res`: the step answered, the chain stops;
/// - the returned future resolving to `Err`, or a panic: recorded as an error.
///
/// Doing none of these before the per-step timeout marks the step timed out.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Arc<Request>, res: ScopedResponse, next: Next) -> BoxFuture;
}

/// A handler shared by every run of a chain.
pub type BoxedMiddleware = Arc<dyn Middleware>;

// ── Continuation ──────────────────────────────────────────────────────────────

/// The continuation handed to a step.
///
/// Consumed by [`proceed`](Next::proceed) or [`fail`](Next::fail), so it can be
/// used at most once. Dropping it without calling either leaves the step to
/// finish by responding or by timing out.
pub struct Next {
    settle: Settle,
}

impl Next {
    pub(crate) fn new(settle: Settle) -> Self {
        Self { settle }
    }

    /// Hand control to the next step.
    pub fn proceed(self) {
        self.settle.fire(Signal::Proceed);
    }

    /// Stop the chain, recording `err`'s message verbatim.
    pub fn fail(self, err: impl fmt::Display) {
        self.settle.fire(Signal::Failed(err.to_string()));
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next")
    }
}

// ── IntoStepResult ────────────────────────────────────────────────────────────

/// What a handler's future may resolve to: `()` or `Result<(), E>`.
pub trait IntoStepResult {
    fn into_step_result(self) -> Result<(), BoxError>;
}

impl IntoStepResult for () {
    fn into_step_result(self) -> Result<(), BoxError> { Ok(()) }
}

impl<E> IntoStepResult for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_step_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

// ── Closure wrapper ───────────────────────────────────────────────────────────

/// Newtype holding a concrete handler `F`, bridging the typed world to the
/// trait-object world.
pub(crate) struct FnMiddleware<F>(pub(crate) F);

impl<F, Fut, R> Middleware for FnMiddleware<F>
where
    F: Fn(Arc<Request>, ScopedResponse, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoStepResult + Send + 'static,
{
    fn call(&self, req: Arc<Request>, res: ScopedResponse, next: Next) -> BoxFuture {
        // Invoking the closure runs its synchronous prefix right here, inside
        // the scheduler's panic guard. Only the returned future is deferred.
        let fut = (self.0)(req, res, next);
        Box::pin(async move { fut.await.into_step_result() })
    }
}
