//! Step descriptors.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::guard::ScopedResponse;
use crate::handler::{BoxedMiddleware, FnMiddleware, IntoStepResult, Middleware, Next};
use crate::request::Request;

/// One entry of a chain: an identifier, a display name and a handler.
///
/// ```rust,ignore
/// let auth = Step::new("auth", |req: Arc<Request>, res: ScopedResponse, next: Next| async move {
///     match req.header("authorization") {
///         Some(_) => next.proceed(),
///         None => { res.status(401).json(json!({ "error": "unauthorized" })); }
///     }
/// })
/// .named("Bearer auth");
/// ```
#[derive(Clone)]
pub struct Step {
    key: String,
    name: String,
    handler: BoxedMiddleware,
}

impl Step {
    /// Builds a step from a closure or `fn`. The display name defaults to `key`.
    pub fn new<F, Fut, R>(key: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<Request>, ScopedResponse, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoStepResult + Send + 'static,
    {
        Self::from_middleware(key, FnMiddleware(handler))
    }

    /// Builds a step from a type implementing [`Middleware`] directly.
    pub fn from_middleware(key: impl Into<String>, middleware: impl Middleware) -> Self {
        let key = key.into();
        Self { name: key.clone(), key, handler: Arc::new(middleware) }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn key(&self) -> &str { &self.key }
    pub fn name(&self) -> &str { &self.name }

    pub(crate) fn handler(&self) -> &BoxedMiddleware {
        &self.handler
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("key", &self.key)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
