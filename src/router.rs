//! Radix-tree routing for the playground API.
//!
//! One tree per HTTP method. O(path-length) lookup. The tree values are plain
//! [`Endpoint`] tags; the API layer decides what each one does.

use std::collections::HashMap;

use http::Method;
use matchit::Router as MatchitRouter;

/// Everything the API answers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Endpoint {
    Health,
    Catalog,
    Run,
    Telemetry,
    TelemetryStep,
    ResetTelemetry,
}

pub(crate) struct Router {
    routes: HashMap<Method, MatchitRouter<Endpoint>>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// The playground's routing table.
    pub(crate) fn api() -> Self {
        Self::new()
            .on(Method::GET, "/healthz", Endpoint::Health)
            .on(Method::GET, "/api/middlewares", Endpoint::Catalog)
            .on(Method::POST, "/api/run", Endpoint::Run)
            .on(Method::GET, "/api/telemetry", Endpoint::Telemetry)
            .on(Method::DELETE, "/api/telemetry", Endpoint::ResetTelemetry)
            .on(Method::GET, "/api/telemetry/{key}", Endpoint::TelemetryStep)
    }

    /// Register an endpoint for a method + path pair. Returns `self` for chaining.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid matchit route or conflicts with one
    /// already registered for `method`.
    pub(crate) fn on(mut self, method: Method, path: &str, endpoint: Endpoint) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, endpoint)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(Endpoint, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((*matched.value, params))
    }
}
