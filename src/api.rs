//! The playground's HTTP API.
//!
//! Turns JSON payloads into chain runs and results back into JSON. All input
//! validation happens here or in the [`Registry`]; by the time the
//! [`Runner`] is called the chain is known to be well-formed. Invalid input
//! gets a 4xx with a machine-readable code:
//!
//! ```json
//! { "error": { "code": "unknown_middleware", "message": "unknown middleware `nope`" } }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::Error;
use crate::middleware::{Registry, StepRef};
use crate::request::RequestSpec;
use crate::router::{Endpoint, Router};
use crate::runner::Runner;
use crate::telemetry::Telemetry;

pub(crate) type HttpResponse = http::Response<Full<Bytes>>;

/// Body of `POST /api/run`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RunPayload {
    chain: Vec<StepRef>,
    #[serde(default)]
    request: RequestSpec,
    per_step_timeout_ms: Option<u64>,
}

/// Shared state behind every request.
pub struct App {
    config: Config,
    registry: Registry,
    telemetry: Arc<Telemetry>,
    router: Router,
}

impl App {
    /// An app serving the built-in middleware.
    pub fn new(config: Config) -> Self {
        Self::with_registry(config, Registry::with_builtins())
    }

    pub fn with_registry(config: Config, registry: Registry) -> Self {
        Self { config, registry, telemetry: Arc::new(Telemetry::new()), router: Router::api() }
    }

    pub fn config(&self) -> &Config { &self.config }
    pub fn telemetry(&self) -> &Arc<Telemetry> { &self.telemetry }

    /// Routes one request and produces one response. Never fails: every
    /// error becomes a JSON error body.
    pub(crate) async fn handle(&self, method: &Method, path: &str, body: Bytes) -> HttpResponse {
        let Some((endpoint, params)) = self.router.lookup(method, path) else {
            return error_response(StatusCode::NOT_FOUND, "not_found", &format!("no route for {method} {path}"));
        };

        let result = match endpoint {
            Endpoint::Health => Ok(text_response(StatusCode::OK, "ok")),
            Endpoint::Catalog => Ok(json_response(StatusCode::OK, &self.registry.catalog())),
            Endpoint::Run => self.run(&body).await,
            Endpoint::Telemetry => Ok(json_response(StatusCode::OK, &self.telemetry.snapshot())),
            Endpoint::TelemetryStep => Ok(self.telemetry_step(&params)),
            Endpoint::ResetTelemetry => {
                self.telemetry.reset();
                Ok(empty_response(StatusCode::NO_CONTENT))
            }
        };

        result.unwrap_or_else(|e| {
            debug!(code = e.code(), error = %e, "rejected request");
            error_response(e.status(), e.code(), &e.to_string())
        })
    }

    async fn run(&self, body: &[u8]) -> Result<HttpResponse, Error> {
        let payload: RunPayload =
            serde_json::from_slice(body).map_err(|e| Error::InvalidJson(e.to_string()))?;

        if payload.chain.len() > self.config.max_chain_len {
            return Err(Error::ChainTooLong {
                len: payload.chain.len(),
                max: self.config.max_chain_len,
            });
        }
        let step_timeout = self.config.step_timeout_for(payload.per_step_timeout_ms)?;
        let steps = self.registry.resolve(&payload.chain)?;

        let result = Runner::new()
            .step_timeout(step_timeout)
            .recorder(self.telemetry.clone())
            .run(&steps, payload.request)
            .await?;
        Ok(json_response(StatusCode::OK, &result))
    }

    fn telemetry_step(&self, params: &HashMap<String, String>) -> HttpResponse {
        let key = params.get("key").map(String::as_str).unwrap_or_default();
        match self.telemetry.step(key) {
            Some(stats) => json_response(StatusCode::OK, &stats),
            None => error_response(StatusCode::NOT_FOUND, "not_found", &format!("no telemetry for `{key}`")),
        }
    }
}

// ── Response helpers ──────────────────────────────────────────────────────────

fn build(status: StatusCode, content_type: Option<&str>, body: Bytes) -> HttpResponse {
    let mut res = http::Response::new(Full::new(body));
    *res.status_mut() = status;
    if let Some(ct) = content_type {
        res.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_str(ct).unwrap_or_else(|_| http::HeaderValue::from_static("application/octet-stream")),
        );
    }
    res
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(bytes) => build(status, Some("application/json"), Bytes::from(bytes)),
        Err(e) => {
            error!("failed to serialize response: {e}");
            build(StatusCode::INTERNAL_SERVER_ERROR, None, Bytes::new())
        }
    }
}

fn text_response(status: StatusCode, text: &'static str) -> HttpResponse {
    build(status, Some("text/plain; charset=utf-8"), Bytes::from_static(text.as_bytes()))
}

fn empty_response(status: StatusCode) -> HttpResponse {
    build(status, None, Bytes::new())
}

pub(crate) fn error_response(status: StatusCode, code: &str, message: &str) -> HttpResponse {
    json_response(status, &json!({ "error": { "code": code, "message": message } }))
}
