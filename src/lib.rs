//! # gauntlet
//!
//! Assemble a chain of HTTP middleware, run it against a synthetic request,
//! and see what every step did: how long it took, whether it handed over,
//! answered, failed or ran out of time.
//!
//! There is no network stack underneath a run. The request is a value, the
//! response is a value, and the interesting part is the engine in between:
//!
//! - **[`Runner`]** executes steps strictly one after another and stops at
//!   the first one that does not end `ok`.
//! - Each step races its continuation, a response write and its own failure
//!   against a per-step deadline. The first signal decides.
//! - Each step writes through a [`ScopedResponse`] that goes dead the moment
//!   the step is over. A timer a handler left behind cannot touch what later
//!   steps see; a timed-out step's writes are rolled back.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gauntlet::{Next, Request, RequestSpec, Runner, ScopedResponse, Step, StepStatus};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), gauntlet::Error> {
//! let steps = vec![
//!     Step::new("auth", |req: Arc<Request>, res: ScopedResponse, next: Next| async move {
//!         if req.header("authorization").is_some() {
//!             next.proceed();
//!         } else {
//!             res.status(401).json(json!({ "error": "unauthorized" }));
//!         }
//!     }),
//!     Step::new("hello", |_req, res: ScopedResponse, _next| async move {
//!         res.json(json!({ "hello": "world" }));
//!     }),
//! ];
//!
//! let result = Runner::new().run(&steps, RequestSpec::new().path("/hello")).await?;
//! assert_eq!(result.statuses(), [StepStatus::ShortCircuit]);
//! assert_eq!(result.response.status_code, 401);
//! # Ok(())
//! # }
//! ```
//!
//! Chains can also be described as data and resolved through a
//! [`Registry`](middleware::Registry), which is what the bundled HTTP
//! playground ([`Server`], [`App`]) does.

#![deny(rustdoc::broken_intra_doc_links)]

mod api;
mod config;
mod error;
mod guard;
mod handler;
mod request;
mod response;
mod router;
mod runner;
mod scheduler;
mod server;
mod step;
mod telemetry;
mod timeline;

pub mod middleware;

pub use api::App;
pub use config::Config;
pub use error::Error;
pub use guard::{ScopedResponse, StepToken};
pub use handler::{BoxError, BoxFuture, IntoStepResult, Middleware, Next};
pub use request::{Request, RequestSpec};
pub use response::{Cookie, Response, ResponseSnapshot};
pub use runner::{DEFAULT_STEP_TIMEOUT, Runner, run_chain};
pub use server::Server;
pub use step::Step;
pub use telemetry::{Recorder, StepStats, Telemetry, TelemetrySnapshot};
pub use timeline::{RunResult, StepStatus, TimelineEntry};
