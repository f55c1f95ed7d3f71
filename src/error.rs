//! Unified error type.

use http::StatusCode;

/// The error type returned by gauntlet's fallible operations.
///
/// Failures *inside* a chain (a step that errors, panics or times out) are
/// never `Error`s: they are recorded as
/// [`TimelineEntry`](crate::TimelineEntry)s in the [`RunResult`](crate::RunResult).
/// This type surfaces misuse caught before a run starts, bad configuration,
/// and infrastructure failures such as binding to a port.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid json: {0}")]
    InvalidJson(String),

    #[error("unknown middleware `{0}`")]
    UnknownMiddleware(String),

    #[error("invalid options for `{key}`: {reason}")]
    InvalidOptions { key: String, reason: String },

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid per-step timeout: {0}")]
    InvalidTimeout(String),

    #[error("chain has {len} steps, the limit is {max}")]
    ChainTooLong { len: usize, max: usize },
}

impl Error {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Config(_) => "invalid_config",
            Self::InvalidJson(_) => "invalid_json",
            Self::UnknownMiddleware(_) => "unknown_middleware",
            Self::InvalidOptions { .. } => "invalid_options",
            Self::InvalidStep(_) => "invalid_step",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidTimeout(_) => "invalid_timeout",
            Self::ChainTooLong { .. } => "chain_too_long",
        }
    }

    /// HTTP status the route layer answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Io(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UnknownMiddleware(_) | Self::InvalidOptions { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
