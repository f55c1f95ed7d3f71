//! Runtime configuration.
//!
//! Read from the environment once at startup. A `.env` file in the working
//! directory is honoured by the binary (via `dotenvy`) before this runs.
//!
//! | Variable | Default |
//! |---|---|
//! | `GAUNTLET_ADDR` | `127.0.0.1:3000` |
//! | `GAUNTLET_STEP_TIMEOUT_MS` | `2000` |
//! | `GAUNTLET_MAX_STEP_TIMEOUT_MS` | `30000` |
//! | `GAUNTLET_MAX_CHAIN_LEN` | `64` |
//! | `GAUNTLET_MAX_BODY_BYTES` | `1048576` |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::runner::DEFAULT_STEP_TIMEOUT;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub addr: SocketAddr,
    /// Budget for a run that does not ask for one.
    pub step_timeout: Duration,
    /// Upper bound a caller may ask for.
    pub max_step_timeout: Duration,
    pub max_chain_len: usize,
    /// Largest request body the HTTP server will read.
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            step_timeout: DEFAULT_STEP_TIMEOUT,
            max_step_timeout: Duration::from_secs(30),
            max_chain_len: 64,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source. `from_env` is this over
    /// `std::env`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let defaults = Self::default();
        let config = Self {
            addr: parse(&lookup, "GAUNTLET_ADDR")?.unwrap_or(defaults.addr),
            step_timeout: parse(&lookup, "GAUNTLET_STEP_TIMEOUT_MS")?
                .map_or(defaults.step_timeout, Duration::from_millis),
            max_step_timeout: parse(&lookup, "GAUNTLET_MAX_STEP_TIMEOUT_MS")?
                .map_or(defaults.max_step_timeout, Duration::from_millis),
            max_chain_len: parse(&lookup, "GAUNTLET_MAX_CHAIN_LEN")?
                .unwrap_or(defaults.max_chain_len),
            max_body_bytes: parse(&lookup, "GAUNTLET_MAX_BODY_BYTES")?
                .unwrap_or(defaults.max_body_bytes),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.step_timeout.is_zero() || self.max_step_timeout.is_zero() {
            return Err(Error::Config("step timeouts must be greater than zero".to_owned()));
        }
        if self.step_timeout > self.max_step_timeout {
            return Err(Error::Config(format!(
                "default step timeout {}ms exceeds the maximum {}ms",
                self.step_timeout.as_millis(),
                self.max_step_timeout.as_millis(),
            )));
        }
        if self.max_chain_len == 0 {
            return Err(Error::Config("GAUNTLET_MAX_CHAIN_LEN must be at least 1".to_owned()));
        }
        if self.max_body_bytes == 0 {
            return Err(Error::Config("GAUNTLET_MAX_BODY_BYTES must be at least 1".to_owned()));
        }
        Ok(())
    }

    /// Resolves a caller's requested timeout against the configured bounds.
    pub fn step_timeout_for(&self, requested_ms: Option<u64>) -> Result<Duration, Error> {
        let Some(ms) = requested_ms else {
            return Ok(self.step_timeout);
        };
        let max = self.max_step_timeout.as_millis();
        if ms == 0 || u128::from(ms) > max {
            return Err(Error::InvalidTimeout(format!(
                "perStepTimeoutMs must be between 1 and {max}, got {ms}"
            )));
        }
        Ok(Duration::from_millis(ms))
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?}: {e}"))),
    }
}
