//! Chain execution.
//!
//! The runner owns the run's response and is the only place tokens are
//! activated and retired. For each step it:
//!
//! 1. snapshots the response (the rollback image for a timeout);
//! 2. activates a fresh token wired to a fresh resolution channel;
//! 3. lets the scheduler race the handler against the deadline;
//! 4. retires the token, rolling back if the step timed out (the step's
//!    write window already closed when it resolved);
//! 5. classifies the step, records it and stops on anything but `ok`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::Error;
use crate::guard::Stage;
use crate::request::{Request, RequestSpec};
use crate::scheduler::{self, Pending, Resolution};
use crate::step::Step;
use crate::telemetry::Recorder;
use crate::timeline::{self, RunResult, StepStatus, TimelineEntry};

/// Per-step budget when none is configured.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_millis(2000);

/// Runs chains of [`Step`]s against a synthetic request.
///
/// ```rust,ignore
/// let result = Runner::new()
///     .step_timeout(Duration::from_millis(500))
///     .recorder(telemetry.clone())
///     .run(&steps, RequestSpec::new().path("/users"))
///     .await?;
/// ```
#[derive(Clone)]
pub struct Runner {
    step_timeout: Duration,
    recorder: Option<Arc<dyn Recorder>>,
}

impl Runner {
    pub fn new() -> Self {
        Self { step_timeout: DEFAULT_STEP_TIMEOUT, recorder: None }
    }

    pub fn step_timeout(mut self, limit: Duration) -> Self {
        self.step_timeout = limit;
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Executes `steps` in order until one does not end `ok` or the chain is
    /// exhausted.
    ///
    /// Only misuse caught before the first step runs is an `Err`: a zero
    /// timeout, a step without a key, or an invalid request override. Every
    /// in-chain failure is reported in the timeline instead.
    pub async fn run(&self, steps: &[Step], request: RequestSpec) -> Result<RunResult, Error> {
        if self.step_timeout.is_zero() {
            return Err(Error::InvalidTimeout("must be greater than zero".to_owned()));
        }
        if let Some(pos) = steps.iter().position(|s| s.key().trim().is_empty()) {
            return Err(Error::InvalidStep(format!("step {pos} has an empty key")));
        }
        let request = Arc::new(Request::from_spec(request)?);

        let stage = Stage::new();
        let mut timeline = Vec::with_capacity(steps.len());

        for step in steps {
            let before = stage.snapshot();
            let pending = Pending::new();
            let token = stage.activate(pending.finish_hook());
            let started_at = Utc::now();

            let (resolution, elapsed) = scheduler::execute(
                step.handler(),
                Arc::clone(&request),
                stage.scope(token),
                pending,
                self.step_timeout,
            )
            .await;

            let rollback = (resolution == Resolution::TimedOut).then(|| before.clone());
            let after = stage.retire(token, rollback);
            let status = classify(&resolution, before.responded, after.responded);

            let error = match resolution {
                Resolution::Failed(msg) => Some(msg),
                _ => None,
            };
            let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

            if status == StepStatus::Timeout {
                warn!(step = step.key(), limit_ms = self.step_timeout.as_millis() as u64, "step timed out");
            } else {
                debug!(step = step.key(), status = status.as_str(), duration_ms, "step resolved");
            }

            let entry = TimelineEntry {
                key: step.key().to_owned(),
                name: step.name().to_owned(),
                started_at,
                duration_ms,
                status,
                error,
                locals: timeline::preview(&after.locals),
            };
            if let Some(recorder) = &self.recorder {
                recorder.record(&entry);
            }
            timeline.push(entry);

            if !status.continues() {
                break;
            }
        }

        let result = RunResult { timeline, response: stage.snapshot() };
        if let Some(recorder) = &self.recorder {
            recorder.run_finished(&result);
        }
        Ok(result)
    }
}

impl Default for Runner {
    fn default() -> Self { Self::new() }
}

/// Runs `steps` once with the given per-step timeout and no recorder.
pub async fn run_chain(
    steps: &[Step],
    request: RequestSpec,
    step_timeout: Duration,
) -> Result<RunResult, Error> {
    Runner::new().step_timeout(step_timeout).run(steps, request).await
}

/// Final status of a step.
///
/// A step that proceeded is a short-circuit only if the response became
/// responded *during* that step. A flag left over from an earlier step is
/// not attributed to this one.
fn classify(resolution: &Resolution, responded_before: bool, responded_after: bool) -> StepStatus {
    match resolution {
        Resolution::Proceeded if responded_after && !responded_before => StepStatus::ShortCircuit,
        Resolution::Proceeded => StepStatus::Ok,
        Resolution::Responded => StepStatus::ShortCircuit,
        Resolution::Failed(_) => StepStatus::Error,
        Resolution::TimedOut => StepStatus::Timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proceeding_after_answering_is_a_short_circuit() {
        assert_eq!(classify(&Resolution::Proceeded, false, true), StepStatus::ShortCircuit);
    }

    #[test]
    fn responded_flag_from_an_earlier_step_is_not_attributed() {
        assert_eq!(classify(&Resolution::Proceeded, true, true), StepStatus::Ok);
    }

    #[test]
    fn remaining_resolutions_map_directly() {
        assert_eq!(classify(&Resolution::Proceeded, false, false), StepStatus::Ok);
        assert_eq!(classify(&Resolution::Responded, false, true), StepStatus::ShortCircuit);
        assert_eq!(classify(&Resolution::Failed("x".into()), false, false), StepStatus::Error);
        assert_eq!(classify(&Resolution::TimedOut, false, false), StepStatus::Timeout);
    }
}
