//! Cross-run step statistics.
//!
//! The runner reports to whatever [`Recorder`] it was given; [`Telemetry`] is
//! the stock one. It lives as long as its owner keeps the `Arc` around and is
//! cleared explicitly with [`Telemetry::reset`]. Counters saturate instead of
//! wrapping.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::timeline::{RunResult, StepStatus, TimelineEntry};

/// Sink the runner reports executed steps to.
pub trait Recorder: Send + Sync {
    fn record(&self, entry: &TimelineEntry);

    fn run_finished(&self, _result: &RunResult) {}
}

/// Counters for one step key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStats {
    pub invocations: u64,
    pub ok: u64,
    pub errors: u64,
    pub short_circuits: u64,
    pub timeouts: u64,
    pub total_duration_ms: u64,
    pub max_duration_ms: u64,
}

impl StepStats {
    fn add(&mut self, entry: &TimelineEntry) {
        self.invocations = self.invocations.saturating_add(1);
        let bucket = match entry.status {
            StepStatus::Ok => &mut self.ok,
            StepStatus::Error => &mut self.errors,
            StepStatus::ShortCircuit => &mut self.short_circuits,
            StepStatus::Timeout => &mut self.timeouts,
        };
        *bucket = bucket.saturating_add(1);
        self.total_duration_ms = self.total_duration_ms.saturating_add(entry.duration_ms);
        self.max_duration_ms = self.max_duration_ms.max(entry.duration_ms);
    }

    pub fn mean_duration_ms(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.invocations as f64
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub runs: u64,
    pub steps: BTreeMap<String, StepStats>,
}

#[derive(Debug, Default)]
pub struct Telemetry {
    inner: Mutex<TelemetrySnapshot>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TelemetrySnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.lock().clone()
    }

    pub fn step(&self, key: &str) -> Option<StepStats> {
        self.lock().steps.get(key).cloned()
    }

    pub fn reset(&self) {
        *self.lock() = TelemetrySnapshot::default();
    }
}

impl Recorder for Telemetry {
    fn record(&self, entry: &TimelineEntry) {
        self.lock().steps.entry(entry.key.clone()).or_default().add(entry);
    }

    fn run_finished(&self, _result: &RunResult) {
        let mut inner = self.lock();
        inner.runs = inner.runs.saturating_add(1);
    }
}
