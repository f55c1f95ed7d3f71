//! Per-step records and the result of a run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::response::ResponseSnapshot;

/// How a step ended.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    /// Handed over to the next step.
    Ok,
    /// Returned an error, panicked or failed its continuation.
    Error,
    /// Answered the request; nothing after it runs.
    ShortCircuit,
    /// Ran out of time; its writes were rolled back.
    Timeout,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::ShortCircuit => "short-circuit",
            Self::Timeout => "timeout",
        }
    }

    /// Whether the chain carries on after a step with this status.
    pub fn continues(self) -> bool {
        self == Self::Ok
    }
}

/// One executed step. Never modified once pushed onto a timeline.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub key: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Shallow view of the locals after the step.
    pub locals: Map<String, Value>,
}

/// Everything a run produced: one entry per executed step and the final
/// state of the response.
#[derive(Clone, Debug, Serialize)]
pub struct RunResult {
    pub timeline: Vec<TimelineEntry>,
    #[serde(rename = "final")]
    pub response: ResponseSnapshot,
}

impl RunResult {
    /// Status of every executed step, in order. Two runs of the same chain
    /// agree on this even though their durations differ.
    pub fn statuses(&self) -> Vec<StepStatus> {
        self.timeline.iter().map(|e| e.status).collect()
    }

    /// The entry that ended the run early, if any.
    pub fn stopped_at(&self) -> Option<&TimelineEntry> {
        self.timeline.last().filter(|e| !e.status.continues())
    }
}

/// Copies `locals` one level deep: scalars verbatim, nested values replaced
/// by a placeholder.
pub(crate) fn preview(locals: &Map<String, Value>) -> Map<String, Value> {
    locals
        .iter()
        .map(|(k, v)| {
            let shown = match v {
                Value::Array(items) => Value::String(format!("[Array({})]", items.len())),
                Value::Object(_) => Value::String("[Object]".to_owned()),
                scalar => scalar.clone(),
            };
            (k.clone(), shown)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preview_keeps_scalars_and_hides_nesting() {
        let locals = json!({
            "user": "alice",
            "admin": false,
            "score": 4.5,
            "missing": null,
            "roles": ["a", "b"],
            "profile": { "age": 30 }
        });
        let shown = preview(locals.as_object().unwrap());
        assert_eq!(shown["user"], "alice");
        assert_eq!(shown["admin"], false);
        assert_eq!(shown["score"], 4.5);
        assert_eq!(shown["missing"], Value::Null);
        assert_eq!(shown["roles"], "[Array(2)]");
        assert_eq!(shown["profile"], "[Object]");
    }

    #[test]
    fn statuses_serialize_in_kebab_case() {
        let all = [StepStatus::Ok, StepStatus::Error, StepStatus::ShortCircuit, StepStatus::Timeout];
        for status in all {
            assert_eq!(serde_json::to_value(status).unwrap(), json!(status.as_str()));
        }
    }

    #[test]
    fn result_serializes_final_response() {
        let result = RunResult { timeline: Vec::new(), response: ResponseSnapshot::default() };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["timeline"], json!([]));
        assert_eq!(value["final"]["statusCode"], 200);
        assert!(result.stopped_at().is_none());
    }
}
