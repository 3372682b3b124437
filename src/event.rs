//! CloudEvents envelope model and lifecycle classification.
//!
//! Every event on the wire is a structured CloudEvent. Keptn lifecycle
//! events carry a `sh.keptn.event.<task>.<phase>` type plus correlation
//! extensions (`shkeptncontext`, `triggeredid`) that replies must echo.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::EventError;

/// CloudEvents `source` stamped on envelopes emitted by this runner.
pub const SERVICE_NAME: &str = "keptn-runner";

/// Namespace prefix shared by every Keptn lifecycle event type.
pub const EVENT_TYPE_PREFIX: &str = "sh.keptn.event.";

/// Keptn spec version stamped on outgoing envelopes.
pub const KEPTN_SPEC_VERSION: &str = "0.2.1";

/// Content type for structured CloudEvents over HTTP.
pub const CLOUDEVENTS_CONTENT_TYPE: &str = "application/cloudevents+json";

/// Lifecycle phase carried by the event type suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Triggered,
    Started,
    Finished,
    StatusChanged,
}

impl TaskPhase {
    /// Fixed matching order for classification.
    const ALL: [TaskPhase; 4] = [
        TaskPhase::Triggered,
        TaskPhase::Started,
        TaskPhase::Finished,
        TaskPhase::StatusChanged,
    ];

    /// Wire suffix without the leading dot.
    pub fn suffix(&self) -> &'static str {
        match self {
            TaskPhase::Triggered => "triggered",
            TaskPhase::Started => "started",
            TaskPhase::Finished => "finished",
            TaskPhase::StatusChanged => "status.changed",
        }
    }

    fn dotted_suffix(&self) -> &'static str {
        match self {
            TaskPhase::Triggered => ".triggered",
            TaskPhase::Started => ".started",
            TaskPhase::Finished => ".finished",
            TaskPhase::StatusChanged => ".status.changed",
        }
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Outcome category reported on finished and status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    #[default]
    Pass,
    Warning,
    Fail,
}

impl TaskResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskResult::Pass => "pass",
            TaskResult::Warning => "warning",
            TaskResult::Fail => "fail",
        }
    }
}

/// Execution status reported on finished and status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Succeeded,
    Errored,
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Errored => "errored",
            TaskStatus::Unknown => "unknown",
        }
    }
}

/// What classification concluded about an event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A Keptn lifecycle event for the named task.
    Lifecycle { task: String, phase: TaskPhase },
    /// Outside the Keptn namespace, or no known phase suffix.
    Unrecognized,
}

/// Classify a raw event type string.
///
/// The type must start with [`EVENT_TYPE_PREFIX`] and end with one of the
/// four phase suffixes, with a non-empty task name in between. Anything
/// else is [`Classification::Unrecognized`].
pub fn classify_type(event_type: &str) -> Classification {
    let Some(rest) = event_type.strip_prefix(EVENT_TYPE_PREFIX) else {
        return Classification::Unrecognized;
    };
    for phase in TaskPhase::ALL {
        if let Some(task) = rest.strip_suffix(phase.dotted_suffix()) {
            if task.is_empty() {
                return Classification::Unrecognized;
            }
            return Classification::Lifecycle {
                task: task.to_string(),
                phase,
            };
        }
    }
    Classification::Unrecognized
}

/// Required identity fields of a dispatchable envelope, plus whatever
/// task-specific payload rode along with them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskData {
    pub project: String,
    pub service: String,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A structured CloudEvent envelope with the Keptn extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEvent {
    pub id: String,
    #[serde(rename = "specversion")]
    pub spec_version: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(
        rename = "datacontenttype",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub data_content_type: Option<String>,
    /// Correlation id tying all events of one task sequence together.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shkeptncontext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shkeptnspecversion: Option<String>,
    /// Id of the `.triggered` event this envelope replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggeredid: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl CloudEvent {
    /// Mint an outgoing envelope of the given type with this runner as
    /// source and a fresh id.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            spec_version: "1.0".to_string(),
            source: SERVICE_NAME.to_string(),
            event_type: event_type.into(),
            time: Some(Utc::now()),
            data_content_type: Some("application/json".to_string()),
            shkeptncontext: None,
            shkeptnspecversion: Some(KEPTN_SPEC_VERSION.to_string()),
            triggeredid: None,
            data,
        }
    }

    /// Parse a structured envelope from raw bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::Malformed(e.to_string()))
    }

    /// Classify this envelope's type. Pure; no payload inspection.
    pub fn classify(&self) -> Classification {
        classify_type(&self.event_type)
    }

    /// Id that replies bind as their `triggeredid`: the envelope's own
    /// `triggeredid` extension when present, otherwise its `id`.
    pub fn trigger_id(&self) -> &str {
        self.triggeredid.as_deref().unwrap_or(&self.id)
    }

    /// Extract and validate the task payload. Fails when `data` is not an
    /// object or lacks any of project, service and stage.
    pub fn task_data(&self) -> Result<TaskData, EventError> {
        serde_json::from_value(self.data.clone()).map_err(|e| EventError::InvalidPayload {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event_type: &str, data: Value) -> CloudEvent {
        CloudEvent {
            id: "e1".to_string(),
            spec_version: "1.0".to_string(),
            source: "shipyard-controller".to_string(),
            event_type: event_type.to_string(),
            time: None,
            data_content_type: Some("application/json".to_string()),
            shkeptncontext: Some("ctx1".to_string()),
            shkeptnspecversion: Some(KEPTN_SPEC_VERSION.to_string()),
            triggeredid: None,
            data,
        }
    }

    #[test]
    fn classifies_each_phase_suffix() {
        for (raw, phase) in [
            ("sh.keptn.event.deployment.triggered", TaskPhase::Triggered),
            ("sh.keptn.event.deployment.started", TaskPhase::Started),
            ("sh.keptn.event.deployment.finished", TaskPhase::Finished),
            (
                "sh.keptn.event.deployment.status.changed",
                TaskPhase::StatusChanged,
            ),
        ] {
            assert_eq!(
                classify_type(raw),
                Classification::Lifecycle {
                    task: "deployment".to_string(),
                    phase,
                },
                "type {raw}"
            );
        }
    }

    #[test]
    fn task_name_keeps_interior_dots() {
        assert_eq!(
            classify_type("sh.keptn.event.release.rollback.triggered"),
            Classification::Lifecycle {
                task: "release.rollback".to_string(),
                phase: TaskPhase::Triggered,
            }
        );
    }

    #[test]
    fn rejects_foreign_namespace() {
        assert_eq!(
            classify_type("com.example.deployment.triggered"),
            Classification::Unrecognized
        );
    }

    #[test]
    fn rejects_unknown_suffix() {
        assert_eq!(
            classify_type("sh.keptn.event.deployment.aborted"),
            Classification::Unrecognized
        );
    }

    #[test]
    fn rejects_empty_task_name() {
        assert_eq!(
            classify_type("sh.keptn.event.triggered"),
            Classification::Unrecognized
        );
        assert_eq!(
            classify_type("sh.keptn.event..triggered"),
            Classification::Unrecognized
        );
    }

    #[test]
    fn trigger_id_prefers_the_extension() {
        let mut event = envelope("sh.keptn.event.deployment.triggered", json!({}));
        assert_eq!(event.trigger_id(), "e1");
        event.triggeredid = Some("t1".to_string());
        assert_eq!(event.trigger_id(), "t1");
    }

    #[test]
    fn task_data_requires_identity_fields() {
        let event = envelope(
            "sh.keptn.event.deployment.triggered",
            json!({"project": "p", "service": "s"}),
        );
        let err = event.task_data().unwrap_err();
        assert!(err.to_string().contains("stage"), "unexpected error: {err}");
    }

    #[test]
    fn task_data_keeps_labels_and_extra_fields() {
        let event = envelope(
            "sh.keptn.event.deployment.triggered",
            json!({
                "project": "p",
                "service": "s",
                "stage": "st",
                "labels": {"build": "42"},
                "deployment": {"strategy": "blue_green"}
            }),
        );
        let data = event.task_data().unwrap();
        assert_eq!(data.project, "p");
        assert_eq!(
            data.labels.as_ref().and_then(|l| l.get("build")),
            Some(&json!("42"))
        );
        assert_eq!(data.extra["deployment"]["strategy"], json!("blue_green"));
    }

    #[test]
    fn task_data_rejects_non_object_payload() {
        let event = envelope("sh.keptn.event.deployment.triggered", json!("nope"));
        assert!(event.task_data().is_err());
    }

    #[test]
    fn outgoing_envelope_carries_runner_identity() {
        let event = CloudEvent::new("sh.keptn.event.deployment.started", json!({}));
        assert_eq!(event.source, SERVICE_NAME);
        assert_eq!(event.spec_version, "1.0");
        assert_eq!(event.shkeptnspecversion.as_deref(), Some(KEPTN_SPEC_VERSION));
        assert!(event.time.is_some());
        assert!(!event.id.is_empty());
    }

    #[test]
    fn wire_format_uses_cloudevents_attribute_names() {
        let event = CloudEvent::new("sh.keptn.event.deployment.started", json!({"project": "p"}));
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["specversion"], json!("1.0"));
        assert_eq!(wire["type"], json!("sh.keptn.event.deployment.started"));
        assert_eq!(wire["datacontenttype"], json!("application/json"));
        // Unset extensions stay off the wire entirely.
        assert!(wire.get("triggeredid").is_none());
        assert!(wire.get("shkeptncontext").is_none());
    }

    #[test]
    fn parses_a_structured_envelope_from_bytes() {
        let raw = br#"{
            "id": "e1",
            "specversion": "1.0",
            "source": "shipyard-controller",
            "type": "sh.keptn.event.deployment.triggered",
            "shkeptncontext": "ctx1",
            "triggeredid": "t1",
            "data": {"project": "p", "service": "s", "stage": "st"}
        }"#;
        let event = CloudEvent::from_json(raw).unwrap();
        assert_eq!(event.id, "e1");
        assert_eq!(event.shkeptncontext.as_deref(), Some("ctx1"));
        assert_eq!(event.trigger_id(), "t1");
        assert!(event.task_data().is_ok());
    }

    #[test]
    fn rejects_bytes_that_are_not_an_envelope() {
        assert!(CloudEvent::from_json(b"not json").is_err());
        assert!(CloudEvent::from_json(b"[1, 2, 3]").is_err());
    }
}
