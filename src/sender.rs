//! Correlated lifecycle replies for one triggering envelope.
//!
//! A [`TaskContext`] is bound by the dispatcher to a single inbound event
//! and handed to the handler. Every follow-up it emits echoes the bound
//! `shkeptncontext` and `triggeredid`, and re-stamps the bound project,
//! service and stage over whatever payload the handler supplies.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::api::ApiConnection;
use crate::error::{ResourceError, TransportError};
use crate::event::{CloudEvent, EVENT_TYPE_PREFIX, TaskData, TaskPhase, TaskResult, TaskStatus};
use crate::resources::ResourceClient;

/// Optional fields attached to an outgoing lifecycle reply.
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    data: Option<Value>,
    message: Option<String>,
    result: TaskResult,
    status: TaskStatus,
}

impl TaskOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task-specific payload merged under the identity fields. Must be a
    /// JSON object; anything else is dropped with a warning.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_result(mut self, result: TaskResult) -> Self {
        self.result = result;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

/// Correlation identity and transports for one dispatched envelope.
pub struct TaskContext {
    task: String,
    context: Option<String>,
    trigger_id: String,
    data: TaskData,
    connection: Arc<ApiConnection>,
    resources: Option<Arc<ResourceClient>>,
}

impl TaskContext {
    pub(crate) fn bind(
        event: &CloudEvent,
        task: String,
        data: TaskData,
        connection: Arc<ApiConnection>,
        resources: Option<Arc<ResourceClient>>,
    ) -> Self {
        Self {
            task,
            context: event.shkeptncontext.clone(),
            trigger_id: event.trigger_id().to_string(),
            data,
            connection,
            resources,
        }
    }

    /// Task name parsed from the triggering event type.
    pub fn task(&self) -> &str {
        &self.task
    }

    /// The `shkeptncontext` all replies carry, when the trigger had one.
    pub fn keptn_context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// The `triggeredid` all replies carry.
    pub fn trigger_id(&self) -> &str {
        &self.trigger_id
    }

    /// Validated payload of the triggering envelope.
    pub fn data(&self) -> &TaskData {
        &self.data
    }

    fn resources(&self) -> Result<&ResourceClient, ResourceError> {
        self.resources.as_deref().ok_or(ResourceError::NotConfigured)
    }

    /// Fetch a project-scoped resource for the bound project.
    pub async fn get_project_resource(
        &self,
        resource_name: &str,
    ) -> Result<Option<Vec<u8>>, ResourceError> {
        self.resources()?
            .project_resource(&self.data.project, resource_name)
            .await
    }

    /// Fetch a stage-scoped resource for the bound project and stage.
    pub async fn get_stage_resource(
        &self,
        resource_name: &str,
    ) -> Result<Option<Vec<u8>>, ResourceError> {
        self.resources()?
            .stage_resource(&self.data.project, &self.data.stage, resource_name)
            .await
    }

    /// Fetch a service-scoped resource for the bound project, stage and
    /// service.
    pub async fn get_service_resource(
        &self,
        resource_name: &str,
    ) -> Result<Option<Vec<u8>>, ResourceError> {
        self.resources()?
            .service_resource(
                &self.data.project,
                &self.data.stage,
                &self.data.service,
                resource_name,
            )
            .await
    }

    /// Emit the `.started` reply for the bound task.
    pub async fn send_started(&self, outcome: TaskOutcome) -> Result<(), TransportError> {
        self.send(TaskPhase::Started, outcome).await
    }

    /// Emit the `.finished` reply for the bound task.
    pub async fn send_finished(&self, outcome: TaskOutcome) -> Result<(), TransportError> {
        self.send(TaskPhase::Finished, outcome).await
    }

    /// Emit a `.status.changed` event for the bound task.
    pub async fn send_status_changed(&self, outcome: TaskOutcome) -> Result<(), TransportError> {
        self.send(TaskPhase::StatusChanged, outcome).await
    }

    async fn send(&self, phase: TaskPhase, outcome: TaskOutcome) -> Result<(), TransportError> {
        let event = self.build_event(phase, outcome);
        match self.connection.post_event(&event).await {
            Ok(()) => {
                debug!(id = %event.id, event_type = %event.event_type, "Lifecycle event delivered");
                Ok(())
            }
            Err(e) => {
                warn!(event_type = %event.event_type, error = %e, "Failed to deliver lifecycle event");
                Err(e)
            }
        }
    }

    /// Merge order: handler data first, then the bound identity fields and
    /// labels, then result, status and message.
    fn build_event(&self, phase: TaskPhase, outcome: TaskOutcome) -> CloudEvent {
        let mut data = match outcome.data {
            Some(Value::Object(map)) => map,
            Some(other) => {
                warn!(
                    task = %self.task,
                    "Ignoring non-object outcome data ({})",
                    value_kind(&other)
                );
                Map::new()
            }
            None => Map::new(),
        };

        data.insert("project".to_string(), Value::String(self.data.project.clone()));
        data.insert("service".to_string(), Value::String(self.data.service.clone()));
        data.insert("stage".to_string(), Value::String(self.data.stage.clone()));
        if let Some(labels) = &self.data.labels {
            data.insert("labels".to_string(), Value::Object(labels.clone()));
        }
        data.insert(
            "result".to_string(),
            Value::String(outcome.result.as_str().to_string()),
        );
        data.insert(
            "status".to_string(),
            Value::String(outcome.status.as_str().to_string()),
        );
        if let Some(message) = outcome.message {
            data.insert("message".to_string(), Value::String(message));
        }

        let event_type = format!("{EVENT_TYPE_PREFIX}{}.{}", self.task, phase.suffix());
        let mut event = CloudEvent::new(event_type, Value::Object(data));
        event.shkeptncontext = self.context.clone();
        event.triggeredid = Some(self.trigger_id.clone());
        event
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
