//! Handler registry and envelope dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::ApiConnection;
use crate::error::{DispatchError, Result};
use crate::event::{Classification, CloudEvent, TaskData};
use crate::resources::ResourceClient;
use crate::sender::TaskContext;

/// User logic invoked when a registered lifecycle event arrives.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Handle one envelope. `ctx` is bound to the envelope's correlation
    /// identity; `data` is its validated payload.
    async fn handle(&self, ctx: &TaskContext, event: &CloudEvent, data: &TaskData) -> Result<()>;
}

/// Registry of task handlers, keyed by lifecycle identity such as
/// `deployment.triggered`.
///
/// Populated at startup, then owned by the [`Dispatcher`]. Identities keep
/// registration order; the polling loop visits task types in that order.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    order: Vec<String>,
}

impl TaskRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a lifecycle identity. The identity format is
    /// not validated; the last registration for an identity wins.
    pub fn on(&mut self, identity: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let identity = identity.into();
        if self.handlers.insert(identity.clone(), handler).is_some() {
            tracing::warn!(identity = %identity, "Replaced an existing handler");
        } else {
            self.order.push(identity.clone());
            tracing::debug!("Registered handler: {}", identity);
        }
    }

    /// Get the handler for an identity.
    pub fn get(&self, identity: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(identity).cloned()
    }

    /// All registered identities, in registration order.
    pub fn identities(&self) -> &[String] {
        &self.order
    }

    /// Identities of the triggering phase, in registration order. These
    /// are the event types the polling loop subscribes to.
    pub fn triggered_identities(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|identity| identity.ends_with(".triggered"))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// What [`Dispatcher::dispatch`] did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The registered handler ran to completion.
    Handled,
    /// A lifecycle event with no handler registered for its identity.
    NoHandler,
    /// Not a Keptn lifecycle event.
    Unrecognized,
}

/// Classifies inbound envelopes and routes them to their handlers.
///
/// Owns the registry and the API connection; both push and poll intake
/// paths funnel through [`Dispatcher::dispatch`].
pub struct Dispatcher {
    registry: TaskRegistry,
    connection: Arc<ApiConnection>,
    resources: Option<Arc<ResourceClient>>,
}

impl Dispatcher {
    pub fn new(registry: TaskRegistry, connection: Arc<ApiConnection>) -> Self {
        Self {
            registry,
            connection,
            resources: None,
        }
    }

    /// Attach a configuration service client, made available to handlers
    /// through their [`TaskContext`].
    pub fn with_resources(mut self, resources: Arc<ResourceClient>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn connection(&self) -> &Arc<ApiConnection> {
        &self.connection
    }

    /// Classify an envelope and invoke its registered handler, if any.
    ///
    /// The payload is validated before the handler runs; an envelope
    /// without project, service and stage never reaches a handler.
    /// Handler failures are surfaced as [`DispatchError::Handler`], not
    /// swallowed here.
    pub async fn dispatch(&self, event: &CloudEvent) -> Result<DispatchOutcome> {
        let Classification::Lifecycle { task, phase } = event.classify() else {
            tracing::warn!(
                id = %event.id,
                event_type = %event.event_type,
                "Not a recognized lifecycle event"
            );
            return Ok(DispatchOutcome::Unrecognized);
        };

        let identity = format!("{task}.{}", phase.suffix());
        let Some(handler) = self.registry.get(&identity) else {
            tracing::debug!(id = %event.id, identity = %identity, "No handler registered");
            return Ok(DispatchOutcome::NoHandler);
        };

        let data = event.task_data()?;

        tracing::info!(
            id = %event.id,
            identity = %identity,
            context = event.shkeptncontext.as_deref().unwrap_or("-"),
            "Dispatching event"
        );

        let ctx = TaskContext::bind(
            event,
            task,
            data.clone(),
            Arc::clone(&self.connection),
            self.resources.clone(),
        );
        handler
            .handle(&ctx, event, &data)
            .await
            .map_err(|source| DispatchError::Handler {
                identity,
                source: Box::new(source),
            })?;
        Ok(DispatchOutcome::Handled)
    }
}
