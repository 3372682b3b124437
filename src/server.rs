//! HTTP intake for pushed CloudEvents.
//!
//! In-cluster deployments receive events as POSTs from the distribution
//! sidecar. The body is read as raw bytes because senders use the
//! `application/cloudevents+json` content type, which `Json` extractors
//! reject.

use std::sync::Arc;

use axum::{Router, body::Bytes, extract::State, http::StatusCode, routing::post};
use tracing::{debug, error, warn};

use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::event::CloudEvent;

/// Shared state for the intake route.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the intake router. `path` must start with `/`.
pub fn event_routes(path: &str, dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route(path, post(receive_event))
        .with_state(AppState { dispatcher })
}

/// POST handler: parse, dispatch, `204` on success.
///
/// Bodies that are not a structured CloudEvent or that fail payload
/// validation are the sender's fault (`400`); a failing handler is ours
/// (`500`).
async fn receive_event(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let event = match CloudEvent::from_json(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Rejected event intake body");
            return StatusCode::BAD_REQUEST;
        }
    };

    match state.dispatcher.dispatch(&event).await {
        Ok(outcome) => {
            debug!(id = %event.id, outcome = ?outcome, "Event accepted");
            StatusCode::NO_CONTENT
        }
        Err(Error::Event(e)) => {
            warn!(id = %event.id, error = %e, "Rejected event payload");
            StatusCode::BAD_REQUEST
        }
        Err(e) => {
            error!(id = %event.id, error = %e, "Event handler failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
