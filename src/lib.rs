//! Event-driven task runner for Keptn lifecycle events.
//!
//! Envelopes arrive either pushed over HTTP (in-cluster) or pulled from
//! the control plane (remote execution plane). Both paths classify the
//! event, look up the registered task handler and hand it a context that
//! emits correlated `.started` / `.finished` replies.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod poller;
pub mod resources;
pub mod sender;
pub mod server;

pub use error::{Error, Result};
