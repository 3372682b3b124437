//! Error types for the runner.

/// Top-level error type for the runner.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised while parsing or validating event envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Body is not a structured CloudEvent: {0}")]
    Malformed(String),

    #[error("Event {id} has an invalid payload: {reason}")]
    InvalidPayload { id: String, reason: String },
}

/// Errors on the event API connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {path} failed: {reason}")]
    Request { path: String, reason: String },

    #[error("Request to {path} returned {status}: {body}")]
    Status { path: String, status: u16, body: String },

    #[error("Response from {path} could not be decoded: {reason}")]
    Decode { path: String, reason: String },

    #[error("Health check against {base} failed: {reason}")]
    HealthCheckFailed { base: String, reason: String },
}

/// Errors raised while routing an envelope to its handler.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Handler for {identity} failed: {source}")]
    Handler {
        identity: String,
        #[source]
        source: Box<Error>,
    },
}

/// Configuration service resource errors.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("No configuration service endpoint is configured")]
    NotConfigured,

    #[error("Resource request to {path} failed: {reason}")]
    Request { path: String, reason: String },

    #[error("Resource request to {path} returned {status}")]
    Status { path: String, status: u16 },

    #[error("Resource content from {path} could not be decoded: {reason}")]
    Decode { path: String, reason: String },
}

/// Result type alias for the runner.
pub type Result<T> = std::result::Result<T, Error>;
