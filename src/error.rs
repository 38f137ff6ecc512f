/// Error taxonomy for the gateway, engine and activities
///
/// Startup errors (configuration, connection) are fatal. Everything that can
/// happen while serving a request is converted into a structured JSON
/// response by the API layer.

use crate::workflow::types::InstanceKey;
use thiserror::Error;

/// Invalid or missing environment configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidVar { name: &'static str, value: String },
}

/// Failure of a single activity attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActivityError {
    /// The activity ran and reported a business failure; not retried
    #[error("activity failed: {0}")]
    Failed(String),

    /// The activity implementation could not be reached; retried by the engine
    #[error("activity unavailable: {0}")]
    Unavailable(String),

    /// The attempt exceeded its start-to-close budget
    #[error("activity timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

/// Errors surfaced by the orchestration engine client
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unable to connect to engine: {0}")]
    Connection(String),

    #[error("workflow {0} is already running")]
    AlreadyStarted(String),

    #[error("workflow not found: {0}")]
    InstanceNotFound(String),

    #[error("workflow {0} is still starting")]
    InstanceStarting(InstanceKey),

    #[error("workflow {0} has already terminated")]
    InstanceTerminated(InstanceKey),

    #[error("no worker registered on task queue {0:?}")]
    NoWorker(String),

    #[error("workflow {key} failed: {source}")]
    Activity {
        key: InstanceKey,
        #[source]
        source: ActivityError,
    },

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("engine is shutting down")]
    Shutdown,
}

impl EngineError {
    /// Stable machine-readable code carried in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InstanceNotFound(_) => "instance_not_found",
            EngineError::InstanceStarting(_) => "instance_starting",
            EngineError::InstanceTerminated(_) => "instance_terminated",
            EngineError::AlreadyStarted(_) => "already_started",
            _ => "engine_error",
        }
    }
}

/// Request rejected at the gateway boundary before reaching the engine
///
/// Rendered as a plain-text 400, matching what HTTP clients of the chat
/// gateway already expect.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("{0} is required")]
    MissingField(&'static str),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (axum::http::StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}
