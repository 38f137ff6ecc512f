/// HTTP API Layer
///
/// JSON endpoints of the chat gateway:
/// - Starting chat workflow instances and querying their state
/// - Relaying user-prompt, confirm and end-chat signals to running instances

// Start and query endpoints
pub mod workflows;

// Signal relay endpoints
pub mod signals;

use crate::error::ApiError;
use crate::runtime::engine::EngineClient;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    /// Engine client used for start, signal and query calls
    pub engine: Arc<EngineClient>,
    /// Task queue new instances are started on
    pub task_queue: String,
}

/// Parse a JSON request body, mapping any failure to a 400
///
/// Bodies are taken as raw strings so malformed input gets the plain-text
/// "Invalid JSON" response rather than axum's default rejection.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| {
        tracing::warn!("❌ Invalid JSON payload: {}", e);
        ApiError::InvalidJson
    })
}

// Re-export router builders
pub use signals::create_signal_routes;
pub use workflows::create_workflow_routes;
