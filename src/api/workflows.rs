/// Workflow start and query endpoints
///
/// POST /start-workflow runs the greeting synchronously and returns its
/// result together with the new instance's ids.

use crate::api::{parse_body, AppState};
use crate::error::{ApiError, EngineError};
use crate::workflow::types::WorkflowDescription;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

/// Request body for /start-workflow
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

/// Response from /start-workflow
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatResponse {
    pub workflow_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Query string for GET /workflows/{workflow_id}
#[derive(Debug, Deserialize)]
pub struct DescribeQuery {
    pub run_id: Option<String>,
}

/// Create workflow start and query routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/start-workflow", post(start_workflow))
        .route("/workflows/{workflow_id}", get(describe_workflow))
}

/// Identifier for a new chat instance
pub fn new_workflow_id() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("chat-workflow-{}", nanos)
}

/// Start a new chat workflow
///
/// POST /start-workflow
/// Body: { "message": "Hello World" }
/// Returns: { "workflow_id": "...", "run_id": "...", "result": "Hello, Hello World!" }
async fn start_workflow(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    let request: ChatRequest = parse_body(&body)?;
    if request.message.is_empty() {
        return Err(ApiError::MissingField("Message"));
    }

    let workflow_id = new_workflow_id();
    let response = match state
        .engine
        .start_workflow(&state.task_queue, &workflow_id, &request.message)
        .await
    {
        Ok(started) => {
            tracing::info!(
                "✅ Workflow {} greeted: {}",
                started.workflow_id,
                started.result
            );
            Json(ChatResponse {
                workflow_id: started.workflow_id,
                run_id: started.run_id,
                result: Some(started.result),
                error: None,
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!("Unable to execute workflow: {}", e);
            let (workflow_id, run_id) = match &e {
                EngineError::Activity { key, .. } => (key.workflow_id.clone(), key.run_id.clone()),
                _ => (String::new(), String::new()),
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ChatResponse {
                    workflow_id,
                    run_id,
                    result: None,
                    error: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    };

    Ok(response)
}

/// Query the current state of a workflow
///
/// GET /workflows/{workflow_id}?run_id=...
/// Returns: { "workflow_id", "run_id", "status", "result", "pending_signals" }
async fn describe_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Query(query): Query<DescribeQuery>,
) -> Result<Json<WorkflowDescription>, (StatusCode, Json<serde_json::Value>)> {
    match state
        .engine
        .describe_workflow(&workflow_id, query.run_id.as_deref())
        .await
    {
        Ok(description) => Ok(Json(description)),
        Err(e) => {
            let status = match e {
                EngineError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
                _ => {
                    tracing::error!("Failed to describe workflow {}: {}", workflow_id, e);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            Err((status, Json(serde_json::json!({ "error": e.to_string(), "code": e.code() }))))
        }
    }
}
