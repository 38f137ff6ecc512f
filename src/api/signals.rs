/// Signal relay endpoints
///
/// Each route forwards one named signal to a running chat instance. Engine
/// errors keep the `{ "success": false, "error": ... }` shape and add a
/// `code` so callers can tell a missing instance from a finished one.

use crate::api::{parse_body, AppState};
use crate::error::ApiError;
use crate::workflow::types::SignalKind;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};

/// Request body shared by all signal endpoints
#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Response from signal endpoints
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Create signal routes
pub fn create_signal_routes() -> Router<AppState> {
    Router::new()
        .route("/signal/user-prompt", post(user_prompt))
        .route("/signal/confirm", post(confirm))
        .route("/signal/end-chat", post(end_chat))
}

/// POST /signal/user-prompt
async fn user_prompt(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    send_signal(&state, SignalKind::UserPrompt, &body).await
}

/// POST /signal/confirm
async fn confirm(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    send_signal(&state, SignalKind::Confirm, &body).await
}

/// POST /signal/end-chat
async fn end_chat(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    send_signal(&state, SignalKind::EndChat, &body).await
}

async fn send_signal(state: &AppState, kind: SignalKind, body: &str) -> Result<Response, ApiError> {
    let request: SignalRequest = parse_body(body)?;
    if request.workflow_id.is_empty() {
        return Err(ApiError::MissingField("WorkflowID"));
    }

    let outcome = state
        .engine
        .signal_workflow(&request.workflow_id, request.run_id.as_deref(), kind, &request.message)
        .await;

    let response = match outcome {
        Ok(()) => Json(SignalResponse {
            success: true,
            error: None,
            code: None,
        })
        .into_response(),
        Err(e) => {
            tracing::error!("Error sending {} signal: {}", kind, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SignalResponse {
                    success: false,
                    error: Some(e.to_string()),
                    code: Some(e.code().to_string()),
                }),
            )
                .into_response()
        }
    };

    Ok(response)
}
