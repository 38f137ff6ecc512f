use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chatway::api::signals::SignalResponse;
use chatway::api::workflows::ChatResponse;
use chatway::api::AppState;
use chatway::config::Config;
use chatway::server::{connect_engine, create_app};
use chatway::{EngineClient, WorkflowDescription};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn test_app() -> (Router, Arc<EngineClient>) {
    let data_dir = std::env::temp_dir().join(format!("chatway-http-{}", uuid::Uuid::new_v4()));
    let data_dir = data_dir.to_string_lossy().into_owned();
    let config = Config::from_lookup(|key| match key {
        "TEMPORAL_API_KEY" => Some("test-key".to_string()),
        "CHATWAY_DATA_DIR" => Some(data_dir.clone()),
        _ => None,
    })
    .unwrap();

    let engine = connect_engine(&config).await.unwrap();
    let app = create_app(AppState {
        engine: Arc::clone(&engine),
        task_queue: config.engine.task_queue.clone(),
    });
    (app, engine)
}

async fn post(app: &Router, uri: &str, body: impl Into<Body>) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn signal(app: &Router, route: &str, workflow_id: &str, run_id: &str, message: &str) -> (StatusCode, SignalResponse) {
    let body = json!({ "workflow_id": workflow_id, "run_id": run_id, "message": message }).to_string();
    let (status, bytes) = post(app, route, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn wait_for_result(app: &Router, workflow_id: &str, expected: &str) -> WorkflowDescription {
    for _ in 0..200 {
        let (status, bytes) = get(app, &format!("/workflows/{}", workflow_id)).await;
        assert_eq!(status, StatusCode::OK);
        let description: WorkflowDescription = serde_json::from_slice(&bytes).unwrap();
        if description.result == expected {
            return description;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("workflow {} never reached {:?}", workflow_id, expected);
}

#[tokio::test]
async fn health_reports_healthy() {
    let (app, engine) = test_app().await;
    let (status, bytes) = get(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap(), json!({ "status": "healthy" }));
    engine.shutdown().await;
}

#[tokio::test]
async fn chat_from_greeting_to_end() {
    let (app, engine) = test_app().await;

    let (status, bytes) = post(&app, "/start-workflow", json!({ "message": "Hello World" }).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    let started: ChatResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(started.workflow_id.starts_with("chat-workflow-"));
    assert!(!started.run_id.is_empty());
    assert_eq!(started.result.as_deref(), Some("Hello, Hello World!"));
    assert_eq!(started.error, None);

    let (status, response) = signal(&app, "/signal/user-prompt", &started.workflow_id, &started.run_id, "What's the weather?").await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.success);
    wait_for_result(&app, &started.workflow_id, "Hello, What's the weather?!").await;

    // Same confirmation twice gives the same deterministic output.
    for _ in 0..2 {
        let (status, _) = signal(&app, "/signal/confirm", &started.workflow_id, "", "yes").await;
        assert_eq!(status, StatusCode::OK);
    }
    wait_for_result(&app, &started.workflow_id, "Hello, Confirmed: yes!").await;

    let (status, response) = signal(&app, "/signal/end-chat", &started.workflow_id, &started.run_id, "Goodbye").await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.success);
    let finished = wait_for_result(&app, &started.workflow_id, "Chat ended: Goodbye").await;
    assert_eq!(finished.status, chatway::InstanceStatus::Completed);

    let (status, response) = signal(&app, "/signal/user-prompt", &started.workflow_id, &started.run_id, "hello?").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!response.success);
    assert_eq!(response.code.as_deref(), Some("instance_terminated"));

    engine.shutdown().await;
}

#[tokio::test]
async fn unknown_workflow_is_distinct_from_terminated() {
    let (app, engine) = test_app().await;

    let (status, response) = signal(&app, "/signal/confirm", "chat-workflow-0", "", "yes").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!response.success);
    assert_eq!(response.code.as_deref(), Some("instance_not_found"));
    assert!(response.error.is_some());

    let (status, _) = get(&app, "/workflows/chat-workflow-0").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    engine.shutdown().await;
}

#[tokio::test]
async fn malformed_requests_are_rejected_with_400() {
    let (app, engine) = test_app().await;

    let (status, body) = post(&app, "/start-workflow", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "Invalid JSON");

    let (status, body) = post(&app, "/start-workflow", json!({ "message": "" }).to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "Message is required");

    let (status, body) = post(&app, "/signal/end-chat", json!({ "message": "bye" }).to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "WorkflowID is required");

    engine.shutdown().await;
}
