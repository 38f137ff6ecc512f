/// Server setup and initialization
///
/// Wires together the engine client, the chat worker and the HTTP routes,
/// and owns the process lifecycle: connect on startup, serve until Ctrl-C,
/// then close the engine client after the last request has drained.

use crate::{
    api::{create_signal_routes, create_workflow_routes, AppState},
    config::Config,
    runtime::{activity::GreetActivity, engine::EngineClient},
};
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Initialize the tracing subscriber; `RUST_LOG` overrides the default `info`
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

/// Create the Axum application with all routes
pub fn create_app(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        // Start and query endpoints
        .merge(create_workflow_routes())
        // Signal relay endpoints
        .merge(create_signal_routes())
        .with_state(state)
}

/// Connect the engine client and register the chat worker on the task queue
pub async fn connect_engine(config: &Config) -> Result<Arc<EngineClient>> {
    let engine = EngineClient::connect(&config.engine).await?;
    engine
        .start_worker(&config.engine.task_queue, Arc::new(GreetActivity))
        .await?;
    Ok(Arc::new(engine))
}

/// Start the HTTP server with the given configuration
///
/// Engine connection failures are returned before the listener is bound.
pub async fn start_server(config: Config) -> Result<()> {
    tracing::info!("Starting chatway gateway...");

    let engine = connect_engine(&config).await?;
    tracing::info!(
        "✅ Engine ready (namespace '{}', {} instances resumed)",
        engine.namespace(),
        engine.live_instances()
    );

    let app = create_app(AppState {
        engine: Arc::clone(&engine),
        task_queue: config.engine.task_queue.clone(),
    });

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Starting API server on http://{}", bind_addr);

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Close the engine even when the server stopped with an error.
    engine.shutdown().await;
    served?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining requests");
}

/// Health check endpoint handler
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
