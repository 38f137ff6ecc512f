/// chatway: durable chat workflow orchestration
///
/// Main entry point. Loads an optional `.env` file and configuration from
/// the environment, connects the embedded engine, and serves the gateway:
/// - POST /start-workflow
/// - POST /signal/{user-prompt,confirm,end-chat}
/// - GET /workflows/{workflow_id}
/// - GET /health

use chatway::{config::{self, Config}, server};
use std::path::Path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    server::init_tracing();

    config::load_env_file(Path::new(".env"));

    // Missing credentials or an unreachable engine end the process here.
    let config = Config::from_env().map_err(|e| {
        tracing::error!("{}", e);
        e
    })?;

    server::start_server(config).await.map_err(|e| {
        tracing::error!("Server stopped: {:#}", e);
        e
    })
}
