/// chatway: durable chat workflow orchestration
///
/// An HTTP gateway starts long-lived chat workflow instances and relays
/// user-prompt, confirm and end-chat signals into them. Each instance is a
/// single-task control loop fed by a fair signal router and checkpointed to
/// SQLite by the embedded engine.

// Environment configuration
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// Instance data model, snapshot storage and live-instance registry
pub mod workflow;

// Signal router, control loop, activities and the engine client
pub mod runtime;

// HTTP API layer - start, signal and query endpoints
pub mod api;

// Server setup and lifecycle
pub mod server;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use error::{ActivityError, ApiError, ConfigError, EngineError};
pub use runtime::{EngineClient, StartedWorkflow};
pub use server::start_server;
pub use workflow::{InstanceKey, InstanceStatus, Signal, SignalKind, WorkflowDescription};
