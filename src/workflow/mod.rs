/// Workflow Instance Layer
///
/// This module holds what the engine knows about chat instances:
/// - Type definitions (InstanceKey, Signal, snapshots)
/// - SQLite persistence of instance snapshots with sqlx
/// - Lock-free registry of live instances using ArcSwap

// Core type definitions
pub mod types;

// SQLite persistence layer for instance snapshots
pub mod storage;

// Live instance registry using ArcSwap
pub mod registry;

// Re-export commonly used types
pub use types::{InstanceKey, InstanceStatus, Signal, SignalKind, WorkflowDescription};
