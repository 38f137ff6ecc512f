/// Runtime Execution Engine
///
/// This module runs chat workflow instances:
/// - Signal routing with fair cross-channel ordering
/// - The per-instance chat control loop
/// - Activity invocation with time budgets and retries
/// - The engine client used by the gateway

// Fair multi-channel signal wait
pub mod router;

// Activity trait, Greet activity and invoker
pub mod activity;

// Chat control loop state machine
pub mod chat;

// Engine client: start, signal, query, recovery, shutdown
pub mod engine;

// Re-export main types
pub use activity::{Activity, ActivityInvoker, ActivityOptions, GreetActivity, RetryPolicy};
pub use chat::{ChatLoop, LoopOutcome};
pub use engine::{EngineClient, StartedWorkflow};
pub use router::SignalRouter;
