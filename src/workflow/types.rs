/// Core chat workflow type definitions
///
/// Identifiers, signals and the persisted snapshot of a running instance.
/// All of these are serialized as JSON both on the HTTP surface and in the
/// engine's SQLite store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of one workflow instance: workflow id plus run id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub workflow_id: String,
    pub run_id: String,
}

impl InstanceKey {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.run_id)
    }
}

/// The three named signal channels of a chat instance
///
/// Declaration order is the tie-break priority used by the signal router
/// when two pending signals carry the same sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    UserPrompt,
    Confirm,
    EndChat,
}

impl SignalKind {
    /// Signal channel name as used by callers of the engine
    pub fn channel_name(self) -> &'static str {
        match self {
            SignalKind::UserPrompt => "user_prompt",
            SignalKind::Confirm => "confirm",
            SignalKind::EndChat => "end_chat",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.channel_name())
    }
}

/// A delivered signal: which channel it arrived on and its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub message: String,
}

impl Signal {
    pub fn new(kind: SignalKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A signal waiting in the router, stamped with its arrival sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSignal {
    pub seq: u64,
    #[serde(flatten)]
    pub signal: Signal,
}

/// Lifecycle state of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Greeting done, waiting for signals
    Running,
    /// EndChat consumed; the current result is final
    Completed,
    /// The greeting activity failed; the instance never reached Waiting
    Failed,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(InstanceStatus::Running),
            "completed" => Some(InstanceStatus::Completed),
            "failed" => Some(InstanceStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, InstanceStatus::Running)
    }
}

/// Durable state of one instance, written after every state change
///
/// `version` increases with every router mutation; storage refuses to
/// replace a snapshot with an older one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub key: InstanceKey,
    pub task_queue: String,
    pub initial_message: String,
    pub current_result: String,
    pub status: InstanceStatus,
    pub pending: Vec<PendingSignal>,
    pub version: u64,
}

/// Query view of an instance, returned by the describe operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDescription {
    pub workflow_id: String,
    pub run_id: String,
    pub status: InstanceStatus,
    pub result: String,
    pub pending_signals: usize,
}

impl From<&InstanceSnapshot> for WorkflowDescription {
    fn from(snapshot: &InstanceSnapshot) -> Self {
        Self {
            workflow_id: snapshot.key.workflow_id.clone(),
            run_id: snapshot.key.run_id.clone(),
            status: snapshot.status,
            result: snapshot.current_result.clone(),
            pending_signals: snapshot.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_match_wire_names() {
        for kind in [SignalKind::UserPrompt, SignalKind::Confirm, SignalKind::EndChat] {
            let wire = serde_json::to_value(kind).unwrap();
            assert_eq!(wire, serde_json::Value::from(kind.channel_name()));
            assert_eq!(kind.to_string(), kind.channel_name());
        }
    }

    #[test]
    fn priority_follows_declaration_order() {
        assert!(SignalKind::UserPrompt < SignalKind::Confirm);
        assert!(SignalKind::Confirm < SignalKind::EndChat);
    }

    #[test]
    fn pending_signal_serializes_flat() {
        let pending = PendingSignal {
            seq: 7,
            signal: Signal::new(SignalKind::EndChat, "bye"),
        };
        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json, serde_json::json!({ "seq": 7, "kind": "end_chat", "message": "bye" }));
    }
}
