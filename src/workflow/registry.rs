/// Lock-free registry of live workflow instances using ArcSwap
///
/// Signal delivery reads the registry on every request, while writes only
/// happen when an instance starts or finishes. Each write swaps the whole
/// map, so readers never block on a lock.

use crate::error::EngineError;
use crate::runtime::router::SignalRouter;
use crate::workflow::types::{InstanceKey, InstanceStatus, WorkflowDescription};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::watch;

/// Observable progress of an instance, published by its control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceProgress {
    pub current_result: String,
    pub status: InstanceStatus,
}

/// Everything the engine needs to reach a live instance
#[derive(Debug)]
pub struct InstanceHandle {
    pub key: InstanceKey,
    pub task_queue: String,
    /// Sole entry point for signals into the instance
    pub router: Arc<SignalRouter>,
    /// Latest result published by the control loop
    pub progress: watch::Receiver<InstanceProgress>,
}

impl InstanceHandle {
    /// Query view built from live state
    pub fn describe(&self) -> WorkflowDescription {
        let progress = self.progress.borrow().clone();
        WorkflowDescription {
            workflow_id: self.key.workflow_id.clone(),
            run_id: self.key.run_id.clone(),
            status: progress.status,
            result: progress.current_result,
            pending_signals: self.router.snapshot().pending.len(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RegistryMap {
    /// Key: (workflow_id, run_id)
    by_key: HashMap<InstanceKey, Arc<InstanceHandle>>,
    /// Key: workflow_id, Value: the live run of that workflow id
    running: HashMap<String, InstanceKey>,
}

/// Live instances keyed by workflow id and run id
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: ArcSwap<RegistryMap>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new instance
    ///
    /// At most one live run may exist per workflow id.
    pub fn try_insert(&self, handle: Arc<InstanceHandle>) -> Result<(), EngineError> {
        let mut rejected = false;
        self.instances.rcu(|current| {
            rejected = current.running.contains_key(&handle.key.workflow_id);
            if rejected {
                return Arc::clone(current);
            }

            let mut next = (**current).clone();
            next.running
                .insert(handle.key.workflow_id.clone(), handle.key.clone());
            next.by_key.insert(handle.key.clone(), Arc::clone(&handle));
            Arc::new(next)
        });

        if rejected {
            return Err(EngineError::AlreadyStarted(handle.key.workflow_id.clone()));
        }

        tracing::debug!("Registered instance: {}", handle.key);
        Ok(())
    }

    /// Get a live instance by its full key
    pub fn get(&self, key: &InstanceKey) -> Option<Arc<InstanceHandle>> {
        self.instances.load().by_key.get(key).cloned()
    }

    /// Get the live run of a workflow id
    pub fn latest(&self, workflow_id: &str) -> Option<Arc<InstanceHandle>> {
        let map = self.instances.load();
        map.running
            .get(workflow_id)
            .and_then(|key| map.by_key.get(key))
            .cloned()
    }

    /// Drop a finished instance from the registry
    pub fn remove(&self, key: &InstanceKey) {
        self.instances.rcu(|current| {
            let mut next = (**current).clone();
            next.by_key.remove(key);
            if next.running.get(&key.workflow_id) == Some(key) {
                next.running.remove(&key.workflow_id);
            }
            next
        });
        tracing::debug!("Removed instance from registry: {}", key);
    }

    pub fn len(&self) -> usize {
        self.instances.load().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
