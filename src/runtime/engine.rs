/// Embedded orchestration engine
///
/// Plays the part of the durable-execution service: it accepts start,
/// signal and query calls from the gateway, runs one control loop task per
/// instance, and checkpoints every instance to SQLite so running chats are
/// resumed when a worker comes back up.
///
/// The client is constructed once at startup, shared by `Arc`, and must be
/// closed with [`EngineClient::shutdown`] after the HTTP server stops.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::runtime::activity::{Activity, ActivityInvoker, ActivityOptions};
use crate::runtime::chat::{ChatLoop, LoopOutcome};
use crate::runtime::router::SignalRouter;
use crate::workflow::registry::{InstanceHandle, InstanceProgress, InstanceRegistry};
use crate::workflow::storage::InstanceStorage;
use crate::workflow::types::{
    InstanceKey, InstanceSnapshot, InstanceStatus, Signal, SignalKind, WorkflowDescription,
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::Instrument;

/// Result of a successful start: ids plus the greeting output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedWorkflow {
    pub workflow_id: String,
    pub run_id: String,
    pub result: String,
}

/// Client handle to the embedded engine
#[derive(Debug)]
pub struct EngineClient {
    namespace: String,
    activity_options: ActivityOptions,
    storage: InstanceStorage,
    registry: Arc<InstanceRegistry>,
    /// Key: task queue, Value: activity invoker registered by the worker
    workers: RwLock<HashMap<String, ActivityInvoker>>,
    /// One task per live control loop
    tasks: Mutex<JoinSet<()>>,
    shutdown: watch::Sender<bool>,
}

impl EngineClient {
    /// Validate credentials and open the engine's durable store
    pub async fn connect(config: &EngineConfig) -> Result<Self, EngineError> {
        if config.api_key.trim().is_empty() {
            return Err(EngineError::Connection("missing API key credential".to_string()));
        }

        tracing::info!(
            endpoint = %config.host_port,
            namespace = %config.namespace,
            tls = config.tls_enabled,
            "🔌 Connecting to orchestration engine"
        );

        let path = config.storage.database_path(&config.namespace);
        let storage = InstanceStorage::open(&path, &config.namespace)
            .await
            .map_err(|e| EngineError::Connection(format!("{:#}", e)))?;

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            namespace: config.namespace.clone(),
            activity_options: ActivityOptions {
                start_to_close_timeout: config.activity_timeout,
                ..ActivityOptions::default()
            },
            storage,
            registry: Arc::new(InstanceRegistry::new()),
            workers: RwLock::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
            shutdown,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of instances with a live control loop
    pub fn live_instances(&self) -> usize {
        self.registry.len()
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Register the activity for a task queue and resume its running instances
    ///
    /// Returns how many instances were recovered from storage.
    pub async fn start_worker(
        &self,
        task_queue: &str,
        activity: Arc<dyn Activity>,
    ) -> Result<usize, EngineError> {
        if self.is_shutting_down() {
            return Err(EngineError::Shutdown);
        }

        let invoker = ActivityInvoker::new(activity, self.activity_options.clone());
        tracing::info!(
            "👷 Worker registered on task queue '{}' with activity {}",
            task_queue,
            invoker.activity_name()
        );
        self.workers
            .write()
            .await
            .insert(task_queue.to_string(), invoker.clone());

        let mut recovered = 0;
        for snapshot in self.storage.load_running().await? {
            if snapshot.task_queue != task_queue || self.registry.get(&snapshot.key).is_some() {
                continue;
            }
            self.resume_instance(snapshot, invoker.clone()).await?;
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!("♻️ Recovered {} running instances on '{}'", recovered, task_queue);
        }
        Ok(recovered)
    }

    async fn resume_instance(
        &self,
        snapshot: InstanceSnapshot,
        invoker: ActivityInvoker,
    ) -> Result<(), EngineError> {
        let key = snapshot.key.clone();
        let router = Arc::new(SignalRouter::restore(
            key.clone(),
            snapshot.pending.clone(),
            snapshot.version,
        ));
        let (progress_tx, progress_rx) = watch::channel(InstanceProgress {
            current_result: snapshot.current_result.clone(),
            status: InstanceStatus::Running,
        });

        self.registry.try_insert(Arc::new(InstanceHandle {
            key: key.clone(),
            task_queue: snapshot.task_queue.clone(),
            router: Arc::clone(&router),
            progress: progress_rx,
        }))?;

        tracing::info!(
            "♻️ Resuming instance {} with {} pending signals",
            key,
            snapshot.pending.len()
        );
        let chat = ChatLoop::resume(snapshot, invoker, router, self.storage.clone(), progress_tx);
        self.spawn_loop(key, chat, None).await;
        Ok(())
    }

    /// Start a new chat instance and wait for its greeting
    pub async fn start_workflow(
        &self,
        task_queue: &str,
        workflow_id: &str,
        message: &str,
    ) -> Result<StartedWorkflow, EngineError> {
        if self.is_shutting_down() {
            return Err(EngineError::Shutdown);
        }

        let invoker = self
            .workers
            .read()
            .await
            .get(task_queue)
            .cloned()
            .ok_or_else(|| EngineError::NoWorker(task_queue.to_string()))?;

        let key = InstanceKey::new(workflow_id, uuid::Uuid::new_v4().to_string());
        let router = Arc::new(SignalRouter::new(key.clone()));
        let (progress_tx, progress_rx) = watch::channel(InstanceProgress {
            current_result: String::new(),
            status: InstanceStatus::Running,
        });

        self.registry.try_insert(Arc::new(InstanceHandle {
            key: key.clone(),
            task_queue: task_queue.to_string(),
            router: Arc::clone(&router),
            progress: progress_rx,
        }))?;

        tracing::info!("🚀 Started workflow: WorkflowID={}, RunID={}", key.workflow_id, key.run_id);

        let chat = ChatLoop::new(
            key.clone(),
            task_queue.to_string(),
            message.to_string(),
            invoker,
            router,
            self.storage.clone(),
            progress_tx,
        );
        let (greeted_tx, greeted_rx) = oneshot::channel();
        self.spawn_loop(key.clone(), chat, Some(greeted_tx)).await;

        match greeted_rx.await {
            Ok(Ok(result)) => Ok(StartedWorkflow {
                workflow_id: key.workflow_id,
                run_id: key.run_id,
                result,
            }),
            Ok(Err(source)) => Err(EngineError::Activity { key, source }),
            // The loop was suspended before the greeting settled.
            Err(_) => Err(EngineError::Shutdown),
        }
    }

    async fn spawn_loop(
        &self,
        key: InstanceKey,
        chat: ChatLoop,
        greeted: Option<oneshot::Sender<Result<String, crate::error::ActivityError>>>,
    ) {
        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.subscribe();
        let span = tracing::info_span!(
            "chat_workflow",
            workflow_id = %key.workflow_id,
            run_id = %key.run_id
        );

        let task = async move {
            match chat.run(greeted, shutdown).await {
                LoopOutcome::Completed(result) => {
                    tracing::info!("🎉 Workflow completed: {}", result);
                }
                LoopOutcome::Failed(err) => {
                    tracing::error!("❌ Workflow failed: {}", err);
                }
                LoopOutcome::Suspended => {
                    tracing::info!("⏸️ Workflow suspended, will resume on next worker start");
                }
            }
            registry.remove(&key);
        }
        .instrument(span);

        let mut tasks = self.tasks.lock().await;
        // Reap loops that already finished so the set does not grow unbounded.
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                tracing::error!("Control loop task panicked: {}", e);
            }
        }
        tasks.spawn(task);
    }

    /// Deliver a signal to a running instance
    ///
    /// An empty or missing run id targets the current run of the workflow id.
    pub async fn signal_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        kind: SignalKind,
        message: &str,
    ) -> Result<(), EngineError> {
        let run_id = run_id.filter(|id| !id.is_empty());

        let Some(handle) = self.find_live(workflow_id, run_id) else {
            return Err(self.missing_instance(workflow_id, run_id).await);
        };

        let snapshot = handle.router.enqueue(Signal::new(kind, message))?;
        // The signal is already queued in memory and will be delivered; a
        // failed write only weakens durability for this one signal.
        if let Err(e) = self
            .storage
            .save_pending(&handle.key, &snapshot.pending, snapshot.version)
            .await
        {
            tracing::error!("Failed to persist {} signal for {}: {:#}", kind, handle.key, e);
        }

        tracing::info!("📨 Sent {} signal to {}", kind, handle.key);
        Ok(())
    }

    /// Query the current result and status of an instance
    pub async fn describe_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> Result<WorkflowDescription, EngineError> {
        let run_id = run_id.filter(|id| !id.is_empty());

        if let Some(handle) = self.find_live(workflow_id, run_id) {
            return Ok(handle.describe());
        }

        let key = self.resolve_stored_key(workflow_id, run_id).await?;
        self.storage
            .get_snapshot(&key)
            .await?
            .map(|snapshot| WorkflowDescription::from(&snapshot))
            .ok_or_else(|| EngineError::InstanceNotFound(key.to_string()))
    }

    fn find_live(&self, workflow_id: &str, run_id: Option<&str>) -> Option<Arc<InstanceHandle>> {
        match run_id {
            Some(run_id) => self.registry.get(&InstanceKey::new(workflow_id, run_id)),
            None => self.registry.latest(workflow_id),
        }
    }

    async fn resolve_stored_key(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> Result<InstanceKey, EngineError> {
        match run_id {
            Some(run_id) => Ok(InstanceKey::new(workflow_id, run_id)),
            None => self
                .storage
                .latest_run_id(workflow_id)
                .await?
                .map(|run_id| InstanceKey::new(workflow_id, run_id))
                .ok_or_else(|| EngineError::InstanceNotFound(workflow_id.to_string())),
        }
    }

    /// Explain why a signal target has no live loop
    async fn missing_instance(&self, workflow_id: &str, run_id: Option<&str>) -> EngineError {
        let classify = async {
            let key = self.resolve_stored_key(workflow_id, run_id).await?;
            let error = match self.storage.get_snapshot(&key).await? {
                Some(snapshot) if snapshot.status.is_terminal() => EngineError::InstanceTerminated(key),
                Some(_) if self.is_shutting_down() => EngineError::Shutdown,
                Some(snapshot) => EngineError::NoWorker(snapshot.task_queue),
                None => EngineError::InstanceNotFound(key.to_string()),
            };
            Ok::<_, EngineError>(error)
        };
        classify.await.unwrap_or_else(|e| e)
    }

    /// Stop every control loop and close the store
    ///
    /// Loops waiting for signals are suspended and stay `running` in storage;
    /// a loop in the middle of an activity call finishes that dispatch first.
    pub async fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        tracing::info!("🛑 Shutting down engine client ({} live instances)", self.registry.len());

        let mut tasks = self.tasks.lock().await;
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                tracing::error!("Control loop task panicked: {}", e);
            }
        }
        drop(tasks);

        self.storage.close().await;
        tracing::info!("Engine client closed");
    }
}
