/// The chat workflow control loop
///
/// One `ChatLoop` owns one instance from greeting to termination:
///
/// ```text
/// Greeting --(greet initial message)--> Waiting
/// Waiting  --UserPrompt(m): Greet(m)--> Waiting
/// Waiting  --Confirm(m): Greet("Confirmed: " + m)--> Waiting
/// Waiting  --EndChat(m): "Chat ended: " + m--> Terminated
/// ```
///
/// The loop runs on a single task, so `current_result` needs no locking and
/// at most one activity call is in flight per instance. Activity failures
/// during Waiting are logged and leave the previous result in place.

use crate::error::ActivityError;
use crate::runtime::activity::ActivityInvoker;
use crate::runtime::router::{RouterSnapshot, SignalRouter};
use crate::workflow::registry::InstanceProgress;
use crate::workflow::storage::InstanceStorage;
use crate::workflow::types::{InstanceKey, InstanceSnapshot, InstanceStatus, Signal, SignalKind};
use std::sync::Arc;
use tokio::sync::watch;

/// Control loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Greeting,
    Waiting,
    Terminated,
}

/// How a loop run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// EndChat consumed; carries the final result
    Completed(String),
    /// The greeting activity failed; the instance is marked failed
    Failed(ActivityError),
    /// The engine is shutting down; the instance stays running in storage
    Suspended,
}

/// Input for the activity call that a signal maps to, if any
pub fn activity_input(signal: &Signal) -> Option<String> {
    match signal.kind {
        SignalKind::UserPrompt => Some(signal.message.clone()),
        SignalKind::Confirm => Some(format!("Confirmed: {}", signal.message)),
        SignalKind::EndChat => None,
    }
}

/// Final result recorded when a chat is ended
pub fn end_chat_result(message: &str) -> String {
    format!("Chat ended: {}", message)
}

/// One instance's control loop
#[derive(Debug)]
pub struct ChatLoop {
    key: InstanceKey,
    task_queue: String,
    initial_message: String,
    current_result: String,
    state: LoopState,
    invoker: ActivityInvoker,
    router: Arc<SignalRouter>,
    storage: InstanceStorage,
    progress: watch::Sender<InstanceProgress>,
}

impl ChatLoop {
    /// Loop for a brand-new instance, starting in Greeting
    pub fn new(
        key: InstanceKey,
        task_queue: String,
        initial_message: String,
        invoker: ActivityInvoker,
        router: Arc<SignalRouter>,
        storage: InstanceStorage,
        progress: watch::Sender<InstanceProgress>,
    ) -> Self {
        Self {
            key,
            task_queue,
            initial_message,
            current_result: String::new(),
            state: LoopState::Greeting,
            invoker,
            router,
            storage,
            progress,
        }
    }

    /// Loop for an instance recovered from storage, resuming in Waiting
    pub fn resume(
        snapshot: InstanceSnapshot,
        invoker: ActivityInvoker,
        router: Arc<SignalRouter>,
        storage: InstanceStorage,
        progress: watch::Sender<InstanceProgress>,
    ) -> Self {
        Self {
            key: snapshot.key,
            task_queue: snapshot.task_queue,
            initial_message: snapshot.initial_message,
            current_result: snapshot.current_result,
            state: LoopState::Waiting,
            invoker,
            router,
            storage,
            progress,
        }
    }

    /// Drive the instance until it terminates, fails or the engine shuts down
    ///
    /// `greeted` receives the greeting outcome as soon as it settles.
    pub async fn run(
        mut self,
        greeted: Option<tokio::sync::oneshot::Sender<Result<String, ActivityError>>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> LoopOutcome {
        if self.state == LoopState::Greeting {
            let outcome = self.greet().await;
            if let Some(greeted) = greeted {
                // The starter may have given up waiting; the instance carries on.
                let _ = greeted.send(outcome.clone());
            }
            if let Err(err) = outcome {
                return LoopOutcome::Failed(err);
            }
        }

        while self.state == LoopState::Waiting {
            let next = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    tracing::info!("Suspending instance for shutdown");
                    return LoopOutcome::Suspended;
                }
                next = self.router.wait_next() => next,
            };

            tracing::info!(
                signal = %next.signal.kind,
                seq = next.seq,
                "Received {} signal: {}",
                next.signal.kind,
                next.signal.message
            );
            self.dispatch(next.signal).await;
            self.checkpoint().await;
        }

        LoopOutcome::Completed(self.current_result)
    }

    /// Greeting -> Waiting
    async fn greet(&mut self) -> Result<String, ActivityError> {
        tracing::info!("Greeting with initial message: {}", self.initial_message);

        match self.invoker.invoke(&self.initial_message).await {
            Ok(result) => {
                self.current_result = result.clone();
                self.state = LoopState::Waiting;
                self.checkpoint().await;
                self.router.open();
                Ok(result)
            }
            Err(err) => {
                tracing::error!(error = %err, "Greeting activity failed, failing instance");
                self.state = LoopState::Terminated;
                let snapshot = self.router.close();
                self.write_snapshot(InstanceStatus::Failed, snapshot).await;
                Err(err)
            }
        }
    }

    /// Apply one signal to the instance
    async fn dispatch(&mut self, signal: Signal) {
        let Some(input) = activity_input(&signal) else {
            self.current_result = end_chat_result(&signal.message);
            self.state = LoopState::Terminated;
            return;
        };

        match self.invoker.invoke(&input).await {
            Ok(result) => {
                tracing::debug!(signal = %signal.kind, "Activity {} returned: {}", self.invoker.activity_name(), result);
                self.current_result = result;
            }
            Err(err) => {
                tracing::error!(
                    signal = %signal.kind,
                    error = %err,
                    "Error processing {} signal, keeping previous result",
                    signal.kind
                );
            }
        }
    }

    /// Publish and persist the state reached after a transition
    ///
    /// Settling the in-flight signal and recording its result happen in one
    /// write, so a crash before this point redelivers the signal.
    async fn checkpoint(&self) {
        let snapshot = self.router.settle();
        if self.state != LoopState::Terminated {
            self.write_snapshot(InstanceStatus::Running, snapshot).await;
            return;
        }

        tracing::info!("Chat ended with result: {}", self.current_result);
        self.write_snapshot(InstanceStatus::Completed, snapshot).await;
    }

    async fn write_snapshot(&self, status: InstanceStatus, router: RouterSnapshot) {
        self.progress.send_replace(InstanceProgress {
            current_result: self.current_result.clone(),
            status,
        });

        let snapshot = InstanceSnapshot {
            key: self.key.clone(),
            task_queue: self.task_queue.clone(),
            initial_message: self.initial_message.clone(),
            current_result: self.current_result.clone(),
            status,
            pending: router.pending,
            version: router.version,
        };
        if let Err(e) = self.storage.save_snapshot(&snapshot).await {
            tracing::error!("Failed to persist snapshot for {}: {:#}", self.key, e);
        }
    }
}

/// Resolves once the shutdown flag is raised or its sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // An error means the engine was dropped, which is a shutdown too.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::activity::{greet, Activity, ActivityOptions, GreetActivity};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Greets, but fails any input containing "boom"
    #[derive(Debug)]
    struct Picky;

    #[async_trait]
    impl Activity for Picky {
        fn name(&self) -> &str {
            "Picky"
        }

        async fn execute(&self, input: String) -> Result<String, ActivityError> {
            if input.contains("boom") {
                Err(ActivityError::Failed(format!("refusing {}", input)))
            } else {
                Ok(greet(&input))
            }
        }
    }

    /// Greets and remembers every input it was called with
    #[derive(Debug, Default)]
    struct Recorder {
        inputs: std::sync::Mutex<Vec<String>>,
    }

    impl Recorder {
        fn inputs(&self) -> Vec<String> {
            self.inputs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Activity for Recorder {
        fn name(&self) -> &str {
            "Recorder"
        }

        async fn execute(&self, input: String) -> Result<String, ActivityError> {
            self.inputs.lock().unwrap().push(input.clone());
            Ok(greet(&input))
        }
    }

    struct Harness {
        router: Arc<SignalRouter>,
        storage: InstanceStorage,
        progress: watch::Receiver<InstanceProgress>,
        shutdown: watch::Sender<bool>,
        key: InstanceKey,
    }

    async fn spawn_loop(
        activity: Arc<dyn Activity>,
        initial: &str,
    ) -> (Harness, tokio::task::JoinHandle<LoopOutcome>, Result<String, ActivityError>) {
        let path = std::env::temp_dir()
            .join(format!("chatway-loop-{}", uuid::Uuid::new_v4()))
            .join("store.db");
        let storage = InstanceStorage::open(&path, "default").await.unwrap();
        let key = InstanceKey::new("chat-workflow-1", "run-1");
        let router = Arc::new(SignalRouter::new(key.clone()));
        let (progress_tx, progress_rx) = watch::channel(InstanceProgress {
            current_result: String::new(),
            status: InstanceStatus::Running,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (greeted_tx, greeted_rx) = tokio::sync::oneshot::channel();

        let chat = ChatLoop::new(
            key.clone(),
            "my-task-queue".to_string(),
            initial.to_string(),
            ActivityInvoker::new(activity, ActivityOptions::default()),
            Arc::clone(&router),
            storage.clone(),
            progress_tx,
        );
        let task = tokio::spawn(chat.run(Some(greeted_tx), shutdown_rx));
        let greeting = greeted_rx.await.unwrap();

        (
            Harness {
                router,
                storage,
                progress: progress_rx,
                shutdown: shutdown_tx,
                key,
            },
            task,
            greeting,
        )
    }

    async fn settle(harness: &mut Harness, expected: &str) {
        tokio::time::timeout(
            Duration::from_secs(2),
            harness.progress.wait_for(|p| p.current_result == expected),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[test]
    fn signals_map_to_activity_inputs() {
        assert_eq!(
            activity_input(&Signal::new(SignalKind::UserPrompt, "What's the weather?")),
            Some("What's the weather?".to_string())
        );
        assert_eq!(
            activity_input(&Signal::new(SignalKind::Confirm, "yes")),
            Some("Confirmed: yes".to_string())
        );
        assert_eq!(activity_input(&Signal::new(SignalKind::EndChat, "Goodbye")), None);
        assert_eq!(end_chat_result("Goodbye"), "Chat ended: Goodbye");
    }

    #[tokio::test]
    async fn greeting_then_signals_then_end_chat() {
        let (mut harness, task, greeting) = spawn_loop(Arc::new(GreetActivity), "Hello World").await;
        assert_eq!(greeting.unwrap(), "Hello, Hello World!");

        harness
            .router
            .enqueue(Signal::new(SignalKind::UserPrompt, "What's the weather?"))
            .unwrap();
        settle(&mut harness, "Hello, What's the weather?!").await;

        harness.router.enqueue(Signal::new(SignalKind::Confirm, "yes")).unwrap();
        settle(&mut harness, "Hello, Confirmed: yes!").await;

        harness.router.enqueue(Signal::new(SignalKind::EndChat, "Goodbye")).unwrap();
        let outcome = task.await.unwrap();
        assert_eq!(outcome, LoopOutcome::Completed("Chat ended: Goodbye".to_string()));

        let err = harness
            .router
            .enqueue(Signal::new(SignalKind::UserPrompt, "anyone?"))
            .unwrap_err();
        assert!(matches!(err, crate::error::EngineError::InstanceTerminated(_)));

        let stored = harness.storage.get_snapshot(&harness.key).await.unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Completed);
        assert_eq!(stored.current_result, "Chat ended: Goodbye");
    }

    #[tokio::test]
    async fn activity_failure_keeps_previous_result() {
        let (mut harness, task, greeting) = spawn_loop(Arc::new(Picky), "there").await;
        assert_eq!(greeting.unwrap(), "Hello, there!");

        harness.router.enqueue(Signal::new(SignalKind::UserPrompt, "boom")).unwrap();
        harness.router.enqueue(Signal::new(SignalKind::Confirm, "ok")).unwrap();
        settle(&mut harness, "Hello, Confirmed: ok!").await;

        harness.router.enqueue(Signal::new(SignalKind::Confirm, "boom")).unwrap();
        harness.router.enqueue(Signal::new(SignalKind::EndChat, "done")).unwrap();
        assert_eq!(
            task.await.unwrap(),
            LoopOutcome::Completed("Chat ended: done".to_string())
        );
    }

    #[tokio::test]
    async fn end_chat_wins_over_later_signals() {
        let (harness, task, _) = spawn_loop(Arc::new(GreetActivity), "hi").await;

        harness.router.enqueue(Signal::new(SignalKind::UserPrompt, "first")).unwrap();
        harness.router.enqueue(Signal::new(SignalKind::EndChat, "bye")).unwrap();
        let err = harness
            .router
            .enqueue(Signal::new(SignalKind::Confirm, "late"))
            .unwrap_err();
        assert!(matches!(err, crate::error::EngineError::InstanceTerminated(_)));

        assert_eq!(task.await.unwrap(), LoopOutcome::Completed("Chat ended: bye".to_string()));
        assert!(harness.router.is_closed());

        let stored = harness.storage.get_snapshot(&harness.key).await.unwrap().unwrap();
        assert!(stored.pending.is_empty());
    }

    #[tokio::test]
    async fn repeated_confirm_is_dispatched_every_time() {
        let recorder = Arc::new(Recorder::default());
        let (mut harness, task, _) = spawn_loop(Arc::clone(&recorder) as Arc<dyn Activity>, "hi").await;

        harness.router.enqueue(Signal::new(SignalKind::Confirm, "yes")).unwrap();
        settle(&mut harness, "Hello, Confirmed: yes!").await;
        harness.router.enqueue(Signal::new(SignalKind::Confirm, "yes")).unwrap();
        harness.router.enqueue(Signal::new(SignalKind::EndChat, "done")).unwrap();
        task.await.unwrap();

        assert_eq!(
            recorder.inputs(),
            vec!["hi", "Confirmed: yes", "Confirmed: yes"]
        );
    }

    #[tokio::test]
    async fn failed_greeting_fails_the_instance() {
        let (harness, task, greeting) = spawn_loop(Arc::new(Picky), "boom").await;
        assert!(matches!(greeting, Err(ActivityError::Failed(_))));
        assert!(matches!(task.await.unwrap(), LoopOutcome::Failed(_)));

        let stored = harness.storage.get_snapshot(&harness.key).await.unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Failed);
        assert!(harness.router.is_closed());
        assert!(harness.router.enqueue(Signal::new(SignalKind::UserPrompt, "hello?")).is_err());
    }

    #[tokio::test]
    async fn shutdown_suspends_without_terminating() {
        let (harness, task, _) = spawn_loop(Arc::new(GreetActivity), "hi").await;
        harness.shutdown.send_replace(true);

        assert_eq!(task.await.unwrap(), LoopOutcome::Suspended);
        assert!(!harness.router.is_closed());

        let stored = harness.storage.get_snapshot(&harness.key).await.unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Running);
        assert_eq!(stored.current_result, "Hello, hi!");
    }
}
