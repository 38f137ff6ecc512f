/// Signal router: three FIFO signal channels behind one fair wait
///
/// Callers enqueue from any task without coordination; the instance's
/// control loop is the only consumer. Every enqueue is stamped with a
/// per-instance sequence number and `wait_next` always hands out the
/// oldest pending signal across all channels, so arrival order is kept
/// even between channels and no channel can starve another.
///
/// A taken signal stays in the durable pending list as the in-flight
/// signal until the loop settles it, so a crash mid-dispatch redelivers it.

use crate::error::EngineError;
use crate::workflow::types::{InstanceKey, PendingSignal, Signal, SignalKind};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Router state as of a single mutation, used for durable snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSnapshot {
    /// Unsettled signals in arrival order, the in-flight one included
    pub pending: Vec<PendingSignal>,
    /// Mutation counter at the time the snapshot was taken
    pub version: u64,
}

/// Per-instance signal multiplexer
#[derive(Debug)]
pub struct SignalRouter {
    key: InstanceKey,
    state: Mutex<RouterState>,
    notify: Notify,
}

#[derive(Debug)]
struct RouterState {
    /// One queue per SignalKind, indexed by declaration order
    queues: [VecDeque<PendingSignal>; 3],
    /// Taken by the loop but not yet settled
    in_flight: Option<PendingSignal>,
    next_seq: u64,
    version: u64,
    /// Signals are accepted only once the greeting has settled
    open: bool,
    /// An EndChat is queued; nothing may be accepted behind it
    closing: bool,
    closed: bool,
}

impl RouterState {
    fn snapshot(&self) -> RouterSnapshot {
        let mut pending: Vec<PendingSignal> = self
            .in_flight
            .iter()
            .chain(self.queues.iter().flatten())
            .cloned()
            .collect();
        pending.sort_by_key(|p| (p.seq, p.signal.kind));
        RouterSnapshot {
            pending,
            version: self.version,
        }
    }

    /// Oldest head across channels; ties go to the higher-priority kind
    fn pop_oldest(&mut self) -> Option<PendingSignal> {
        let index = self
            .queues
            .iter()
            .enumerate()
            .filter_map(|(index, queue)| queue.front().map(|head| (head.seq, index)))
            .min()
            .map(|(_, index)| index)?;
        self.queues[index].pop_front()
    }

    fn take_next(&mut self) -> Option<PendingSignal> {
        let next = self.pop_oldest()?;
        if next.signal.kind == SignalKind::EndChat {
            self.closed = true;
        }
        self.in_flight = Some(next.clone());
        Some(next)
    }
}

fn queue_index(kind: SignalKind) -> usize {
    match kind {
        SignalKind::UserPrompt => 0,
        SignalKind::Confirm => 1,
        SignalKind::EndChat => 2,
    }
}

impl SignalRouter {
    /// Create an empty router for a new instance
    ///
    /// Enqueues are refused until [`SignalRouter::open`] is called.
    pub fn new(key: InstanceKey) -> Self {
        Self::build(key, Vec::new(), 0, false)
    }

    /// Rebuild a router from a persisted snapshot, already open
    pub fn restore(key: InstanceKey, pending: Vec<PendingSignal>, version: u64) -> Self {
        Self::build(key, pending, version, true)
    }

    fn build(key: InstanceKey, pending: Vec<PendingSignal>, version: u64, open: bool) -> Self {
        let mut queues: [VecDeque<PendingSignal>; 3] = Default::default();
        let next_seq = pending.iter().map(|p| p.seq + 1).max().unwrap_or(0);
        let closing = pending.iter().any(|p| p.signal.kind == SignalKind::EndChat);

        let mut ordered = pending;
        ordered.sort_by_key(|p| p.seq);
        for pending in ordered {
            queues[queue_index(pending.signal.kind)].push_back(pending);
        }

        Self {
            key,
            state: Mutex::new(RouterState {
                queues,
                in_flight: None,
                next_seq,
                version,
                open,
                closing,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        // Critical sections never panic, so a poisoned lock still holds
        // consistent queues.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start accepting signals
    pub fn open(&self) {
        self.lock().open = true;
    }

    /// Append a signal to its channel; never blocks
    ///
    /// Fails with `InstanceStarting` before the greeting has settled and
    /// with `InstanceTerminated` once an EndChat has been accepted.
    pub fn enqueue(&self, signal: Signal) -> Result<RouterSnapshot, EngineError> {
        let snapshot = {
            let mut state = self.lock();
            if state.closed || state.closing {
                return Err(EngineError::InstanceTerminated(self.key.clone()));
            }
            if !state.open {
                return Err(EngineError::InstanceStarting(self.key.clone()));
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.version += 1;
            state.closing = signal.kind == SignalKind::EndChat;
            state.queues[queue_index(signal.kind)].push_back(PendingSignal { seq, signal });
            state.snapshot()
        };

        self.notify.notify_one();
        Ok(snapshot)
    }

    /// Wait until any channel is non-empty and take its oldest signal
    ///
    /// The signal stays in snapshots until [`SignalRouter::settle`].
    /// Taking an EndChat closes the router in the same critical section.
    pub async fn wait_next(&self) -> PendingSignal {
        loop {
            // Register interest before checking so an enqueue racing with
            // the check leaves a permit behind.
            let notified = self.notify.notified();
            let taken = self.lock().take_next();
            if let Some(next) = taken {
                return next;
            }
            notified.await;
        }
    }

    /// Mark the in-flight signal as applied and snapshot what is left
    pub fn settle(&self) -> RouterSnapshot {
        let mut state = self.lock();
        state.in_flight = None;
        state.version += 1;
        state.snapshot()
    }

    /// Reject all future enqueues and return what was still pending
    pub fn close(&self) -> RouterSnapshot {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            state.version += 1;
        }
        state.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Current unsettled signals in arrival order
    pub fn snapshot(&self) -> RouterSnapshot {
        self.lock().snapshot()
    }
}
