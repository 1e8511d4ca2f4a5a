//! Abstract point-to-point signal channel, plus the in-memory reference
//! implementation.
//!
//! The contract is deliberately small: one completion signal per task id,
//! delivered to exactly one active subscriber, or buffered until one
//! arrives. A filesystem watcher or a socket can stand in for the in-memory
//! version without the monitor noticing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::task::CompletionSignal;

/// Errors from channel operations.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("signal channel closed for task '{task_id}'")]
    Closed { task_id: String },
}

/// Receiving half of one subscription.
#[async_trait]
pub trait SignalSubscription: Send {
    /// Wait for the next signal addressed to the subscribed task id.
    async fn recv(&mut self) -> Result<CompletionSignal, ChannelError>;
}

/// Point-to-point notification channel keyed by task id.
///
/// `publish` takes the routing key separately from the payload: the monitor
/// validates that the two agree, which is the misrouting guard.
pub trait SignalChannel: Send + Sync {
    /// Publish a completion signal for `task_id`.
    fn publish(&self, task_id: &str, signal: CompletionSignal);

    /// Subscribe to the signal for `task_id`. Signals published before the
    /// subscription are buffered and delivered immediately.
    fn subscribe(&self, task_id: &str) -> Box<dyn SignalSubscription>;

    /// Whether an undelivered signal is currently buffered for `task_id`.
    fn has_signal(&self, task_id: &str) -> bool;
}

#[derive(Default)]
struct Slot {
    /// Signals published before any subscriber showed up.
    buffered: VecDeque<CompletionSignal>,
    /// Waiting subscribers, oldest first.
    waiters: VecDeque<(u64, oneshot::Sender<CompletionSignal>)>,
}

#[derive(Default)]
struct ChannelState {
    slots: HashMap<String, Slot>,
    next_waiter_id: u64,
}

/// In-memory signal channel backed by per-task slots.
///
/// Each published signal goes to the oldest registered waiter, or into the
/// slot's buffer when nobody is waiting (race-safety for workers that finish
/// before monitoring starts). Dropping a subscription deregisters its
/// waiter, so timeouts leave no dangling listeners.
#[derive(Clone, Default)]
pub struct InMemorySignalChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl InMemorySignalChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalChannel for InMemorySignalChannel {
    fn publish(&self, task_id: &str, signal: CompletionSignal) {
        let mut state = self.state.lock().expect("channel state poisoned");
        let slot = state.slots.entry(task_id.to_string()).or_default();

        // Hand off to the oldest live waiter; a waiter whose receiver is
        // already gone gets skipped, not counted as delivered.
        while let Some((waiter_id, sender)) = slot.waiters.pop_front() {
            match sender.send(signal.clone()) {
                Ok(()) => {
                    debug!(task_id, waiter_id, "signal delivered to waiter");
                    return;
                }
                Err(_) => continue,
            }
        }

        debug!(task_id, "signal buffered (no active subscriber)");
        slot.buffered.push_back(signal);
    }

    fn subscribe(&self, task_id: &str) -> Box<dyn SignalSubscription> {
        let mut state = self.state.lock().expect("channel state poisoned");

        // Drain the buffer first: early finishers resolve immediately.
        let slot = state.slots.entry(task_id.to_string()).or_default();
        if let Some(signal) = slot.buffered.pop_front() {
            return Box::new(InMemorySubscription {
                ready: Some(signal),
                rx: None,
                cleanup: None,
            });
        }

        let (tx, rx) = oneshot::channel();
        let waiter_id = state.next_waiter_id;
        state.next_waiter_id += 1;
        state
            .slots
            .get_mut(task_id)
            .expect("slot just inserted")
            .waiters
            .push_back((waiter_id, tx));

        Box::new(InMemorySubscription {
            ready: None,
            rx: Some(rx),
            cleanup: Some(WaiterCleanup {
                state: Arc::clone(&self.state),
                task_id: task_id.to_string(),
                waiter_id,
            }),
        })
    }

    fn has_signal(&self, task_id: &str) -> bool {
        let state = self.state.lock().expect("channel state poisoned");
        state
            .slots
            .get(task_id)
            .map(|slot| !slot.buffered.is_empty())
            .unwrap_or(false)
    }
}

/// Deregisters a waiter when the subscription is dropped.
struct WaiterCleanup {
    state: Arc<Mutex<ChannelState>>,
    task_id: String,
    waiter_id: u64,
}

impl Drop for WaiterCleanup {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(slot) = state.slots.get_mut(&self.task_id) {
                slot.waiters.retain(|(id, _)| *id != self.waiter_id);
            }
        }
    }
}

struct InMemorySubscription {
    ready: Option<CompletionSignal>,
    rx: Option<oneshot::Receiver<CompletionSignal>>,
    cleanup: Option<WaiterCleanup>,
}

#[async_trait]
impl SignalSubscription for InMemorySubscription {
    async fn recv(&mut self) -> Result<CompletionSignal, ChannelError> {
        if let Some(signal) = self.ready.take() {
            return Ok(signal);
        }
        let task_id = self
            .cleanup
            .as_ref()
            .map(|c| c.task_id.clone())
            .unwrap_or_default();
        match self.rx.take() {
            Some(rx) => rx.await.map_err(|_| ChannelError::Closed {
                task_id: task_id.clone(),
            }),
            None => Err(ChannelError::Closed { task_id }),
        }
    }
}
