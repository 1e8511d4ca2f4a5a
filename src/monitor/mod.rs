//! Completion Monitor.
//!
//! Workers report completion through an abstract per-task signal channel;
//! the monitor awaits, validates, and normalizes those signals into
//! `TaskResult`s, with timeouts distinct from worker-reported failures.

pub mod channel;
#[allow(clippy::module_inception)]
pub mod monitor;

pub use channel::{ChannelError, InMemorySignalChannel, SignalChannel, SignalSubscription};
pub use monitor::CompletionMonitor;
