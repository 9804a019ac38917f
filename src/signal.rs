//! Control-synchronization signals between an element's worker and its callers.
//!
//! The original engine packed these into one bit-flag event group; here each
//! signal is an independent resettable binary flag (mutex-guarded bool plus
//! condition variable), so no code depends on bit positions and a waiter can
//! never be woken by an unrelated flag.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A resettable binary signal.
///
/// `set` latches the flag and wakes every waiter; the flag stays set until
/// `clear`. Waiting on an already-set signal returns immediately.
#[derive(Debug, Default)]
pub struct Signal {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    /// Create a cleared signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the signal and wake all waiters.
    pub fn set(&self) {
        let mut state = self.state.lock().unwrap();
        *state = true;
        self.cond.notify_all();
    }

    /// Reset the signal to the cleared state.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        *state = false;
    }

    /// Check the signal without waiting.
    pub fn is_set(&self) -> bool {
        *self.state.lock().unwrap()
    }

    /// Wait until the signal is set or `timeout` elapses.
    ///
    /// Returns `true` when the signal was observed set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |set| !*set)
            .unwrap();
        *state
    }

    /// Wait indefinitely until the signal is set.
    pub fn wait(&self) {
        let state = self.state.lock().unwrap();
        let _unused = self.cond.wait_while(state, |set| !*set).unwrap();
    }
}

/// The named signal set owned by every element.
#[derive(Debug, Default)]
pub struct StateSignals {
    /// The worker reached a stopped/finished/error resting point.
    pub stopped: Signal,
    /// The element opened and started streaming.
    pub started: Signal,
    /// The output buffer fill level crossed the configured watermark.
    pub buffer_reach_level: Signal,
    /// The worker task entered its loop.
    pub task_created: Signal,
    /// The worker task exited.
    pub task_destroyed: Signal,
    /// A PAUSE command completed.
    pub paused: Signal,
    /// A RESUME command completed.
    pub resumed: Signal,
}

impl StateSignals {
    /// Create the signal set, all cleared.
    pub fn new() -> Self {
        Self::default()
    }
}
