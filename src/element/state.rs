//! Element state machine states.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of an element.
///
/// The discriminant order is load-bearing: command handling compares states
/// with `<` / `>=` ("running or beyond", "paused or beyond"), mirroring the
/// transitions INIT → INITIALIZING → RUNNING ⇄ PAUSED →
/// STOPPED | FINISHED | ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum State {
    /// Freshly created or reset; nothing opened yet.
    Init = 0,
    /// The `open` callback is running.
    Initializing = 1,
    /// Streaming; `process` quanta are attempted.
    Running = 2,
    /// Suspended by a PAUSE command; closed, waiting for RESUME.
    Paused = 3,
    /// Stopped by a STOP command; re-enterable through RESUME.
    Stopped = 4,
    /// The stream ended gracefully.
    Finished = 5,
    /// A callback or I/O operation failed.
    Error = 6,
}

impl From<u8> for State {
    fn from(value: u8) -> Self {
        match value {
            0 => State::Init,
            1 => State::Initializing,
            2 => State::Running,
            3 => State::Paused,
            4 => State::Stopped,
            5 => State::Finished,
            _ => State::Error,
        }
    }
}

/// Lock-free holder for the element state.
///
/// Written by the worker (and by stack-less control paths), read from any
/// thread.
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    /// Create a holder starting at [`State::Init`].
    pub fn new() -> Self {
        Self(AtomicU8::new(State::Init as u8))
    }

    /// Read the current state.
    #[inline]
    pub fn load(&self) -> State {
        State::from(self.0.load(Ordering::Acquire))
    }

    /// Force a new state.
    #[inline]
    pub fn store(&self, state: State) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for AtomicState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(State::Init < State::Running);
        assert!(State::Initializing < State::Running);
        assert!(State::Paused >= State::Paused);
        assert!(State::Stopped >= State::Paused);
        assert!(State::Error >= State::Paused);
    }

    #[test]
    fn test_atomic_roundtrip() {
        let state = AtomicState::new();
        assert_eq!(state.load(), State::Init);
        state.store(State::Finished);
        assert_eq!(state.load(), State::Finished);
    }
}
