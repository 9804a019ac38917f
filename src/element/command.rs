//! The control command channel into an element's worker.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Control commands delivered to the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Close and report FINISHED.
    Finish,
    /// Close and report STOPPED.
    Stop,
    /// Close, report PAUSED, and idle until RESUME.
    Pause,
    /// (Re-)open and start processing quanta.
    Resume,
    /// Terminate the worker loop.
    Destroy,
}

/// How long the worker blocks for the next command.
///
/// Only the two modes the engine uses exist: indefinite block while
/// idle/paused, zero/poll while actively streaming. Control operations switch
/// the mode so PAUSE/STOP are observed promptly even while idle, and so a
/// RUNNING element polls commands without starving the data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Block until a command arrives.
    Block,
    /// Return immediately when no command is queued.
    Poll,
}

/// Commands queued faster than the worker drains them are a control-plane bug;
/// the bound mirrors the original's shallow queue.
const COMMAND_QUEUE_DEPTH: usize = 8;

struct QueueState {
    commands: VecDeque<Command>,
    mode: WaitMode,
}

/// Many-producer single-consumer command queue with a dynamic wait mode.
pub struct CommandQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl CommandQueue {
    /// Create an empty queue in [`WaitMode::Block`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                commands: VecDeque::with_capacity(COMMAND_QUEUE_DEPTH),
                mode: WaitMode::Block,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a command, failing when the queue is full.
    pub fn send(&self, command: Command) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.commands.len() >= COMMAND_QUEUE_DEPTH {
            return Err(Error::ChannelFull);
        }
        state.commands.push_back(command);
        self.available.notify_one();
        Ok(())
    }

    /// Switch the wait mode used by [`next`](CommandQueue::next).
    ///
    /// Takes effect on the worker's next wait; a blocked worker is not woken
    /// by a mode change alone (every mode change in the engine is paired with
    /// a command send).
    pub fn set_wait_mode(&self, mode: WaitMode) {
        self.state.lock().unwrap().mode = mode;
    }

    /// Current wait mode.
    pub fn wait_mode(&self) -> WaitMode {
        self.state.lock().unwrap().mode
    }

    /// Dequeue the next command according to the current wait mode.
    ///
    /// In [`WaitMode::Poll`] this returns `None` immediately when the queue is
    /// empty; in [`WaitMode::Block`] it waits for a send.
    pub fn next(&self) -> Option<Command> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(cmd) = state.commands.pop_front() {
                return Some(cmd);
            }
            match state.mode {
                WaitMode::Poll => return None,
                WaitMode::Block => {
                    state = self.available.wait(state).unwrap();
                }
            }
        }
    }

    /// Drop every queued command.
    ///
    /// Called before (re-)spawning a worker so stale commands from a previous
    /// run are never executed.
    pub fn discard_pending(&self) {
        self.state.lock().unwrap().commands.clear();
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
