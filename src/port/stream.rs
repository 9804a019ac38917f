//! Byte-granularity bounded stream port.

use crate::io::IoStatus;
use crate::port::{Port, PortType};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct StreamState {
    data: VecDeque<u8>,
    aborted: bool,
    done: bool,
}

/// A bounded byte queue connecting two elements.
///
/// Writers block while the buffer is full and may complete partially; readers
/// block while it is empty and return up to the requested length. An abort is
/// sticky: every blocked and subsequent operation returns
/// [`IoStatus::Abort`] until [`reset`](Port::reset).
pub struct StreamPort {
    tag: String,
    capacity: usize,
    state: Mutex<StreamState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl StreamPort {
    /// Create a stream port with the given byte capacity.
    pub fn new(tag: impl Into<String>, capacity: usize) -> Self {
        Self {
            tag: tag.into(),
            capacity,
            state: Mutex::new(StreamState {
                data: VecDeque::with_capacity(capacity.min(64 * 1024)),
                aborted: false,
                done: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }
}

/// One bounded condvar wait; the caller re-checks its predicate and the
/// deadline after every wakeup, so spurious wakeups and expiry-races are
/// handled in the loop.
pub(crate) fn wait_step<'a, T>(
    cond: &Condvar,
    guard: std::sync::MutexGuard<'a, T>,
    deadline: Option<Instant>,
) -> std::sync::MutexGuard<'a, T> {
    match deadline {
        None => cond.wait(guard).unwrap(),
        Some(deadline) => {
            let budget = deadline.saturating_duration_since(Instant::now());
            cond.wait_timeout(guard, budget).unwrap().0
        }
    }
}

pub(crate) fn deadline_from(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

pub(crate) fn expired(deadline: Option<Instant>) -> bool {
    matches!(deadline, Some(d) if Instant::now() >= d)
}

impl Port for StreamPort {
    fn port_type(&self) -> PortType {
        PortType::Stream
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> IoStatus {
        if buf.is_empty() {
            return IoStatus::Bytes(0);
        }
        let deadline = deadline_from(timeout);
        let mut state = self.state.lock().unwrap();
        loop {
            if state.aborted {
                return IoStatus::Abort;
            }
            if !state.data.is_empty() {
                let n = buf.len().min(state.data.len());
                for (slot, byte) in buf.iter_mut().zip(state.data.drain(..n)) {
                    *slot = byte;
                }
                self.not_full.notify_all();
                return IoStatus::Bytes(n);
            }
            if state.done {
                return IoStatus::Done;
            }
            if expired(deadline) {
                return IoStatus::Timeout;
            }
            state = wait_step(&self.not_empty, state, deadline);
        }
    }

    fn write(&self, buf: &[u8], timeout: Option<Duration>) -> IoStatus {
        if buf.is_empty() {
            return IoStatus::Bytes(0);
        }
        let deadline = deadline_from(timeout);
        let mut state = self.state.lock().unwrap();
        loop {
            if state.aborted {
                return IoStatus::Abort;
            }
            if state.done {
                tracing::warn!("[{}] write after write_done", self.tag);
                return IoStatus::Done;
            }
            let free = self.capacity.saturating_sub(state.data.len());
            if free > 0 {
                let n = buf.len().min(free);
                state.data.extend(buf[..n].iter().copied());
                self.not_empty.notify_all();
                return IoStatus::Bytes(n);
            }
            if expired(deadline) {
                return IoStatus::Timeout;
            }
            state = wait_step(&self.not_full, state, deadline);
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.data.clear();
        state.aborted = false;
        state.done = false;
        self.not_full.notify_all();
    }

    fn abort(&self) {
        let mut state = self.state.lock().unwrap();
        state.aborted = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn write_done(&self) {
        let mut state = self.state.lock().unwrap();
        state.done = true;
        self.not_empty.notify_all();
    }

    fn filled(&self) -> usize {
        self.state.lock().unwrap().data.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
