//! Direct-callback port.

use crate::io::IoStatus;
use crate::port::{Port, PortType};
use std::sync::Mutex;
use std::time::Duration;

/// User closure servicing reads on a callback port.
pub type ReadCallback = Box<dyn FnMut(&mut [u8]) -> IoStatus + Send>;

/// User closure servicing writes on a callback port.
pub type WriteCallback = Box<dyn FnMut(&[u8]) -> IoStatus + Send>;

enum Endpoint {
    Reader(Mutex<ReadCallback>),
    Writer(Mutex<WriteCallback>),
}

/// An unbounded endpoint that hands data directly to a user closure.
///
/// A callback port services exactly one direction; the opposite operation
/// fails. It buffers nothing, never signals backpressure, and
/// `reset`/`abort`/`write_done` are no-ops.
pub struct CallbackPort {
    tag: String,
    endpoint: Endpoint,
}

impl CallbackPort {
    /// Create a read-side callback port (an element pulls its input from the
    /// closure).
    pub fn reader(tag: impl Into<String>, cb: ReadCallback) -> Self {
        Self {
            tag: tag.into(),
            endpoint: Endpoint::Reader(Mutex::new(cb)),
        }
    }

    /// Create a write-side callback port (an element pushes its output into
    /// the closure).
    pub fn writer(tag: impl Into<String>, cb: WriteCallback) -> Self {
        Self {
            tag: tag.into(),
            endpoint: Endpoint::Writer(Mutex::new(cb)),
        }
    }
}

impl Port for CallbackPort {
    fn port_type(&self) -> PortType {
        PortType::Callback
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn read(&self, buf: &mut [u8], _timeout: Option<Duration>) -> IoStatus {
        match &self.endpoint {
            Endpoint::Reader(cb) => (cb.lock().unwrap())(buf),
            Endpoint::Writer(_) => {
                tracing::error!("[{}] read on a write-side callback port", self.tag);
                IoStatus::Fail
            }
        }
    }

    fn write(&self, buf: &[u8], _timeout: Option<Duration>) -> IoStatus {
        match &self.endpoint {
            Endpoint::Writer(cb) => (cb.lock().unwrap())(buf),
            Endpoint::Reader(_) => {
                tracing::error!("[{}] write on a read-side callback port", self.tag);
                IoStatus::Fail
            }
        }
    }

    fn reset(&self) {}

    fn abort(&self) {}

    fn write_done(&self) {}

    fn filled(&self) -> usize {
        0
    }

    fn capacity(&self) -> usize {
        0
    }
}
