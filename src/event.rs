//! Element event reporting: status codes, event payloads, and listener fan-out.
//!
//! Events are emitted by elements during execution and can be received by any
//! number of listeners. Delivery is non-blocking from the data path's
//! perspective: a listener whose channel is full loses the event rather than
//! stalling the reporting element.

use crate::info::StreamInfo;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Status codes reported by an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The element entered the RUNNING state.
    StateRunning,
    /// The element entered the PAUSED state.
    StatePaused,
    /// The element entered the STOPPED state.
    StateStopped,
    /// The element finished its stream gracefully.
    StateFinished,
    /// The `open` callback failed.
    ErrorOpen,
    /// A primary-input read failed.
    ErrorInput,
    /// The `process` callback failed.
    ErrorProcess,
    /// A primary-output write failed.
    ErrorOutput,
    /// The `close` callback failed.
    ErrorClose,
    /// A data-path operation timed out.
    ErrorTimeout,
}

/// Events broadcast by an element to its listeners.
#[derive(Debug, Clone)]
pub enum ElementEvent {
    /// A status change or error report.
    Status {
        /// Tag of the reporting element.
        element: String,
        /// The reported status code.
        status: Status,
    },

    /// A stream-information snapshot (after probing or format change).
    Info {
        /// Tag of the reporting element.
        element: String,
        /// Snapshot of the element's info record.
        info: StreamInfo,
    },

    /// A codec-format announcement.
    CodecFormat {
        /// Tag of the reporting element.
        element: String,
        /// Snapshot of the element's info record.
        info: StreamInfo,
    },

    /// A playback/processing position report.
    Position {
        /// Tag of the reporting element.
        element: String,
        /// Snapshot of the element's info record.
        info: StreamInfo,
    },
}

impl ElementEvent {
    /// Tag of the element that emitted this event.
    pub fn element(&self) -> &str {
        match self {
            ElementEvent::Status { element, .. }
            | ElementEvent::Info { element, .. }
            | ElementEvent::CodecFormat { element, .. }
            | ElementEvent::Position { element, .. } => element,
        }
    }

    /// The status code, if this is a status event.
    pub fn status(&self) -> Option<Status> {
        match self {
            ElementEvent::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for ElementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementEvent::Status { element, status } => {
                write!(f, "[{}] status {:?}", element, status)
            }
            ElementEvent::Info { element, .. } => write!(f, "[{}] info", element),
            ElementEvent::CodecFormat { element, .. } => write!(f, "[{}] codec format", element),
            ElementEvent::Position { element, info } => {
                write!(f, "[{}] position {}", element, info.byte_pos)
            }
        }
    }
}

/// Callback invoked instead of the listener fan-out when installed.
pub type EventCallback = Box<dyn FnMut(&ElementEvent) + Send>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Receiving end of an element's (or pipeline's) event stream.
///
/// One listener can be attached to many elements; events from all of them
/// arrive interleaved on the same channel.
pub struct EventListener {
    id: u64,
    tx: kanal::Sender<ElementEvent>,
    rx: kanal::Receiver<ElementEvent>,
}

impl EventListener {
    /// Create a listener with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = kanal::bounded(capacity);
        Self {
            id: NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            rx,
        }
    }

    /// Unique identity of this listener, used for removal.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the next event arrives.
    ///
    /// Returns `None` when every attached hub has been dropped.
    pub fn recv(&self) -> Option<ElementEvent> {
        self.rx.recv().ok()
    }

    /// Take the next event without blocking.
    pub fn try_recv(&self) -> Option<ElementEvent> {
        self.rx.try_recv().ok().flatten()
    }

    /// Poll for an event until `timeout` elapses.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<ElementEvent> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(ev) = self.try_recv() {
                return Some(ev);
            }
            if std::time::Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
    }

    pub(crate) fn sender(&self) -> kanal::Sender<ElementEvent> {
        self.tx.clone()
    }
}

struct HubInner {
    listeners: Vec<(u64, kanal::Sender<ElementEvent>)>,
    callback: Option<EventCallback>,
}

/// Fan-out of one element's events to registered listeners.
///
/// When an event callback is installed it replaces the listener fan-out, the
/// way the original queue-based delivery is bypassed by a registered callback.
pub struct EventHub {
    inner: Mutex<HubInner>,
}

impl EventHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HubInner {
                listeners: Vec::new(),
                callback: None,
            }),
        }
    }

    /// Attach a listener. Attaching the same listener twice is a no-op.
    pub fn add_listener(&self, listener: &EventListener) {
        let mut inner = self.inner.lock().unwrap();
        if inner.listeners.iter().any(|(id, _)| *id == listener.id()) {
            return;
        }
        inner.listeners.push((listener.id(), listener.sender()));
    }

    /// Detach a listener by identity.
    pub fn remove_listener(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.retain(|(lid, _)| *lid != id);
    }

    /// Install a callback that replaces the listener fan-out.
    pub fn set_callback(&self, callback: EventCallback) {
        self.inner.lock().unwrap().callback = Some(callback);
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().unwrap().listeners.len()
    }

    /// Deliver an event to the callback or to every attached listener.
    ///
    /// Never blocks; listeners with full channels miss the event, and
    /// disconnected listeners are pruned.
    pub fn broadcast(&self, event: ElementEvent) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(cb) = inner.callback.as_mut() {
            cb(&event);
            return;
        }
        inner
            .listeners
            .retain(|(_, tx)| tx.try_send(event.clone()).is_ok());
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn status_event(status: Status) -> ElementEvent {
        ElementEvent::Status {
            element: "test".to_string(),
            status,
        }
    }

    #[test]
    fn test_broadcast_to_listener() {
        let hub = EventHub::new();
        let listener = EventListener::new(8);
        hub.add_listener(&listener);

        hub.broadcast(status_event(Status::StateRunning));

        let ev = listener.try_recv().unwrap();
        assert_eq!(ev.status(), Some(Status::StateRunning));
        assert_eq!(ev.element(), "test");
    }

    #[test]
    fn test_multiple_listeners() {
        let hub = EventHub::new();
        let a = EventListener::new(8);
        let b = EventListener::new(8);
        hub.add_listener(&a);
        hub.add_listener(&b);
        assert_eq!(hub.listener_count(), 2);

        hub.broadcast(status_event(Status::StateFinished));
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_some());
    }

    #[test]
    fn test_add_listener_twice_is_noop() {
        let hub = EventHub::new();
        let listener = EventListener::new(8);
        hub.add_listener(&listener);
        hub.add_listener(&listener);
        assert_eq!(hub.listener_count(), 1);

        hub.broadcast(status_event(Status::StateStopped));
        assert!(listener.try_recv().is_some());
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn test_remove_listener() {
        let hub = EventHub::new();
        let listener = EventListener::new(8);
        hub.add_listener(&listener);
        hub.remove_listener(listener.id());
        assert_eq!(hub.listener_count(), 0);

        hub.broadcast(status_event(Status::StateStopped));
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn test_full_listener_does_not_block() {
        let hub = EventHub::new();
        let listener = EventListener::new(1);
        hub.add_listener(&listener);

        hub.broadcast(status_event(Status::StateRunning));
        hub.broadcast(status_event(Status::StatePaused));
        hub.broadcast(status_event(Status::StateStopped));

        // Only the first event fits; the rest were dropped, not queued.
        assert_eq!(listener.try_recv().unwrap().status(), Some(Status::StateRunning));
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn test_callback_replaces_fanout() {
        let hub = EventHub::new();
        let listener = EventListener::new(8);
        hub.add_listener(&listener);

        let count = Arc::new(AtomicUsize::new(0));
        let count_cb = count.clone();
        hub.set_callback(Box::new(move |_| {
            count_cb.fetch_add(1, Ordering::Relaxed);
        }));

        hub.broadcast(status_event(Status::StateRunning));
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(listener.try_recv().is_none());
    }
}
