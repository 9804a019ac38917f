//! Fixed-size-node bounded block port.

use crate::io::IoStatus;
use crate::port::stream::{deadline_from, expired, wait_step};
use crate::port::{Port, PortType};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct BlockState {
    nodes: VecDeque<Vec<u8>>,
    aborted: bool,
    done: bool,
}

/// A bounded queue of fixed-size nodes.
///
/// One `write` enqueues exactly one node (payload length must fit the node
/// size); one `read` dequeues exactly one node into the caller's buffer. Fill
/// level and capacity are counted in nodes, so the backpressure watermark for
/// block-type outputs is a node count.
pub struct BlockPort {
    tag: String,
    node_size: usize,
    node_count: usize,
    state: Mutex<BlockState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl BlockPort {
    /// Create a block port holding up to `node_count` nodes of `node_size`
    /// bytes each.
    pub fn new(tag: impl Into<String>, node_size: usize, node_count: usize) -> Self {
        Self {
            tag: tag.into(),
            node_size,
            node_count,
            state: Mutex::new(BlockState {
                nodes: VecDeque::with_capacity(node_count),
                aborted: false,
                done: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Size of one node in bytes.
    pub fn node_size(&self) -> usize {
        self.node_size
    }
}

impl Port for BlockPort {
    fn port_type(&self) -> PortType {
        PortType::Block
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> IoStatus {
        let deadline = deadline_from(timeout);
        let mut state = self.state.lock().unwrap();
        loop {
            if state.aborted {
                return IoStatus::Abort;
            }
            if let Some(node) = state.nodes.pop_front() {
                self.not_full.notify_all();
                if node.len() > buf.len() {
                    // The node no longer fits anywhere; it is discarded, like
                    // the original's out-of-range frame handling.
                    tracing::warn!(
                        "[{}] frame size {} > read buffer {}, frame dropped",
                        self.tag,
                        node.len(),
                        buf.len()
                    );
                    return IoStatus::Fail;
                }
                buf[..node.len()].copy_from_slice(&node);
                return IoStatus::Bytes(node.len());
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
        if buf.len() > self.node_size {
            tracing::warn!(
                "[{}] write size {} > node size {}",
                self.tag,
                buf.len(),
                self.node_size
            );
            return IoStatus::Fail;
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
            if state.nodes.len() < self.node_count {
                state.nodes.push_back(buf.to_vec());
                self.not_empty.notify_all();
                return IoStatus::Bytes(buf.len());
            }
            if expired(deadline) {
                return IoStatus::Timeout;
            }
            state = wait_step(&self.not_full, state, deadline);
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.nodes.clear();
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
        self.state.lock().unwrap().nodes.len()
    }

    fn capacity(&self) -> usize {
        self.node_count
    }
}
