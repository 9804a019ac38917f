//! Linear pipeline builder and group control.
//!
//! A pipeline registers elements, links them into a chain by tag — creating a
//! fresh buffer port between each consecutive pair, sized from the upstream
//! element's output configuration — and fans control operations out to every
//! linked element:
//!
//! ```text
//! [capture] ──port──> [encode] ──port──> [transport]
//!     ^                  ^                   ^
//!     └───────── run / pause / resume / stop ┘
//! ```

use crate::element::{Element, State, DEFAULT_STREAM_BUF_SIZE};
use crate::error::{Error, Result};
use crate::event::EventListener;
use crate::port::{BlockPort, Port, PortType, StreamPort};
use std::sync::Arc;
use std::time::Duration;

/// Per-element resume/wait budget used by group operations.
const PIPELINE_OP_TIMEOUT: Duration = Duration::from_millis(2000);
/// Per-element stop-wait budget used by `wait_for_stop`.
const PIPELINE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

struct ElementItem {
    element: Element,
    linked: bool,
}

struct OwnedPort {
    port: Arc<dyn Port>,
    host: Element,
}

/// A chain of elements driven as a group.
pub struct Pipeline {
    items: Vec<ElementItem>,
    ports: Vec<OwnedPort>,
    state: State,
    linked: bool,
    listener_id: Option<u64>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            ports: Vec::new(),
            state: State::Init,
            linked: false,
            listener_id: None,
        }
    }

    /// Pipeline-level state mirror.
    pub fn state(&self) -> State {
        self.state
    }

    /// Register an element under `tag`, replacing any previous registration of
    /// the same element.
    pub fn register(&mut self, element: &Element, tag: impl Into<String>) {
        self.unregister(element);
        element.set_tag(tag);
        self.items.push(ElementItem {
            element: element.clone(),
            linked: false,
        });
    }

    /// Remove an element from the pipeline.
    pub fn unregister(&mut self, element: &Element) {
        self.items
            .retain(|item| !Arc::ptr_eq(&item.element.inner, &element.inner));
    }

    /// Look up a registered element by tag (case-insensitive).
    pub fn element_by_tag(&self, tag: &str) -> Option<Element> {
        self.items
            .iter()
            .find(|item| item.element.tag().eq_ignore_ascii_case(tag))
            .map(|item| item.element.clone())
    }

    /// Link the named elements into a chain, in order.
    ///
    /// A fresh port is created between each consecutive pair, typed and sized
    /// from the upstream element's output configuration, installed as the
    /// upstream output and the downstream input. A previous link is undone
    /// first. Callback-type chain endpoints keep the ports they own.
    pub fn link(&mut self, tags: &[&str]) -> Result<()> {
        if self.linked {
            self.unlink();
        }
        let mut upstream_port: Option<Arc<dyn Port>> = None;
        for (i, tag) in tags.iter().enumerate() {
            let idx = self
                .items
                .iter()
                .position(|item| item.element.tag().eq_ignore_ascii_case(tag))
                .ok_or_else(|| {
                    Error::InvalidArg(format!("no element registered under tag '{}'", tag))
                })?;
            self.items[idx].linked = true;
            let element = self.items[idx].element.clone();

            let first = i == 0;
            let last = i == tags.len() - 1;
            if first && last {
                tracing::debug!("pipeline link with a single element '{}'", tag);
                break;
            }
            if !first {
                let port = upstream_port.take().ok_or_else(|| {
                    Error::InvalidState("link chain lost its upstream port".into())
                })?;
                element.set_input_port(Some(port));
            }
            if !last {
                let port = create_output_port(&element);
                element.set_output_port(Some(port.clone()));
                self.ports.push(OwnedPort {
                    port: port.clone(),
                    host: element.clone(),
                });
                tracing::debug!("pipeline linked '{}' -> port '{}'", tag, port.tag());
                upstream_port = Some(port);
            }
        }
        self.linked = true;
        Ok(())
    }

    /// Undo `link`: detach pipeline-created ports from their elements and drop
    /// them.
    pub fn unlink(&mut self) {
        if !self.linked {
            return;
        }
        self.remove_listener();
        for item in &mut self.items {
            if !item.linked {
                continue;
            }
            item.linked = false;
            if item.element.input_port_type() != PortType::Callback {
                item.element.set_input_port(None);
            }
            if item.element.output_port_type() != PortType::Callback {
                item.element.set_output_port(None);
            }
        }
        for owned in self.ports.drain(..) {
            if let Some(port) = owned.host.input_port() {
                if Arc::ptr_eq(&port, &owned.port) {
                    owned.host.set_input_port(None);
                }
            }
            if let Some(port) = owned.host.output_port() {
                if Arc::ptr_eq(&port, &owned.port) {
                    owned.host.set_output_port(None);
                }
            }
        }
        self.linked = false;
        tracing::debug!("pipeline unlinked");
    }

    /// Start every linked element's worker and resume the chain.
    pub fn run(&mut self) -> Result<()> {
        if self.state != State::Init {
            tracing::debug!("pipeline already started, state {:?}", self.state);
            return Ok(());
        }
        for item in &self.items {
            if item.linked
                && matches!(
                    item.element.state(),
                    State::Init | State::Stopped | State::Finished | State::Error
                )
            {
                item.element.run()?;
            }
        }
        if let Err(e) = self.resume() {
            tracing::error!("pipeline resume failed: {}", e);
            self.state = State::Error;
            self.terminate();
            return Err(e);
        }
        self.state = State::Running;
        tracing::debug!("pipeline started");
        Ok(())
    }

    /// Resume every linked element.
    pub fn resume(&mut self) -> Result<()> {
        let mut result = Ok(());
        for item in &self.items {
            if !item.linked {
                continue;
            }
            if let Err(e) = item.element.resume(0.0, PIPELINE_OP_TIMEOUT) {
                tracing::warn!(
                    "pipeline resume of '{}' failed: {}",
                    item.element.tag(),
                    e
                );
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if result.is_ok() {
            self.state = State::Running;
        }
        result
    }

    /// Pause every linked element.
    pub fn pause(&mut self) -> Result<()> {
        for item in &self.items {
            if item.linked {
                let _ = item.element.pause();
            }
        }
        self.state = State::Paused;
        Ok(())
    }

    /// Request a stop of every linked element.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != State::Running && self.state != State::Paused {
            tracing::debug!("pipeline stop skipped, state {:?}", self.state);
            return Err(Error::InvalidState(format!(
                "pipeline is not running ({:?})",
                self.state
            )));
        }
        for item in &self.items {
            if item.linked {
                let _ = item.element.stop();
            }
        }
        Ok(())
    }

    /// Wait for every linked element to stop, then reset their states to INIT
    /// so the pipeline can run again.
    pub fn wait_for_stop(&mut self) -> Result<()> {
        let mut result = Ok(());
        for item in &self.items {
            if !item.linked {
                continue;
            }
            match item.element.wait_for_stop_timeout(PIPELINE_STOP_TIMEOUT) {
                Ok(()) => item.element.reset_state(),
                Err(e) => {
                    tracing::warn!(
                        "pipeline wait for '{}' stop failed: {}",
                        item.element.tag(),
                        e
                    );
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        self.state = State::Init;
        result
    }

    /// Terminate every linked element's worker.
    pub fn terminate(&mut self) {
        for item in &self.items {
            if item.linked {
                let _ = item.element.terminate();
            }
        }
    }

    /// Reset linked ports and element states for a fresh run.
    pub fn reset(&mut self) {
        for item in &self.items {
            if item.linked {
                item.element.reset_input_port();
                item.element.reset_output_port();
                item.element.reset_state();
            }
        }
        self.state = State::Init;
    }

    /// Attach one listener to every linked element, replacing any previous
    /// pipeline listener.
    pub fn set_listener(&mut self, listener: &EventListener) {
        if self.listener_id.is_some() {
            self.remove_listener();
        }
        for item in &self.items {
            if item.linked {
                item.element.set_listener(listener);
            }
        }
        self.listener_id = Some(listener.id());
    }

    /// Detach the pipeline listener from every linked element.
    pub fn remove_listener(&mut self) {
        let Some(id) = self.listener_id.take() else {
            return;
        };
        for item in &self.items {
            if item.linked {
                item.element.remove_listener_by_id(id);
            }
        }
    }

    /// Terminate, unlink, and deinit every registered element.
    pub fn deinit(&mut self) {
        self.terminate();
        self.unlink();
        for item in self.items.drain(..) {
            let _ = item.element.deinit();
        }
        tracing::debug!("pipeline deinitialized");
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn create_output_port(element: &Element) -> Arc<dyn Port> {
    let tag = element.tag();
    match element.output_port_type() {
        PortType::Block => {
            let (node_size, node_count) = element.output_block_geometry().unwrap_or((
                crate::element::DEFAULT_BLOCK_NODE_SIZE,
                crate::element::DEFAULT_BLOCK_NODE_COUNT,
            ));
            Arc::new(BlockPort::new(
                format!("{}_out_fb", tag),
                node_size,
                node_count,
            )) as Arc<dyn Port>
        }
        _ => {
            let capacity = element
                .output_stream_capacity()
                .unwrap_or(DEFAULT_STREAM_BUF_SIZE);
            Arc::new(StreamPort::new(format!("{}_out_rb", tag), capacity)) as Arc<dyn Port>
        }
    }
}
