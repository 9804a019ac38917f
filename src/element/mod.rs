//! The streaming element: a per-node state machine driven by a cooperative
//! worker.
//!
//! An element owns one primary input port, one primary output port, bounded
//! arrays of secondary ports, a command queue, a signal set, and the four user
//! callbacks that define its behavior (`open`/`process`/`close`/`destroy`).
//! Control operations (`run`/`pause`/`resume`/`stop`/`terminate`) execute on a
//! different thread than the worker and communicate exclusively through the
//! command queue plus the signals — never by mutating worker-owned flags —
//! except for the [`StreamInfo`] record, which has its own mutex.
//!
//! `Element` is a cheap clonable handle; clones share one element instance,
//! the way a pipeline, the worker, and user callbacks all address the same
//! node.

mod command;
mod config;
mod state;
mod worker;

pub use command::{Command, CommandQueue, WaitMode};
pub use config::{
    CloseCallback, DestroyCallback, ElementConfig, OpenCallback, ProcessCallback, SeekCallback,
    DEFAULT_BLOCK_NODE_COUNT, DEFAULT_BLOCK_NODE_SIZE, DEFAULT_BUFFER_LEN,
    DEFAULT_STREAM_BUF_SIZE, DEFAULT_TASK_STACK,
};
pub use state::{AtomicState, State};

use crate::element::config::{Callbacks, OutputBufferCfg};
use crate::error::{Error, Result};
use crate::event::{ElementEvent, EventCallback, EventHub, EventListener, Status};
use crate::info::{CodecFormat, StreamInfo};
use crate::io::IoStatus;
use crate::port::{CallbackPort, Port, PortType};
use crate::signal::StateSignals;
use smallvec::SmallVec;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Bounded wait used by control operations that do not take an explicit
/// timeout (`run`, `pause`, `wait_for_stop`, `terminate`, `deinit`).
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_millis(2000);

type SharedPort = Arc<dyn Port>;
type PortSlot = Mutex<Option<SharedPort>>;
type MultiPorts = Mutex<Box<[Option<SharedPort>]>>;

pub(crate) struct ElementInner {
    tag: Mutex<String>,
    pub(crate) callbacks: Mutex<Callbacks>,

    in_port: PortSlot,
    out_port: PortSlot,
    in_type: Mutex<PortType>,
    out_type: Mutex<PortType>,
    multi_in: MultiPorts,
    multi_out: MultiPorts,
    out_cfg: Mutex<OutputBufferCfg>,

    info: Mutex<StreamInfo>,
    user_data: Mutex<Option<Arc<dyn Any + Send + Sync>>>,

    pub(crate) signals: StateSignals,
    pub(crate) commands: CommandQueue,
    events: EventHub,

    pub(crate) state: AtomicState,
    pub(crate) is_open: AtomicBool,
    is_running: AtomicBool,
    task_run: AtomicBool,
    stopping: AtomicBool,

    input_timeout: Mutex<Option<Duration>>,
    output_timeout: Mutex<Option<Duration>>,

    pub(crate) buffer_len: usize,
    task_stack: usize,
    task_priority: Option<i32>,
    task_core: Option<usize>,

    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a streaming element.
#[derive(Clone)]
pub struct Element {
    pub(crate) inner: Arc<ElementInner>,
}

impl Element {
    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create an element from its configuration.
    ///
    /// Fails when a `read`/`write` closure is supplied for a primary port
    /// whose type is not [`PortType::Callback`].
    pub fn init(mut config: ElementConfig) -> Result<Self> {
        if config.read.is_some() && config.in_type != PortType::Callback {
            return Err(Error::PortType(format!(
                "[{}] read closure requires a callback-type input port",
                config.tag
            )));
        }
        if config.write.is_some() && config.out_type != PortType::Callback {
            return Err(Error::PortType(format!(
                "[{}] write closure requires a callback-type output port",
                config.tag
            )));
        }

        let callbacks = config.take_callbacks();
        let out_cfg = OutputBufferCfg::from_config(&config);
        let multi_in = vec![None; config.multi_in_ports].into_boxed_slice();
        let multi_out = vec![None; config.multi_out_ports].into_boxed_slice();

        let in_port: Option<SharedPort> = config.read.take().map(|cb| {
            Arc::new(CallbackPort::reader(format!("{}_in_cb", config.tag), cb)) as SharedPort
        });
        let out_port: Option<SharedPort> = config.write.take().map(|cb| {
            Arc::new(CallbackPort::writer(format!("{}_out_cb", config.tag), cb)) as SharedPort
        });

        let element = Self {
            inner: Arc::new(ElementInner {
                tag: Mutex::new(config.tag.clone()),
                callbacks: Mutex::new(callbacks),
                in_port: Mutex::new(in_port),
                out_port: Mutex::new(out_port),
                in_type: Mutex::new(config.in_type),
                out_type: Mutex::new(config.out_type),
                multi_in: Mutex::new(multi_in),
                multi_out: Mutex::new(multi_out),
                out_cfg: Mutex::new(out_cfg),
                info: Mutex::new(StreamInfo::default()),
                user_data: Mutex::new(None),
                signals: StateSignals::new(),
                commands: CommandQueue::new(),
                events: EventHub::new(),
                state: AtomicState::new(),
                is_open: AtomicBool::new(false),
                is_running: AtomicBool::new(false),
                task_run: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                input_timeout: Mutex::new(None),
                output_timeout: Mutex::new(None),
                buffer_len: config.buffer_len,
                task_stack: config.task_stack,
                task_priority: config.task_priority,
                task_core: config.task_core,
                worker: Mutex::new(None),
            }),
        };
        tracing::debug!("element '{}' initialized", config.tag);
        Ok(element)
    }

    /// Stop, wait, terminate, then release everything the element owns,
    /// invoking the user `destroy` hook.
    ///
    /// `destroy` failures are reported but never block the teardown.
    pub fn deinit(&self) -> Result<()> {
        let _ = self.stop();
        let _ = self.wait_for_stop();
        let _ = self.terminate();

        let destroy = self.inner.callbacks.lock().unwrap().destroy.take();
        if let Some(mut destroy) = destroy {
            if let Err(e) = destroy(self) {
                tracing::warn!("element '{}' destroy hook failed: {}", self.tag(), e);
            }
        }

        self.set_uri(None);
        for slot in self.inner.multi_in.lock().unwrap().iter_mut() {
            *slot = None;
        }
        for slot in self.inner.multi_out.lock().unwrap().iter_mut() {
            *slot = None;
        }
        // Owned callback-type ports die with the element; buffer ports belong
        // to whoever linked them and are left in place for the pipeline.
        let mut in_port = self.inner.in_port.lock().unwrap();
        if matches!(in_port.as_ref().map(|p| p.port_type()), Some(PortType::Callback)) {
            *in_port = None;
        }
        drop(in_port);
        let mut out_port = self.inner.out_port.lock().unwrap();
        if matches!(out_port.as_ref().map(|p| p.port_type()), Some(PortType::Callback)) {
            *out_port = None;
        }
        drop(out_port);

        tracing::debug!("element '{}' deinitialized", self.tag());
        Ok(())
    }

    /// Start the worker task, or mark a stack-less element RUNNING inline.
    ///
    /// Idempotent while a worker exists. Stale commands from a previous run
    /// are discarded before spawning. An element without an `open` callback
    /// starts immediately: the STARTED signal is set and the state forced to
    /// RUNNING, but no `process` quantum runs until an explicit resume or
    /// data request.
    pub fn run(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.task_run.load(Ordering::Acquire) {
            tracing::debug!("element '{}' already running a worker", self.tag());
            return Ok(());
        }
        inner.commands.discard_pending();
        inner.signals.task_created.clear();

        if inner.task_stack == 0 {
            inner.task_run.store(true, Ordering::Release);
            inner.is_running.store(true, Ordering::Release);
            inner.state.store(State::Running);
            inner.signals.started.set();
            self.report_status(Status::StateRunning);
            tracing::debug!("element '{}' running inline (stack-less)", self.tag());
            return Ok(());
        }

        let element = self.clone();
        let priority = inner.task_priority;
        let core = inner.task_core;
        let handle = std::thread::Builder::new()
            .name(format!("el-{}", self.tag()))
            .stack_size(inner.task_stack)
            .spawn(move || {
                worker::apply_rt_scheduling(&element, priority, core);
                worker::worker_main(element);
            })
            .map_err(|e| {
                inner.state.store(State::Error);
                self.report_status(Status::ErrorOpen);
                Error::TaskSpawn(e.to_string())
            })?;
        *inner.worker.lock().unwrap() = Some(handle);

        if !inner.signals.task_created.wait_timeout(DEFAULT_CONTROL_TIMEOUT) {
            return Err(Error::Timeout);
        }

        let has_open = inner.callbacks.lock().unwrap().open.is_some();
        if !has_open {
            inner.is_open.store(true, Ordering::Release);
            inner.state.store(State::Running);
            inner.signals.started.set();
            self.report_status(Status::StateRunning);
        }
        tracing::debug!("element '{}' worker created", self.tag());
        Ok(())
    }

    /// Send DESTROY and wait [`DEFAULT_CONTROL_TIMEOUT`] for the worker to
    /// exit.
    pub fn terminate(&self) -> Result<()> {
        self.terminate_with_timeout(DEFAULT_CONTROL_TIMEOUT)
    }

    /// Send DESTROY and wait up to `timeout` for the worker to exit.
    ///
    /// Stack-less elements synchronously clear their running flags instead.
    pub fn terminate_with_timeout(&self, timeout: Duration) -> Result<()> {
        let inner = &self.inner;
        if !inner.task_run.load(Ordering::Acquire) {
            tracing::debug!("element '{}' has no worker to terminate", self.tag());
            return Ok(());
        }
        if inner.task_stack == 0 {
            inner.task_run.store(false, Ordering::Release);
            inner.is_running.store(false, Ordering::Release);
            return Ok(());
        }
        inner.signals.task_destroyed.clear();
        inner.commands.send(Command::Destroy)?;
        if !inner.signals.task_destroyed.wait_timeout(timeout) {
            tracing::warn!("element '{}' worker destroy timed out", self.tag());
            return Err(Error::Timeout);
        }
        if let Some(handle) = inner.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        tracing::debug!("element '{}' worker destroyed", self.tag());
        Ok(())
    }

    /// Request the PAUSED state and wait for the worker to acknowledge.
    ///
    /// A no-op returning `Ok` when the state is already paused or beyond.
    pub fn pause(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.task_run.load(Ordering::Acquire) {
            return Err(Error::InvalidState(format!(
                "element '{}' was never run",
                self.tag()
            )));
        }
        if self.state() >= State::Paused {
            tracing::debug!("element '{}' already paused or beyond", self.tag());
            return Ok(());
        }
        inner.signals.paused.clear();
        if inner.task_stack == 0 {
            inner.is_running.store(false, Ordering::Release);
            inner.state.store(State::Paused);
            return Ok(());
        }
        inner.commands.set_wait_mode(WaitMode::Block);
        inner.commands.send(Command::Pause)?;
        if !inner.signals.paused.wait_timeout(DEFAULT_CONTROL_TIMEOUT) {
            return Err(Error::Timeout);
        }
        Ok(())
    }

    /// Request the RUNNING state.
    ///
    /// No-op when already RUNNING; fails fast when never run or in ERROR; for
    /// FINISHED, reports FINISHED again and returns `Ok` without restarting.
    /// Otherwise sends RESUME, waits on the RESUMED signal up to `timeout`,
    /// and — when `threshold` is non-zero and the primary input is not a
    /// callback port — additionally blocks until the output fill level crosses
    /// `threshold * input capacity`.
    pub fn resume(&self, threshold: f32, timeout: Duration) -> Result<()> {
        let inner = &self.inner;
        if !inner.task_run.load(Ordering::Acquire) {
            return Err(Error::InvalidState(format!(
                "element '{}' was never run",
                self.tag()
            )));
        }
        if self.state() == State::Running {
            self.report_status(Status::StateRunning);
            tracing::debug!("element '{}' already running", self.tag());
            return Ok(());
        }
        if inner.task_stack == 0 {
            inner.is_running.store(true, Ordering::Release);
            inner.state.store(State::Running);
            self.report_status(Status::StateRunning);
            return Ok(());
        }
        match self.state() {
            State::Error => {
                return Err(Error::InvalidState(format!(
                    "element '{}' is in the error state",
                    self.tag()
                )));
            }
            State::Finished => {
                tracing::debug!("element '{}' already finished", self.tag());
                self.report_status(Status::StateFinished);
                return Ok(());
            }
            _ => {}
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidArg(format!(
                "resume threshold {} outside 0..=1",
                threshold
            )));
        }
        inner.signals.resumed.clear();
        inner.commands.send(Command::Resume)?;
        if !inner.signals.resumed.wait_timeout(timeout) {
            tracing::warn!("element '{}' resume timed out", self.tag());
            return Err(Error::Timeout);
        }
        if threshold != 0.0 && self.input_port_type() != PortType::Callback {
            if let Some(in_port) = self.input_port() {
                let expect = (in_port.capacity() as f32 * threshold) as usize;
                self.wait_for_buffer(expect, timeout)?;
            }
        }
        Ok(())
    }

    /// Request a stop: abort both port directions, then send STOP.
    ///
    /// The port aborts unblock any in-flight read/write immediately, so the
    /// worker reaches command processing instead of staying stuck on data. A
    /// second concurrent `stop()` is a no-op thanks to the `stopping` guard.
    pub fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.task_run.load(Ordering::Acquire) {
            tracing::debug!("element '{}' has no worker to stop", self.tag());
            return Ok(());
        }
        // A paused element has is_running cleared but still needs the command
        // round-trip to reach STOPPED.
        if !inner.is_running.load(Ordering::Acquire) && self.state() != State::Paused {
            inner.signals.stopped.set();
            self.report_status(Status::StateStopped);
            tracing::debug!("element '{}' already stopped", self.tag());
            return Ok(());
        }
        self.abort_output_port();
        self.abort_input_port();
        if self.state() == State::Running {
            inner.signals.stopped.clear();
        }
        if inner.task_stack == 0 {
            inner.is_running.store(false, Ordering::Release);
            inner.state.store(State::Stopped);
            inner.signals.stopped.set();
            self.report_status(Status::StateStopped);
            return Ok(());
        }
        if self.state() == State::Paused {
            // The worker idles in indefinite command wait while paused; switch
            // to poll so STOP is observed on the very next loop pass.
            inner.commands.set_wait_mode(WaitMode::Poll);
        }
        if inner.stopping.swap(true, Ordering::AcqRel) {
            tracing::debug!("element '{}' stop already in flight", self.tag());
            return Ok(());
        }
        if let Err(e) = inner.commands.send(Command::Stop) {
            inner.stopping.store(false, Ordering::Release);
            tracing::warn!("element '{}' stop command send failed: {}", self.tag(), e);
            return Err(e);
        }
        tracing::debug!("element '{}' stop command sent", self.tag());
        Ok(())
    }

    /// Wait [`DEFAULT_CONTROL_TIMEOUT`] for the worker to reach a stopped
    /// resting point.
    pub fn wait_for_stop(&self) -> Result<()> {
        self.wait_for_stop_timeout(DEFAULT_CONTROL_TIMEOUT)
    }

    /// Wait up to `timeout` for the worker to reach a stopped resting point.
    /// Returns `Ok` immediately when the element is not running.
    pub fn wait_for_stop_timeout(&self, timeout: Duration) -> Result<()> {
        if !self.inner.is_running.load(Ordering::Acquire) {
            tracing::debug!("element '{}' already stopped, not waiting", self.tag());
            return Ok(());
        }
        if self.inner.signals.stopped.wait_timeout(timeout) {
            Ok(())
        } else {
            Err(Error::Timeout)
        }
    }

    /// Delegate to the user `seek` callback.
    pub fn seek(&self, in_data: &[u8], out_data: &mut [u8]) -> Result<usize> {
        let mut callbacks = self.inner.callbacks.lock().unwrap();
        match callbacks.seek.as_mut() {
            Some(seek) => seek(self, in_data, out_data),
            None => Err(Error::NotSupported),
        }
    }

    // ------------------------------------------------------------------
    // State and identity
    // ------------------------------------------------------------------

    /// Current state.
    pub fn state(&self) -> State {
        self.inner.state.load()
    }

    /// Force the state machine back to INIT.
    ///
    /// Called from `process` before returning DONE to request a re-open
    /// instead of a FINISH.
    pub fn reset_state(&self) {
        self.inner.state.store(State::Init);
    }

    /// Whether a stop request is in flight.
    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::Acquire)
    }

    /// Whether the element is logically streaming (quanta are attempted).
    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.inner.is_running.store(running, Ordering::Release);
    }

    /// Whether a worker task exists (or a stack-less element was started).
    pub fn task_run(&self) -> bool {
        self.inner.task_run.load(Ordering::Acquire)
    }

    pub(crate) fn set_task_run(&self, run: bool) {
        self.inner.task_run.store(run, Ordering::Release);
    }

    pub(crate) fn clear_stopping(&self) {
        self.inner.stopping.store(false, Ordering::Release);
    }

    /// Display tag.
    pub fn tag(&self) -> String {
        self.inner.tag.lock().unwrap().clone()
    }

    /// Replace the display tag.
    pub fn set_tag(&self, tag: impl Into<String>) {
        *self.inner.tag.lock().unwrap() = tag.into();
    }

    /// Attach an opaque user context.
    pub fn set_data(&self, data: Arc<dyn Any + Send + Sync>) {
        *self.inner.user_data.lock().unwrap() = Some(data);
    }

    /// Retrieve the opaque user context.
    pub fn data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.user_data.lock().unwrap().clone()
    }

    // ------------------------------------------------------------------
    // Info record
    // ------------------------------------------------------------------

    /// Replace the whole info record.
    pub fn set_info(&self, info: StreamInfo) {
        *self.inner.info.lock().unwrap() = info;
    }

    /// Snapshot the info record.
    pub fn info(&self) -> StreamInfo {
        self.inner.info.lock().unwrap().clone()
    }

    /// Set the stream URI.
    pub fn set_uri(&self, uri: Option<String>) {
        self.inner.info.lock().unwrap().uri = uri;
    }

    /// Current stream URI.
    pub fn uri(&self) -> Option<String> {
        self.inner.info.lock().unwrap().uri.clone()
    }

    /// Overwrite the byte position.
    pub fn set_byte_pos(&self, pos: i64) {
        self.inner.info.lock().unwrap().byte_pos = pos;
    }

    /// Advance the byte position.
    pub fn update_byte_pos(&self, delta: i64) {
        self.inner.info.lock().unwrap().byte_pos += delta;
    }

    /// Overwrite the total byte count.
    pub fn set_total_bytes(&self, total: i64) {
        self.inner.info.lock().unwrap().total_bytes = total;
    }

    /// Advance the total byte count.
    pub fn update_total_bytes(&self, delta: i64) {
        self.inner.info.lock().unwrap().total_bytes += delta;
    }

    /// Set the bitrate.
    pub fn set_bitrate(&self, bitrate: u32) {
        self.inner.info.lock().unwrap().bitrate = bitrate;
    }

    /// Set the codec identifier.
    pub fn set_codec(&self, codec: CodecFormat) {
        self.inner.info.lock().unwrap().codec = codec;
    }

    /// Set sample rate, channel count, and bit width together.
    pub fn set_music_info(&self, sample_rate: u32, channels: u16, bits: u16) {
        let mut info = self.inner.info.lock().unwrap();
        info.sample_rate = sample_rate;
        info.channels = channels;
        info.bits = bits;
    }

    /// Set the stream duration in milliseconds.
    pub fn set_duration(&self, duration_ms: u32) {
        self.inner.info.lock().unwrap().duration_ms = duration_ms;
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Install a callback that replaces the listener fan-out.
    pub fn set_event_callback(&self, callback: EventCallback) {
        self.inner.events.set_callback(callback);
    }

    /// Attach a listener to this element's events.
    pub fn set_listener(&self, listener: &EventListener) {
        self.inner.events.add_listener(listener);
    }

    /// Detach a listener.
    pub fn remove_listener(&self, listener: &EventListener) {
        self.inner.events.remove_listener(listener.id());
    }

    pub(crate) fn remove_listener_by_id(&self, id: u64) {
        self.inner.events.remove_listener(id);
    }

    /// Broadcast a status event.
    pub fn report_status(&self, status: Status) {
        tracing::trace!("element '{}' reports {:?}", self.tag(), status);
        self.inner.events.broadcast(ElementEvent::Status {
            element: self.tag(),
            status,
        });
    }

    /// Broadcast a stream-information snapshot.
    pub fn report_info(&self) {
        self.inner.events.broadcast(ElementEvent::Info {
            element: self.tag(),
            info: self.info(),
        });
    }

    /// Broadcast a codec-format announcement.
    pub fn report_codec_format(&self) {
        self.inner.events.broadcast(ElementEvent::CodecFormat {
            element: self.tag(),
            info: self.info(),
        });
    }

    /// Broadcast a position report.
    pub fn report_position(&self) {
        self.inner.events.broadcast(ElementEvent::Position {
            element: self.tag(),
            info: self.info(),
        });
    }

    // ------------------------------------------------------------------
    // Port wiring
    // ------------------------------------------------------------------

    /// Install (or clear) the primary input port.
    pub fn set_input_port(&self, port: Option<SharedPort>) {
        if let Some(port) = &port {
            *self.inner.in_type.lock().unwrap() = port.port_type();
        }
        *self.inner.in_port.lock().unwrap() = port;
    }

    /// The primary input port.
    pub fn input_port(&self) -> Option<SharedPort> {
        self.inner.in_port.lock().unwrap().clone()
    }

    /// Install (or clear) the primary output port.
    pub fn set_output_port(&self, port: Option<SharedPort>) {
        if let Some(port) = &port {
            *self.inner.out_type.lock().unwrap() = port.port_type();
        }
        *self.inner.out_port.lock().unwrap() = port;
    }

    /// The primary output port.
    pub fn output_port(&self) -> Option<SharedPort> {
        self.inner.out_port.lock().unwrap().clone()
    }

    /// Declared type of the primary input port.
    pub fn input_port_type(&self) -> PortType {
        *self.inner.in_type.lock().unwrap()
    }

    /// Declared type of the primary output port.
    pub fn output_port_type(&self) -> PortType {
        *self.inner.out_type.lock().unwrap()
    }

    /// Override the declared input port type.
    pub fn set_input_port_type(&self, port_type: PortType) {
        *self.inner.in_type.lock().unwrap() = port_type;
    }

    /// Override the declared output port type.
    pub fn set_output_port_type(&self, port_type: PortType) {
        *self.inner.out_type.lock().unwrap() = port_type;
    }

    /// Install a secondary input port at `index`.
    pub fn set_multi_input_port(&self, index: usize, port: Option<SharedPort>) -> Result<()> {
        let mut ports = self.inner.multi_in.lock().unwrap();
        if index >= ports.len() {
            return Err(Error::PortIndex {
                index,
                max: ports.len(),
            });
        }
        ports[index] = port;
        Ok(())
    }

    /// Install a secondary output port at `index`.
    pub fn set_multi_output_port(&self, index: usize, port: Option<SharedPort>) -> Result<()> {
        let mut ports = self.inner.multi_out.lock().unwrap();
        if index >= ports.len() {
            return Err(Error::PortIndex {
                index,
                max: ports.len(),
            });
        }
        ports[index] = port;
        Ok(())
    }

    /// The secondary input port at `index`.
    pub fn multi_input_port(&self, index: usize) -> Option<SharedPort> {
        self.inner.multi_in.lock().unwrap().get(index)?.clone()
    }

    /// The secondary output port at `index`.
    pub fn multi_output_port(&self, index: usize) -> Option<SharedPort> {
        self.inner.multi_out.lock().unwrap().get(index)?.clone()
    }

    /// Number of secondary input slots configured at init time.
    pub fn multi_input_count(&self) -> usize {
        self.inner.multi_in.lock().unwrap().len()
    }

    /// Number of secondary output slots configured at init time.
    pub fn multi_output_count(&self) -> usize {
        self.inner.multi_out.lock().unwrap().len()
    }

    /// Set the budget for primary-input reads (`None` = wait forever).
    pub fn set_input_timeout(&self, timeout: Option<Duration>) {
        *self.inner.input_timeout.lock().unwrap() = timeout;
    }

    /// Set the budget for primary-output writes (`None` = wait forever).
    pub fn set_output_timeout(&self, timeout: Option<Duration>) {
        *self.inner.output_timeout.lock().unwrap() = timeout;
    }

    /// Byte capacity configured for a stream-type output.
    pub fn output_stream_capacity(&self) -> Result<usize> {
        match *self.inner.out_cfg.lock().unwrap() {
            OutputBufferCfg::Stream { capacity, .. } => Ok(capacity),
            _ => Err(Error::PortType("output is not stream-type".into())),
        }
    }

    /// Reconfigure the byte capacity used when a stream-type output port is
    /// created for this element.
    pub fn set_output_stream_capacity(&self, capacity: usize) -> Result<()> {
        match &mut *self.inner.out_cfg.lock().unwrap() {
            OutputBufferCfg::Stream { capacity: c, .. } => {
                *c = capacity;
                Ok(())
            }
            _ => Err(Error::PortType("output is not stream-type".into())),
        }
    }

    /// Node geometry configured for a block-type output.
    pub fn output_block_geometry(&self) -> Result<(usize, usize)> {
        match *self.inner.out_cfg.lock().unwrap() {
            OutputBufferCfg::Block {
                node_size,
                node_count,
                ..
            } => Ok((node_size, node_count)),
            _ => Err(Error::PortType("output is not block-type".into())),
        }
    }

    /// Reconfigure the node geometry used when a block-type output port is
    /// created for this element.
    pub fn set_output_block_geometry(&self, node_size: usize, node_count: usize) -> Result<()> {
        match &mut *self.inner.out_cfg.lock().unwrap() {
            OutputBufferCfg::Block {
                node_size: s,
                node_count: c,
                ..
            } => {
                *s = node_size;
                *c = node_count;
                Ok(())
            }
            _ => Err(Error::PortType("output is not block-type".into())),
        }
    }

    // ------------------------------------------------------------------
    // Port fan-out helpers
    // ------------------------------------------------------------------

    fn input_ports(&self) -> SmallVec<[SharedPort; 4]> {
        let mut ports = SmallVec::new();
        if let Some(primary) = self.inner.in_port.lock().unwrap().clone() {
            ports.push(primary);
            for port in self.inner.multi_in.lock().unwrap().iter().flatten() {
                ports.push(port.clone());
            }
        }
        ports
    }

    fn output_ports(&self) -> SmallVec<[SharedPort; 4]> {
        let mut ports = SmallVec::new();
        if let Some(primary) = self.inner.out_port.lock().unwrap().clone() {
            ports.push(primary);
            for port in self.inner.multi_out.lock().unwrap().iter().flatten() {
                ports.push(port.clone());
            }
        }
        ports
    }

    /// Reset the primary input port and every configured secondary input.
    pub fn reset_input_port(&self) {
        for port in self.input_ports() {
            port.reset();
        }
    }

    /// Reset the primary output port and every configured secondary output.
    pub fn reset_output_port(&self) {
        for port in self.output_ports() {
            port.reset();
        }
    }

    /// Abort the primary input port and every configured secondary input.
    pub fn abort_input_port(&self) {
        for port in self.input_ports() {
            port.abort();
        }
    }

    /// Abort the primary output port and every configured secondary output.
    pub fn abort_output_port(&self) {
        for port in self.output_ports() {
            port.abort();
        }
    }

    /// Mark the output side finished on the primary port and every configured
    /// secondary output.
    pub fn set_port_done(&self) {
        for port in self.output_ports() {
            port.write_done();
        }
    }

    // ------------------------------------------------------------------
    // Data path
    // ------------------------------------------------------------------

    /// Pull input from the primary input port, honoring the configured input
    /// timeout. Called by `process` callbacks.
    pub fn input(&self, buf: &mut [u8]) -> IoStatus {
        let Some(port) = self.input_port() else {
            tracing::error!("element '{}' has no input port", self.tag());
            return IoStatus::Fail;
        };
        let timeout = *self.inner.input_timeout.lock().unwrap();
        let status = port.read(buf, timeout);
        match status {
            IoStatus::Bytes(_) => {}
            IoStatus::Abort => tracing::warn!("in-[{}] abort", self.tag()),
            IoStatus::Ok | IoStatus::Done => tracing::debug!("in-[{}] done", self.tag()),
            IoStatus::Timeout => tracing::trace!("in-[{}] timeout", self.tag()),
            IoStatus::Fail | IoStatus::ProcessFail => {
                tracing::error!("in-[{}] read failed", self.tag());
                self.report_status(Status::ErrorInput);
            }
        }
        status
    }

    /// Push output to the primary output port, honoring the configured output
    /// timeout and firing the backpressure signal when the fill level crosses
    /// the watermark. Called by `process` callbacks.
    pub fn output(&self, buf: &[u8]) -> IoStatus {
        if buf.is_empty() {
            return IoStatus::Bytes(0);
        }
        let Some(port) = self.output_port() else {
            return IoStatus::Bytes(0);
        };
        let timeout = *self.inner.output_timeout.lock().unwrap();
        let status = port.write(buf, timeout);

        let watermark = match *self.inner.out_cfg.lock().unwrap() {
            OutputBufferCfg::Stream { watermark, .. } => Some(watermark),
            OutputBufferCfg::Block { watermark, .. } => Some(watermark),
            OutputBufferCfg::Callback => None,
        };
        if let Some(watermark) = watermark {
            let failed = !matches!(status, IoStatus::Bytes(_));
            if port.filled() > watermark || failed {
                self.inner.signals.buffer_reach_level.set();
            }
        }

        match status {
            IoStatus::Bytes(_) => {}
            IoStatus::Abort => tracing::warn!("out-[{}] abort", self.tag()),
            IoStatus::Ok | IoStatus::Done => tracing::debug!("out-[{}] done", self.tag()),
            IoStatus::Timeout => tracing::warn!("out-[{}] timeout", self.tag()),
            IoStatus::Fail | IoStatus::ProcessFail => {
                tracing::error!("out-[{}] write failed", self.tag());
                self.report_status(Status::ErrorOutput);
            }
        }
        status
    }

    /// Read from the secondary input port at `index`, propagating its status
    /// unchanged.
    pub fn multi_input(&self, buf: &mut [u8], index: usize, timeout: Option<Duration>) -> IoStatus {
        let count = self.multi_input_count();
        if index >= count {
            tracing::error!(
                "element '{}' multi-input index {} out of range (max {})",
                self.tag(),
                index,
                count
            );
            return IoStatus::Fail;
        }
        match self.multi_input_port(index) {
            Some(port) => port.read(buf, timeout),
            None => IoStatus::Fail,
        }
    }

    /// Write to every populated secondary output port.
    ///
    /// Returns `Bytes` only when every populated branch accepted the write;
    /// the first failing branch's status is returned instead (remaining
    /// branches are still written). Absent slots are skipped silently.
    pub fn multi_output(&self, buf: &[u8], timeout: Option<Duration>) -> IoStatus {
        let ports: SmallVec<[SharedPort; 4]> = self
            .inner
            .multi_out
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .cloned()
            .collect();
        let mut first_failure = None;
        for port in &ports {
            let status = port.write(buf, timeout);
            if !matches!(status, IoStatus::Bytes(_)) && first_failure.is_none() {
                tracing::warn!(
                    "element '{}' multi-output branch '{}' failed: {:?}",
                    self.tag(),
                    port.tag(),
                    status
                );
                first_failure = Some(status);
            }
        }
        first_failure.unwrap_or(IoStatus::Bytes(buf.len()))
    }

    // ------------------------------------------------------------------
    // Backpressure
    // ------------------------------------------------------------------

    /// Wait until the output fill level reaches `size_expect` (bytes for
    /// stream outputs, nodes for block outputs) or `timeout` elapses.
    ///
    /// Always fails immediately on callback-type outputs, which have no
    /// backpressure signal.
    pub fn wait_for_buffer(&self, size_expect: usize, timeout: Duration) -> Result<()> {
        match &mut *self.inner.out_cfg.lock().unwrap() {
            OutputBufferCfg::Stream { watermark, .. } => *watermark = size_expect,
            OutputBufferCfg::Block { watermark, .. } => *watermark = size_expect,
            OutputBufferCfg::Callback => {
                tracing::error!(
                    "element '{}' callback output does not support wait_for_buffer",
                    self.tag()
                );
                return Err(Error::NotSupported);
            }
        }
        let Some(port) = self.output_port() else {
            return Err(Error::InvalidState(format!(
                "element '{}' has no output port",
                self.tag()
            )));
        };
        // The signal may fire for writes that predate the new watermark, so
        // the fill level is re-checked after every wakeup.
        let deadline = std::time::Instant::now() + timeout;
        loop {
            self.inner.signals.buffer_reach_level.clear();
            if port.filled() >= size_expect {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() || !self.inner.signals.buffer_reach_level.wait_timeout(remaining)
            {
                return Err(Error::Timeout);
            }
        }
    }
}
