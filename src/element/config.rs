//! Element configuration: user callbacks, execution parameters, port layout.

use crate::element::Element;
use crate::error::Result;
use crate::io::IoStatus;
use crate::port::{PortType, ReadCallback, WriteCallback};

/// Default working-buffer length handed to `process`.
pub const DEFAULT_BUFFER_LEN: usize = 2 * 1024;
/// Default worker stack size in bytes.
pub const DEFAULT_TASK_STACK: usize = 64 * 1024;
/// Default byte capacity of a stream-type output buffer.
pub const DEFAULT_STREAM_BUF_SIZE: usize = 4 * 1024;
/// Default node size of a block-type output buffer.
pub const DEFAULT_BLOCK_NODE_SIZE: usize = 1024;
/// Default node count of a block-type output buffer.
pub const DEFAULT_BLOCK_NODE_COUNT: usize = 4;

/// `open` callback: prepare the element for streaming.
///
/// Returning [`IoStatus::Ok`] (or bytes) enters RUNNING; [`IoStatus::Done`]
/// enters RUNNING without signalling STARTED; [`IoStatus::Abort`] stops the
/// element; anything else is an open error.
pub type OpenCallback = Box<dyn FnMut(&Element) -> IoStatus + Send>;

/// `process` callback: one streaming quantum over the working buffer.
pub type ProcessCallback = Box<dyn FnMut(&Element, &mut [u8]) -> IoStatus + Send>;

/// `close` callback: release what `open` acquired.
pub type CloseCallback = Box<dyn FnMut(&Element) -> Result<()> + Send>;

/// `destroy` callback: release what the element owned for its whole life.
pub type DestroyCallback = Box<dyn FnMut(&Element) -> Result<()> + Send>;

/// Optional `seek` callback.
pub type SeekCallback = Box<dyn FnMut(&Element, &[u8], &mut [u8]) -> Result<usize> + Send>;

/// The user-supplied behavior of an element.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub open: Option<OpenCallback>,
    pub process: Option<ProcessCallback>,
    pub close: Option<CloseCallback>,
    pub destroy: Option<DestroyCallback>,
    pub seek: Option<SeekCallback>,
}

/// Output buffer geometry keyed by the output port type.
///
/// The watermark is the backpressure threshold for `wait_for_buffer`: bytes
/// for stream outputs, nodes for block outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputBufferCfg {
    Callback,
    Stream { capacity: usize, watermark: usize },
    Block { node_size: usize, node_count: usize, watermark: usize },
}

impl OutputBufferCfg {
    pub(crate) fn from_config(config: &ElementConfig) -> Self {
        match config.out_type {
            PortType::Callback => OutputBufferCfg::Callback,
            PortType::Stream => {
                let capacity = if config.out_block_size > 0 && config.out_block_num > 0 {
                    config.out_block_size * config.out_block_num
                } else {
                    DEFAULT_STREAM_BUF_SIZE
                };
                OutputBufferCfg::Stream {
                    capacity,
                    watermark: 0,
                }
            }
            PortType::Block => {
                let (node_size, node_count) =
                    if config.out_block_size > 0 && config.out_block_num > 0 {
                        (config.out_block_size, config.out_block_num)
                    } else {
                        (DEFAULT_BLOCK_NODE_SIZE, DEFAULT_BLOCK_NODE_COUNT)
                    };
                OutputBufferCfg::Block {
                    node_size,
                    node_count,
                    watermark: 0,
                }
            }
        }
    }
}

/// Configuration consumed by [`Element::init`].
///
/// Field defaults mirror the engine's stock element: a 2 KiB working buffer,
/// a dedicated worker, stream-type ports, and no secondary ports. Stack size 0
/// makes the element stack-less (it runs inline in the caller and never spawns
/// a worker).
pub struct ElementConfig {
    /// Display tag.
    pub tag: String,
    /// `open` callback; elements without one start immediately on `run()`.
    pub open: Option<OpenCallback>,
    /// `process` callback driving one quantum per worker iteration.
    pub process: Option<ProcessCallback>,
    /// `close` callback.
    pub close: Option<CloseCallback>,
    /// `destroy` callback, invoked by `deinit`.
    pub destroy: Option<DestroyCallback>,
    /// Optional `seek` callback.
    pub seek: Option<SeekCallback>,
    /// Read closure; installs an owned callback-type input port.
    pub read: Option<ReadCallback>,
    /// Write closure; installs an owned callback-type output port.
    pub write: Option<WriteCallback>,
    /// Working-buffer length handed to `process`.
    pub buffer_len: usize,
    /// Worker stack size in bytes; 0 runs the element inline.
    pub task_stack: usize,
    /// Best-effort SCHED_FIFO priority for the worker.
    pub task_priority: Option<i32>,
    /// Best-effort CPU pin for the worker.
    pub task_core: Option<usize>,
    /// Number of secondary input port slots.
    pub multi_in_ports: usize,
    /// Number of secondary output port slots.
    pub multi_out_ports: usize,
    /// Primary input port type.
    pub in_type: PortType,
    /// Primary output port type.
    pub out_type: PortType,
    /// Output block size (bytes per node, or a factor of the stream capacity).
    pub out_block_size: usize,
    /// Output block count.
    pub out_block_num: usize,
}

impl ElementConfig {
    /// Create a configuration with stock defaults and the given tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            open: None,
            process: None,
            close: None,
            destroy: None,
            seek: None,
            read: None,
            write: None,
            buffer_len: DEFAULT_BUFFER_LEN,
            task_stack: DEFAULT_TASK_STACK,
            task_priority: None,
            task_core: None,
            multi_in_ports: 0,
            multi_out_ports: 0,
            in_type: PortType::Stream,
            out_type: PortType::Stream,
            out_block_size: 0,
            out_block_num: 0,
        }
    }

    pub(crate) fn take_callbacks(&mut self) -> Callbacks {
        Callbacks {
            open: self.open.take(),
            process: self.process.take(),
            close: self.close.take(),
            destroy: self.destroy.take(),
            seek: self.seek.take(),
        }
    }
}

impl Default for ElementConfig {
    fn default() -> Self {
        Self::new("unknown")
    }
}
