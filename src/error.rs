//! Error types for Cadenza.

use thiserror::Error;

/// Result type alias using Cadenza's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Cadenza operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The operation is not valid in the element's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A bounded wait expired before the expected signal arrived.
    #[error("operation timed out")]
    Timeout,

    /// The element does not implement the requested operation.
    #[error("not supported")]
    NotSupported,

    /// A secondary-port index is outside the array configured at init time.
    #[error("port index {index} out of range (max {max})")]
    PortIndex {
        /// The index that was requested.
        index: usize,
        /// The number of configured slots.
        max: usize,
    },

    /// The operation applies to a different port type than the one configured.
    #[error("wrong port type: {0}")]
    PortType(String),

    /// The command queue is full; the worker is not draining commands.
    #[error("command channel full")]
    ChannelFull,

    /// The command queue or an event channel has been torn down.
    #[error("channel closed")]
    ChannelClosed,

    /// Invalid argument passed to a control operation.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// The worker task could not be spawned.
    #[error("failed to spawn worker task: {0}")]
    TaskSpawn(String),

    /// A user callback reported failure.
    #[error("element '{element}' failed: {reason}")]
    Element {
        /// Tag of the failing element.
        element: String,
        /// What went wrong.
        reason: String,
    },
}
