//! # Cadenza
//!
//! A streaming element engine for assembling audio processing chains
//! (capture → echo-cancel → encode → transport, and transport → decode →
//! render).
//!
//! Each [`Element`](element::Element) is a per-node state machine driven by a
//! cooperative worker: it exchanges data with its neighbors through pluggable
//! bounded ports, is remotely controlled (pause/resume/stop/destroy) through an
//! asynchronous command channel, and concurrently reports status events to any
//! number of listeners.
//!
//! ## Features
//!
//! - **Uniform backpressure** across three buffer flavors: byte stream ports,
//!   fixed-size block ports, and direct-callback ports
//! - **Bounded-latency control**: PAUSE/STOP/DESTROY observed within one
//!   process quantum, even while the data path is blocked
//! - **Exactly-once lifecycle**: every successful `open` is matched by exactly
//!   one `close` before the worker exits
//! - **Stack-less elements**: pass-through adapters run inline in the caller,
//!   no worker thread
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cadenza::prelude::*;
//!
//! let mut config = ElementConfig::new("tone");
//! config.process = Some(Box::new(|el, buf| {
//!     buf.fill(0);
//!     el.output(buf)
//! }));
//! let tone = Element::init(config)?;
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.register(&tone, "tone");
//! pipeline.register(&sink, "sink");
//! pipeline.link(&["tone", "sink"])?;
//! pipeline.run()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod element;
pub mod error;
pub mod event;
pub mod info;
pub mod io;
pub mod pipeline;
pub mod port;
pub mod signal;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::element::{Element, ElementConfig, State};
    pub use crate::error::{Error, Result};
    pub use crate::event::{ElementEvent, EventListener, Status};
    pub use crate::info::{CodecFormat, StreamInfo};
    pub use crate::io::IoStatus;
    pub use crate::pipeline::Pipeline;
    pub use crate::port::{BlockPort, CallbackPort, Port, PortType, StreamPort};
}

pub use error::{Error, Result};
