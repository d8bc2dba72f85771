//! Pipeline runtime on top of GStreamer.
//!
//! A launch description is handed to `gst::parse::launch`. A single
//! executor thread drives the GStreamer pipeline through its lifecycle,
//! forwards its bus and talks to the controller over channels. Sink events
//! are produced on GStreamer's streaming threads by appsink callbacks.
//!
//! ```text
//! controller ──ControlCommand──► executor ──set_state──► gst::Pipeline
//!      ▲                            │                        │
//!      └────────BusMessage──────────┴◄──────gst::Bus─────────┘
//! ```

pub mod bridge;
pub(crate) mod executor;
pub mod graph;
pub(crate) mod sink;
pub mod state;

pub use bridge::{BusMessage, ControlBridge, ControlCommand};
pub use graph::Graph;
pub use state::{PipelineState, StateSnapshot};

use crate::error::{FrameportError, Result};
use gstreamer as gst;

/// Initialize GStreamer. Safe to call any number of times.
pub fn init() -> Result<()> {
    gst::init().map_err(|e| FrameportError::Graph(format!("GStreamer init failed: {}", e)))
}
