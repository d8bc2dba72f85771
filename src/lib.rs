//! # frameport: media pipeline control and zero-copy frame delivery
//!
//! Drives a GStreamer pipeline through its lifecycle, reports
//! per-sink events to registered callbacks and hands video frames to a
//! consumer through a lock-free frame slot.
//!
//! ## Architecture
//!
//! - **Controller**: owns the pipeline and the frame slot, accepts fire-and-forget
//!   state requests ([`PipelineController`])
//! - **Executor**: a dedicated thread driving the pipeline's state and
//!   forwarding its bus
//! - **Streaming**: GStreamer's own streaming threads run appsink callbacks
//!   and pad probes, dispatching sink events and caps probes synchronously
//! - **Frame slot**: a triple buffer shared by the frame sink (writer) and
//!   the consumer's poll path (reader)
//! - **Communication**: crossbeam channels between the controller and the executor
//!
//! ## Example
//!
//! ```ignore
//! use frameport::{PipelineController, PipelineState, PlayerConfig};
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     frameport::logging::init();
//!     let mut player = PipelineController::new(PlayerConfig::default())?;
//!     player.build_pipeline(
//!         "videotestsrc num-buffers=100 ! video/x-raw,width=640,height=480,format=I420 ! appsink name=sink",
//!     )?;
//!     player.register_sink_callback("sink", |event| {
//!         println!("{}", event.name());
//!         Ok(())
//!     })?;
//!     player.set_state(PipelineState::Playing);
//!     player.wait_for_state(PipelineState::Playing, Duration::from_secs(5))?;
//!     if let Some(frame) = player.get_frame() {
//!         println!("frame {} is {}x{}", frame.sequence, frame.width, frame.height);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod probe;

// Re-export commonly used types
pub use config::PlayerConfig;
pub use controller::PipelineController;
pub use dispatch::{event_channel, SinkCallback, SinkDispatcher, SinkEvent};
pub use error::{FrameportError, Result, ResultExt};
pub use frame::{frame_callback, Frame, OwnedFrame, SharedMemoryDescriptor};
pub use media::{AudioFormat, AudioInfo, MediaInfo, VideoFormat, VideoInfo};
pub use pipeline::{BusMessage, PipelineState, StateSnapshot};
pub use probe::{CapsProbeCallback, CapsProbeRegistry};

pub use gstreamer as gst;
