//! Configuration module for frameport
//!
//! A [`PlayerConfig`] is handed to the controller at construction. It can be
//! built in code, or loaded from a TOML file:
//!
//! ```toml
//! [frame_slot]
//! name = "/my-player"
//! capacity_bytes = 8294400
//! max_capacity_bytes = 268435456
//! allow_resize = true
//!
//! [pipeline]
//! preroll_timeout_ms = 5000
//! poll_interval_ms = 5
//! frame_sink = "sink"
//!
//! [dispatch]
//! event_channel_capacity = 64
//! ```
//!
//! Every field has a default, so partial files are accepted.

use crate::error::{FrameportError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default frame slot capacity: one 1920x1080 RGBA frame
pub const DEFAULT_SLOT_CAPACITY: usize = 1920 * 1080 * 4;

/// Default ceiling for slot growth: 256 MiB
pub const DEFAULT_MAX_SLOT_CAPACITY: usize = 256 * 1024 * 1024;

/// Default time allowed for every sink to preroll on READY→PAUSED
pub const DEFAULT_PREROLL_TIMEOUT_MS: u64 = 5000;

/// Default period at which the executor checks commands and the pipeline bus
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5;

/// Default bound of the channel hand-off adapter
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Complete controller configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Frame slot sizing and naming
    pub frame_slot: FrameSlotConfig,

    /// State machine timing and sink selection
    pub pipeline: PipelineConfig,

    /// Sink event dispatch
    pub dispatch: DispatchConfig,
}

/// Frame slot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSlotConfig {
    /// Explicit region name. A unique name is generated when absent.
    pub name: Option<String>,

    /// Initial capacity in bytes
    pub capacity_bytes: usize,

    /// The slot never grows beyond this many bytes
    pub max_capacity_bytes: usize,

    /// Grow the slot when a renegotiation needs more room.
    /// When false, oversized frames are dropped from the poll path.
    pub allow_resize: bool,
}

impl Default for FrameSlotConfig {
    fn default() -> Self {
        Self {
            name: None,
            capacity_bytes: DEFAULT_SLOT_CAPACITY,
            max_capacity_bytes: DEFAULT_MAX_SLOT_CAPACITY,
            allow_resize: true,
        }
    }
}

/// Pipeline executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub preroll_timeout_ms: u64,
    pub poll_interval_ms: u64,

    /// Name of the appsink that feeds the frame slot.
    /// Defaults to the first appsink that receives raw video.
    pub frame_sink: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preroll_timeout_ms: DEFAULT_PREROLL_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            frame_sink: None,
        }
    }
}

impl PipelineConfig {
    pub fn preroll_timeout(&self) -> Duration {
        Duration::from_millis(self.preroll_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Dispatch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub event_channel_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl PlayerConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PlayerConfig = toml::from_str(text)
            .map_err(|e| FrameportError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(FrameportError::from)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        Self::from_toml_str(&text)
    }

    /// Save the configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| FrameportError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), text)?;
        tracing::info!("Saved config to {:?}", path.as_ref());
        Ok(())
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.frame_slot.capacity_bytes == 0 {
            return Err(FrameportError::Config(
                "frame_slot.capacity_bytes must be non-zero".to_string(),
            ));
        }
        if self.frame_slot.max_capacity_bytes < self.frame_slot.capacity_bytes {
            return Err(FrameportError::Config(
                "frame_slot.max_capacity_bytes must be at least capacity_bytes".to_string(),
            ));
        }
        if let Some(name) = &self.frame_slot.name {
            if name.is_empty() {
                return Err(FrameportError::Config(
                    "frame_slot.name must not be empty".to_string(),
                ));
            }
        }
        if self.pipeline.preroll_timeout_ms == 0 {
            return Err(FrameportError::Config(
                "pipeline.preroll_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.pipeline.poll_interval_ms == 0 {
            return Err(FrameportError::Config(
                "pipeline.poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.dispatch.event_channel_capacity == 0 {
            return Err(FrameportError::Config(
                "dispatch.event_channel_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
