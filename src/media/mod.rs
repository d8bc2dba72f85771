//! Negotiated formats: structured [`MediaInfo`] records read from GStreamer caps.

pub mod info;

pub use info::{AudioFormat, AudioInfo, MediaInfo, VideoFormat, VideoInfo};
