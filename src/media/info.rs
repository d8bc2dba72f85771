//! Structured media descriptions read from negotiated caps.
//!
//! [`MediaInfo::from_caps`] is the single entry point used by caps probes
//! and sink setup: it turns fixed raw caps into a [`VideoInfo`] or an
//! [`AudioInfo`]. Anything it cannot describe is a `FormatParse` error.

use crate::error::{FrameportError, Result};
use gstreamer as gst;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Media type of raw video caps
pub const VIDEO_RAW: &str = "video/x-raw";
/// Media type of raw audio caps
pub const AUDIO_RAW: &str = "audio/x-raw";

/// Largest video frame accepted from caps (1 GiB)
pub const MAX_FRAME_BYTES: usize = 1 << 30;

#[inline]
fn round_up_4(v: usize) -> Option<usize> {
    v.checked_add(3).map(|v| v & !3)
}

#[inline]
fn half_ceil(v: usize) -> usize {
    v.div_ceil(2)
}

// ── Video ──

/// Raw video pixel layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoFormat {
    I420,
    Yv12,
    Nv12,
    Nv21,
    Yuy2,
    Uyvy,
    Rgba,
    Bgra,
    Argb,
    Abgr,
    Rgbx,
    Bgrx,
    Xrgb,
    Xbgr,
    Rgb,
    Bgr,
    Gray8,
}

impl VideoFormat {
    pub const ALL: &'static [VideoFormat] = &[
        VideoFormat::I420,
        VideoFormat::Yv12,
        VideoFormat::Nv12,
        VideoFormat::Nv21,
        VideoFormat::Yuy2,
        VideoFormat::Uyvy,
        VideoFormat::Rgba,
        VideoFormat::Bgra,
        VideoFormat::Argb,
        VideoFormat::Abgr,
        VideoFormat::Rgbx,
        VideoFormat::Bgrx,
        VideoFormat::Xrgb,
        VideoFormat::Xbgr,
        VideoFormat::Rgb,
        VideoFormat::Bgr,
        VideoFormat::Gray8,
    ];

    /// The caps name of this format
    pub fn as_str(self) -> &'static str {
        match self {
            VideoFormat::I420 => "I420",
            VideoFormat::Yv12 => "YV12",
            VideoFormat::Nv12 => "NV12",
            VideoFormat::Nv21 => "NV21",
            VideoFormat::Yuy2 => "YUY2",
            VideoFormat::Uyvy => "UYVY",
            VideoFormat::Rgba => "RGBA",
            VideoFormat::Bgra => "BGRA",
            VideoFormat::Argb => "ARGB",
            VideoFormat::Abgr => "ABGR",
            VideoFormat::Rgbx => "RGBx",
            VideoFormat::Bgrx => "BGRx",
            VideoFormat::Xrgb => "xRGB",
            VideoFormat::Xbgr => "xBGR",
            VideoFormat::Rgb => "RGB",
            VideoFormat::Bgr => "BGR",
            VideoFormat::Gray8 => "GRAY8",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.as_str() == name)
    }

    /// Size in bytes of one frame, with rows padded to 4 bytes.
    /// `None` if the size does not fit in `usize`.
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = (width as usize, height as usize);
        match self {
            VideoFormat::I420 | VideoFormat::Yv12 => {
                let chroma = round_up_4(half_ceil(w))?.checked_mul(half_ceil(h))?;
                round_up_4(w)?
                    .checked_mul(h)?
                    .checked_add(chroma.checked_mul(2)?)
            }
            VideoFormat::Nv12 | VideoFormat::Nv21 => {
                let stride = round_up_4(w)?;
                stride.checked_mul(h)?.checked_add(stride.checked_mul(half_ceil(h))?)
            }
            VideoFormat::Yuy2 | VideoFormat::Uyvy => {
                round_up_4(half_ceil(w).checked_mul(4)?)?.checked_mul(h)
            }
            VideoFormat::Rgba
            | VideoFormat::Bgra
            | VideoFormat::Argb
            | VideoFormat::Abgr
            | VideoFormat::Rgbx
            | VideoFormat::Bgrx
            | VideoFormat::Xrgb
            | VideoFormat::Xbgr => w.checked_mul(4)?.checked_mul(h),
            VideoFormat::Rgb | VideoFormat::Bgr => round_up_4(w.checked_mul(3)?)?.checked_mul(h),
            VideoFormat::Gray8 => round_up_4(w)?.checked_mul(h),
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for VideoFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Negotiated raw video format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub pixel_format: VideoFormat,
    pub frame_rate_num: i32,
    pub frame_rate_den: i32,
    pub pixel_aspect_num: i32,
    pub pixel_aspect_den: i32,
}

impl VideoInfo {
    pub fn new(pixel_format: VideoFormat, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_format,
            frame_rate_num: 0,
            frame_rate_den: 1,
            pixel_aspect_num: 1,
            pixel_aspect_den: 1,
        }
    }

    pub fn frame_size(&self) -> Option<usize> {
        self.pixel_format.frame_size(self.width, self.height)
    }

    /// Duration of one frame, `None` for variable (0/1) frame rates.
    pub fn frame_duration(&self) -> Option<Duration> {
        if self.frame_rate_num <= 0 || self.frame_rate_den <= 0 {
            return None;
        }
        Some(Duration::from_nanos(
            1_000_000_000u64 * self.frame_rate_den as u64 / self.frame_rate_num as u64,
        ))
    }
}

// ── Audio ──

/// Raw audio sample formats (interleaved)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    U8,
    S16le,
    S32le,
    F32le,
    F64le,
}

impl AudioFormat {
    pub const ALL: &'static [AudioFormat] = &[
        AudioFormat::U8,
        AudioFormat::S16le,
        AudioFormat::S32le,
        AudioFormat::F32le,
        AudioFormat::F64le,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::U8 => "U8",
            AudioFormat::S16le => "S16LE",
            AudioFormat::S32le => "S32LE",
            AudioFormat::F32le => "F32LE",
            AudioFormat::F64le => "F64LE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.as_str() == name)
    }

    pub fn sample_bits(self) -> u32 {
        match self {
            AudioFormat::U8 => 8,
            AudioFormat::S16le => 16,
            AudioFormat::S32le | AudioFormat::F32le => 32,
            AudioFormat::F64le => 64,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AudioFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Negotiated raw audio format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInfo {
    pub channels: u32,
    pub sampling_rate: u32,
    pub sample_size_bits: u32,
    pub format: AudioFormat,
}

impl AudioInfo {
    pub fn new(format: AudioFormat, sampling_rate: u32, channels: u32) -> Self {
        Self {
            channels,
            sampling_rate,
            sample_size_bits: format.sample_bits(),
            format,
        }
    }

    /// Bytes of one interleaved frame (one sample for every channel)
    pub fn bytes_per_frame(&self) -> usize {
        (self.sample_size_bits / 8) as usize * self.channels as usize
    }
}

// ── MediaInfo ──

/// Structured description of a negotiated format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mediaType")]
pub enum MediaInfo {
    #[serde(rename = "video/x-raw")]
    Video(VideoInfo),
    #[serde(rename = "audio/x-raw")]
    Audio(AudioInfo),
}

impl MediaInfo {
    /// Parse caps from their text form.
    pub fn parse(caps: &str) -> Result<Self> {
        crate::pipeline::init()?;
        let parsed = gst::Caps::from_str(caps)
            .map_err(|e| FrameportError::FormatParse(format!("'{}': {}", caps, e)))?;
        Self::from_caps(&parsed)
    }

    /// Describe fixed raw caps.
    pub fn from_caps(caps: &gst::CapsRef) -> Result<Self> {
        if !caps.is_fixed() {
            return Err(FrameportError::FormatParse(format!("caps are not fixed: {}", caps)));
        }
        let structure = caps
            .structure(0)
            .ok_or_else(|| FrameportError::FormatParse("empty caps".to_string()))?;
        match structure.name().as_str() {
            VIDEO_RAW => video_from_structure(structure).map(MediaInfo::Video),
            AUDIO_RAW => audio_from_structure(structure).map(MediaInfo::Audio),
            other => Err(FrameportError::FormatParse(format!(
                "unsupported media type '{}'",
                other
            ))),
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            MediaInfo::Video(_) => VIDEO_RAW,
            MediaInfo::Audio(_) => AUDIO_RAW,
        }
    }

    pub fn as_video(&self) -> Option<&VideoInfo> {
        match self {
            MediaInfo::Video(v) => Some(v),
            MediaInfo::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioInfo> {
        match self {
            MediaInfo::Audio(a) => Some(a),
            MediaInfo::Video(_) => None,
        }
    }
}

fn positive_dimension(s: &gst::StructureRef, key: &str) -> Result<u32> {
    let value = s
        .get::<i32>(key)
        .map_err(|e| FrameportError::FormatParse(format!("field '{}': {}", key, e)))?;
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| FrameportError::FormatParse(format!("'{}' out of range: {}", key, value)))
}

fn format_name<'a>(s: &'a gst::StructureRef) -> Result<&'a str> {
    s.get::<&str>("format")
        .map_err(|e| FrameportError::FormatParse(format!("field 'format': {}", e)))
}

fn video_from_structure(s: &gst::StructureRef) -> Result<VideoInfo> {
    let name = format_name(s)?;
    let format = VideoFormat::from_name(name)
        .ok_or_else(|| FrameportError::FormatParse(format!("unknown video format '{}'", name)))?;
    let mut info = VideoInfo::new(
        format,
        positive_dimension(s, "width")?,
        positive_dimension(s, "height")?,
    );
    if !info.frame_size().is_some_and(|size| size <= MAX_FRAME_BYTES) {
        return Err(FrameportError::FormatParse(format!(
            "{}x{} {} frames exceed {} bytes",
            info.width, info.height, format, MAX_FRAME_BYTES
        )));
    }
    if let Ok(rate) = s.get::<gst::Fraction>("framerate") {
        info.frame_rate_num = rate.numer();
        info.frame_rate_den = rate.denom();
    }
    if let Ok(par) = s.get::<gst::Fraction>("pixel-aspect-ratio") {
        info.pixel_aspect_num = par.numer();
        info.pixel_aspect_den = par.denom();
    }
    Ok(info)
}

fn audio_from_structure(s: &gst::StructureRef) -> Result<AudioInfo> {
    let name = format_name(s)?;
    let format = AudioFormat::from_name(name)
        .ok_or_else(|| FrameportError::FormatParse(format!("unknown audio format '{}'", name)))?;
    Ok(AudioInfo::new(
        format,
        positive_dimension(s, "rate")?,
        positive_dimension(s, "channels")?,
    ))
}
