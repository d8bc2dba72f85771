//! Consumer-facing read paths over the frame slot.
//!
//! The poll path ([`FrameAccess::poll`]) borrows the newest frame straight
//! out of the slot and may skip frames. The push path is a sink callback;
//! [`frame_callback`] wraps one so that every sample arrives as a detached
//! [`OwnedFrame`].

use crate::dispatch::SinkEvent;
use crate::frame::slot::{Frame, FrameReader, SharedMemoryDescriptor};
use crate::media::{MediaInfo, VideoFormat, VideoInfo};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A frame with its own copy of the payload. Safe to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: VideoFormat,
    pub size_bytes: usize,
    pub sequence: u64,
    pub data: Vec<u8>,
}

impl Frame<'_> {
    /// Copy the borrowed payload out of the slot.
    pub fn detach(&self) -> OwnedFrame {
        OwnedFrame {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            size_bytes: self.size_bytes,
            sequence: self.sequence,
            data: self.data.to_vec(),
        }
    }
}

/// Slot lifecycle notifications from the executor
pub(crate) enum SlotUpdate {
    /// A slot was allocated on the way up from NULL.
    Attached(FrameReader),
    /// The slot was released on reaching NULL.
    Released,
}

/// Poll-path access to whatever slot the pipeline currently has.
pub struct FrameAccess {
    base: SharedMemoryDescriptor,
    reader: Option<FrameReader>,
    updates: Receiver<SlotUpdate>,
}

impl FrameAccess {
    /// Returns the access handle and the sender the executor reports on.
    pub(crate) fn new(base: SharedMemoryDescriptor) -> (Self, Sender<SlotUpdate>) {
        let (tx, rx) = unbounded();
        (
            Self {
                base,
                reader: None,
                updates: rx,
            },
            tx,
        )
    }

    fn sync(&mut self) {
        while let Ok(update) = self.updates.try_recv() {
            match update {
                SlotUpdate::Attached(reader) => self.reader = Some(reader),
                SlotUpdate::Released => self.reader = None,
            }
        }
    }

    /// The newest unseen frame, or `None` when nothing new was produced
    /// or no slot is allocated.
    pub fn poll(&mut self) -> Option<Frame<'_>> {
        self.sync();
        self.reader.as_mut()?.poll()
    }

    pub fn is_attached(&mut self) -> bool {
        self.sync();
        self.reader.is_some()
    }

    /// Descriptor of the live slot, or of the slot the next READY will allocate.
    ///
    /// Picks up pending attach and release notifications first, so a
    /// released region is dropped here even if the consumer never polls.
    pub fn shared_memory_info(&mut self) -> SharedMemoryDescriptor {
        self.sync();
        match &self.reader {
            Some(reader) => reader.descriptor(),
            None => self.base.clone(),
        }
    }
}

/// Adapt a frame handler into a sink callback.
///
/// Setup events supply the frame geometry, every NewSample becomes an
/// [`OwnedFrame`] numbered from 1 in arrival order. Prerolls are skipped
/// since the same buffer is delivered again as a sample once playing.
/// Samples of non-video epochs are ignored.
pub fn frame_callback<F>(handler: F) -> impl Fn(SinkEvent) -> anyhow::Result<()> + Send + Sync + 'static
where
    F: Fn(OwnedFrame) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let format: Mutex<Option<VideoInfo>> = Mutex::new(None);
    let sequence = AtomicU64::new(0);
    move |event: SinkEvent| match event {
        SinkEvent::Setup(MediaInfo::Video(info)) => {
            *format.lock().unwrap_or_else(|e| e.into_inner()) = Some(info);
            Ok(())
        }
        SinkEvent::Setup(MediaInfo::Audio(_)) => {
            *format.lock().unwrap_or_else(|e| e.into_inner()) = None;
            Ok(())
        }
        SinkEvent::NewSample(data) => {
            let info = format.lock().unwrap_or_else(|e| e.into_inner()).clone();
            match info {
                Some(info) => handler(OwnedFrame {
                    width: info.width,
                    height: info.height,
                    pixel_format: info.pixel_format,
                    size_bytes: data.len(),
                    sequence: sequence.fetch_add(1, Ordering::Relaxed) + 1,
                    data,
                }),
                None => Ok(()),
            }
        }
        SinkEvent::NewPreroll(_) | SinkEvent::Eos => Ok(()),
    }
}
