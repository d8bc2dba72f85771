//! Appsink callbacks.
//!
//! Every appsink of a built graph gets a set of callbacks that run on its
//! GStreamer streaming thread. They describe each new caps, feed the frame
//! slot when the sink owns it and hand sink events to the dispatcher.

use crate::dispatch::{SinkDispatcher, SinkSequencer};
use crate::error::Result;
use crate::frame::access::SlotUpdate;
use crate::frame::slot::{allocate, FrameWriter, SharedMemoryDescriptor};
use crate::media::{MediaInfo, VideoInfo};
use crossbeam_channel::Sender;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::sync::{Arc, Mutex};

struct SlotInner {
    writer: Option<FrameWriter>,
    /// Appsink feeding the slot, fixed for the lifetime of the pipeline.
    owner: Option<String>,
}

/// The writer end of the frame slot, shared by the executor (which
/// allocates and releases it) and the frame sink's streaming thread.
pub(crate) struct FrameSlotHandle {
    descriptor: SharedMemoryDescriptor,
    allow_resize: bool,
    max_capacity: usize,
    slot_tx: Sender<SlotUpdate>,
    inner: Mutex<SlotInner>,
}

impl FrameSlotHandle {
    pub(crate) fn new(
        descriptor: SharedMemoryDescriptor,
        allow_resize: bool,
        max_capacity: usize,
        owner: Option<String>,
        slot_tx: Sender<SlotUpdate>,
    ) -> Self {
        Self {
            descriptor,
            allow_resize,
            max_capacity,
            slot_tx,
            inner: Mutex::new(SlotInner {
                writer: None,
                owner,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate the slot and hand its reader to the consumer. A slot that
    /// is already attached stays as it is.
    pub(crate) fn attach(&self) {
        let mut inner = self.lock();
        if inner.writer.is_some() {
            return;
        }
        let (writer, reader) = allocate(&self.descriptor, self.allow_resize, self.max_capacity);
        inner.writer = Some(writer);
        let _ = self.slot_tx.send(SlotUpdate::Attached(reader));
    }

    pub(crate) fn release(&self) {
        if self.lock().writer.take().is_some() {
            tracing::debug!("Released frame slot '{}'", self.descriptor.name);
        }
        let _ = self.slot_tx.send(SlotUpdate::Released);
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.lock().writer.is_some()
    }

    /// True if `sink` feeds the slot. The first sink to ask claims it when
    /// no owner was configured.
    fn claim(&self, sink: &str) -> bool {
        let mut inner = self.lock();
        match &inner.owner {
            Some(owner) => owner == sink,
            None => {
                tracing::debug!("'{}' feeds frame slot '{}'", sink, self.descriptor.name);
                inner.owner = Some(sink.to_string());
                true
            }
        }
    }

    fn reserve(&self, needed: usize) -> Result<()> {
        match self.lock().writer.as_mut() {
            Some(writer) => writer.reserve(needed),
            None => Ok(()),
        }
    }

    fn write(&self, video: &VideoInfo, payload: &[u8]) -> Result<()> {
        match self.lock().writer.as_mut() {
            Some(writer) => writer
                .write(video.pixel_format, video.width, video.height, payload)
                .map(|_| ()),
            None => Ok(()),
        }
    }
}

/// Streaming-thread state of one appsink
struct SinkHandler {
    name: String,
    sequencer: SinkSequencer,
    slot: Arc<FrameSlotHandle>,
    last_caps: Option<gst::Caps>,
    /// Video layout of the current caps when this sink feeds the slot.
    slot_video: Option<VideoInfo>,
    /// Overflow already reported for the current caps.
    overflow_warned: bool,
}

impl SinkHandler {
    fn new(name: String, dispatcher: Arc<SinkDispatcher>, slot: Arc<FrameSlotHandle>) -> Self {
        Self {
            sequencer: SinkSequencer::new(&name, dispatcher),
            name,
            slot,
            last_caps: None,
            slot_video: None,
            overflow_warned: false,
        }
    }

    fn update_caps(&mut self, caps: &gst::CapsRef) {
        if self.last_caps.as_deref() == Some(caps) {
            return;
        }
        self.last_caps = Some(caps.to_owned());
        self.overflow_warned = false;
        self.slot_video = None;

        match MediaInfo::from_caps(caps) {
            Ok(info) => {
                tracing::debug!("'{}' negotiated {}", self.name, caps);
                if let MediaInfo::Video(video) = &info {
                    if self.slot.claim(&self.name) {
                        if let Some(size) = video.frame_size() {
                            if let Err(e) = self.slot.reserve(size) {
                                tracing::warn!("{}", e);
                            }
                        }
                        self.slot_video = Some(video.clone());
                    }
                }
                self.sequencer.on_caps(info);
            }
            Err(e) => {
                tracing::warn!("'{}' received caps it cannot describe: {}", self.name, e);
                self.sequencer.on_unparseable_caps();
            }
        }
    }

    fn preroll(&mut self, sample: &gst::Sample) {
        if let Some(caps) = sample.caps() {
            self.update_caps(caps);
        }
        let Some(buffer) = sample.buffer() else {
            return;
        };
        match buffer.map_readable() {
            Ok(map) => self.sequencer.preroll(map.as_slice()),
            Err(e) => tracing::warn!("Unreadable preroll buffer on '{}': {}", self.name, e),
        }
    }

    fn sample(&mut self, sample: &gst::Sample) {
        if let Some(caps) = sample.caps() {
            self.update_caps(caps);
        }
        let Some(buffer) = sample.buffer() else {
            return;
        };
        let map = match buffer.map_readable() {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("Unreadable buffer on '{}': {}", self.name, e);
                return;
            }
        };
        if let Some(video) = &self.slot_video {
            if let Err(e) = self.slot.write(video, map.as_slice()) {
                if !self.overflow_warned {
                    tracing::warn!("Dropping frames on '{}': {}", self.name, e);
                    self.overflow_warned = true;
                }
            }
        }
        self.sequencer.sample(map.as_slice());
    }

    fn eos(&mut self) {
        if self.sequencer.eos() {
            tracing::debug!("'{}' reached end of stream", self.name);
        }
    }
}

fn lock(handler: &Mutex<SinkHandler>) -> std::sync::MutexGuard<'_, SinkHandler> {
    handler.lock().unwrap_or_else(|e| e.into_inner())
}

/// Install callbacks on `sink`. They stay for the lifetime of the pipeline.
pub(crate) fn attach_callbacks(
    sink: &gst_app::AppSink,
    dispatcher: Arc<SinkDispatcher>,
    slot: Arc<FrameSlotHandle>,
) {
    let handler = Arc::new(Mutex::new(SinkHandler::new(
        sink.name().to_string(),
        dispatcher,
        slot,
    )));
    let on_preroll = handler.clone();
    let on_sample = handler.clone();
    let on_eos = handler;

    sink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_preroll(move |sink| {
                let sample = sink.pull_preroll().map_err(|_| gst::FlowError::Eos)?;
                lock(&on_preroll).preroll(&sample);
                Ok(gst::FlowSuccess::Ok)
            })
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                lock(&on_sample).sample(&sample);
                Ok(gst::FlowSuccess::Ok)
            })
            .eos(move |_sink| lock(&on_eos).eos())
            .build(),
    );
}
