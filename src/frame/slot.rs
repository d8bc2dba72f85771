//! Latest-frame-wins transport between the streaming thread and a consumer.
//!
//! The slot is a lock-free triple buffer. The writer owns a back buffer, the
//! reader owns a front buffer and the third one sits in the shared `middle`
//! cell together with a dirty bit. Publishing and picking up a frame are
//! single atomic exchanges of that cell, so the three indices always form a
//! permutation and neither side ever touches a buffer the other one owns.
//!
//! Each published frame carries a sequence number (starting at 1). The
//! payload is copied first, the header second, then the buffer is exchanged
//! into `middle` and the sequence is stored last with `Release`. A reader
//! can therefore never see the header of frame N next to the payload of an
//! older frame, and no retry loop is needed.
//!
//! Memory cost is three frames. Buffers grow lazily to the largest frame
//! written into them, bounded by the slot capacity.

use crate::error::{FrameportError, Result};
use crate::media::VideoFormat;
use serde::Serialize;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

const INDEX_MASK: u8 = 0b011;
const DIRTY: u8 = 0b100;

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(0);

/// Name and size of a frame slot region
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedMemoryDescriptor {
    pub name: String,
    pub size_bytes: usize,
}

impl SharedMemoryDescriptor {
    pub fn new(name: impl Into<String>, size_bytes: usize) -> Self {
        Self {
            name: name.into(),
            size_bytes,
        }
    }

    /// A descriptor with a process-unique name.
    pub fn unique(size_bytes: usize) -> Self {
        let id = NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("/frameport-{}-{}", std::process::id(), id), size_bytes)
    }
}

/// Metadata stored next to each payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: u32,
    pub height: u32,
    pub pixel_format: VideoFormat,
    pub size_bytes: usize,
    pub sequence: u64,
}

/// A frame borrowed from the slot. Valid until the reader is polled again.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub width: u32,
    pub height: u32,
    pub pixel_format: VideoFormat,
    pub size_bytes: usize,
    pub sequence: u64,
    pub data: &'a [u8],
}

#[derive(Default)]
struct SlotBuffer {
    header: Option<FrameHeader>,
    data: Vec<u8>,
}

struct SlotShared {
    name: String,
    allow_resize: bool,
    max_capacity: usize,
    capacity: AtomicUsize,
    buffers: [UnsafeCell<SlotBuffer>; 3],
    /// Index of the published buffer, or'ed with `DIRTY` when unread.
    middle: AtomicU8,
    /// Sequence of the most recently published frame.
    published: AtomicU64,
}

// SAFETY: every buffer is owned by exactly one of writer.back, reader.front
// or `middle`. Ownership only moves through atomic swaps of `middle`
// (AcqRel), which also orders the buffer contents between the two sides.
unsafe impl Sync for SlotShared {}

impl SlotShared {
    fn descriptor(&self) -> SharedMemoryDescriptor {
        SharedMemoryDescriptor::new(self.name.clone(), self.capacity.load(Ordering::Relaxed))
    }

    /// Grow the capacity to `needed`, or fail when resizing is disabled
    /// or `needed` is beyond the ceiling.
    fn ensure_capacity(&self, needed: usize) -> Result<()> {
        let capacity = self.capacity.load(Ordering::Relaxed);
        if needed <= capacity {
            return Ok(());
        }
        if !self.allow_resize || needed > self.max_capacity {
            return Err(FrameportError::SlotOverflow { needed, capacity });
        }
        self.capacity.store(needed, Ordering::Relaxed);
        tracing::info!(
            "Frame slot '{}' resized from {} to {} bytes",
            self.name,
            capacity,
            needed
        );
        Ok(())
    }
}

/// Allocate a slot and split it into its two ends.
///
/// With `allow_resize` the capacity may grow up to `max_capacity` bytes.
pub fn allocate(
    descriptor: &SharedMemoryDescriptor,
    allow_resize: bool,
    max_capacity: usize,
) -> (FrameWriter, FrameReader) {
    let shared = Arc::new(SlotShared {
        name: descriptor.name.clone(),
        allow_resize,
        max_capacity,
        capacity: AtomicUsize::new(descriptor.size_bytes),
        buffers: Default::default(),
        middle: AtomicU8::new(1),
        published: AtomicU64::new(0),
    });
    tracing::debug!(
        "Allocated frame slot '{}' ({} bytes)",
        descriptor.name,
        descriptor.size_bytes
    );
    (
        FrameWriter {
            shared: shared.clone(),
            back: 0,
            next_sequence: 1,
        },
        FrameReader {
            shared,
            front: 2,
            last_sequence: 0,
        },
    )
}

/// Producer end of a frame slot, written from the frame sink's streaming thread.
pub struct FrameWriter {
    shared: Arc<SlotShared>,
    back: usize,
    next_sequence: u64,
}

impl FrameWriter {
    pub fn descriptor(&self) -> SharedMemoryDescriptor {
        self.shared.descriptor()
    }

    /// Make room for frames of `needed` bytes ahead of the first write.
    pub fn reserve(&mut self, needed: usize) -> Result<()> {
        self.shared.ensure_capacity(needed)
    }

    /// Copy a frame into the slot and publish it. Returns its sequence number.
    pub fn write(
        &mut self,
        pixel_format: VideoFormat,
        width: u32,
        height: u32,
        payload: &[u8],
    ) -> Result<u64> {
        let needed = payload.len();
        self.shared.ensure_capacity(needed)?;

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        // SAFETY: `back` is owned by this writer until it is swapped out below.
        let buffer = unsafe { &mut *self.shared.buffers[self.back].get() };
        if buffer.data.len() < needed {
            buffer.data.resize(needed, 0);
        }
        buffer.data[..needed].copy_from_slice(payload);
        buffer.header = Some(FrameHeader {
            width,
            height,
            pixel_format,
            size_bytes: needed,
            sequence,
        });

        let previous = self
            .shared
            .middle
            .swap(self.back as u8 | DIRTY, Ordering::AcqRel);
        self.back = (previous & INDEX_MASK) as usize;
        self.shared.published.store(sequence, Ordering::Release);
        Ok(sequence)
    }
}

/// Consumer end of a frame slot.
pub struct FrameReader {
    shared: Arc<SlotShared>,
    front: usize,
    last_sequence: u64,
}

impl FrameReader {
    pub fn descriptor(&self) -> SharedMemoryDescriptor {
        self.shared.descriptor()
    }

    /// Sequence number of the most recently published frame (0 if none).
    pub fn latest_sequence(&self) -> u64 {
        self.shared.published.load(Ordering::Acquire)
    }

    pub fn has_new_frame(&self) -> bool {
        self.latest_sequence() > self.last_sequence
    }

    /// Return the newest frame if it has not been returned before.
    ///
    /// Never blocks and never allocates. Frames published between two
    /// polls are skipped, only the latest one is handed out.
    pub fn poll(&mut self) -> Option<Frame<'_>> {
        if self.shared.middle.load(Ordering::Acquire) & DIRTY != 0 {
            let previous = self.shared.middle.swap(self.front as u8, Ordering::AcqRel);
            self.front = (previous & INDEX_MASK) as usize;
        }

        // SAFETY: `front` is owned by this reader until it is swapped out above.
        let buffer = unsafe { &*self.shared.buffers[self.front].get() };
        let header = buffer.header?;
        if header.sequence <= self.last_sequence {
            return None;
        }
        self.last_sequence = header.sequence;
        Some(Frame {
            width: header.width,
            height: header.height,
            pixel_format: header.pixel_format,
            size_bytes: header.size_bytes,
            sequence: header.sequence,
            data: &buffer.data[..header.size_bytes],
        })
    }
}
