//! Frame transport: the lock-free slot and the poll/push access paths.

pub mod access;
pub mod slot;

pub use access::{frame_callback, FrameAccess, OwnedFrame};
pub use slot::{Frame, FrameReader, FrameWriter, SharedMemoryDescriptor};
