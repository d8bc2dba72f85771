//! Pipeline lifecycle states.

use gstreamer as gst;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Lifecycle state. `VoidPending` means "no state" and is only used to
/// mark an in-flight or absent transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    VoidPending = 0,
    Null = 1,
    Ready = 2,
    Paused = 3,
    Playing = 4,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PipelineState::Null,
            2 => PipelineState::Ready,
            3 => PipelineState::Paused,
            4 => PipelineState::Playing,
            _ => PipelineState::VoidPending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::VoidPending => "VOID_PENDING",
            PipelineState::Null => "NULL",
            PipelineState::Ready => "READY",
            PipelineState::Paused => "PAUSED",
            PipelineState::Playing => "PLAYING",
        }
    }
}

impl From<gst::State> for PipelineState {
    fn from(state: gst::State) -> Self {
        match state {
            gst::State::Null => PipelineState::Null,
            gst::State::Ready => PipelineState::Ready,
            gst::State::Paused => PipelineState::Paused,
            gst::State::Playing => PipelineState::Playing,
            _ => PipelineState::VoidPending,
        }
    }
}

impl From<PipelineState> for gst::State {
    fn from(state: PipelineState) -> Self {
        match state {
            PipelineState::VoidPending => gst::State::VoidPending,
            PipelineState::Null => gst::State::Null,
            PipelineState::Ready => gst::State::Ready,
            PipelineState::Paused => gst::State::Paused,
            PipelineState::Playing => gst::State::Playing,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current and pending state. `pending` is `VoidPending` when settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub current: PipelineState,
    pub pending: PipelineState,
}

impl StateSnapshot {
    pub const NULL: StateSnapshot = StateSnapshot {
        current: PipelineState::Null,
        pending: PipelineState::VoidPending,
    };

    pub fn is_settled(&self) -> bool {
        self.pending == PipelineState::VoidPending
    }

    /// The settled state, or `VoidPending` while a transition is in flight.
    pub fn effective(&self) -> PipelineState {
        if self.is_settled() {
            self.current
        } else {
            PipelineState::VoidPending
        }
    }
}

/// Lock-free state shared between the executor and the controller.
///
/// The executor commits what the pipeline bus reports. A state request
/// counts as pending from the moment the controller sends it, not only
/// once the executor has handed it to the pipeline.
pub(crate) struct StateCell {
    current: AtomicU8,
    pending: AtomicU8,
    /// Requests sent but not yet picked up by the executor.
    in_flight: AtomicUsize,
    requested: AtomicU8,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            current: AtomicU8::new(PipelineState::Null as u8),
            pending: AtomicU8::new(PipelineState::VoidPending as u8),
            in_flight: AtomicUsize::new(0),
            requested: AtomicU8::new(PipelineState::VoidPending as u8),
        }
    }

    pub(crate) fn snapshot(&self) -> StateSnapshot {
        // commit() publishes pending after current, so load it first.
        let in_flight = self.in_flight.load(Ordering::Acquire);
        let mut pending = PipelineState::from_u8(self.pending.load(Ordering::Acquire));
        let current = PipelineState::from_u8(self.current.load(Ordering::Acquire));
        if in_flight > 0 && pending == PipelineState::VoidPending {
            pending = PipelineState::from_u8(self.requested.load(Ordering::Acquire));
        }
        StateSnapshot { current, pending }
    }

    /// Controller side: a state change was queued.
    pub(crate) fn request(&self, target: PipelineState) {
        self.requested.store(target as u8, Ordering::Release);
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// Executor side: a queued request was taken into account.
    pub(crate) fn request_handled(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn set_pending(&self, pending: PipelineState) {
        self.pending.store(pending as u8, Ordering::Release);
    }

    pub(crate) fn commit(&self, current: PipelineState, pending: PipelineState) {
        self.current.store(current as u8, Ordering::Release);
        self.pending.store(pending as u8, Ordering::Release);
    }
}
