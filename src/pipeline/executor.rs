//! Pipeline executor: the state machine thread.
//!
//! The executor owns the GStreamer pipeline's lifecycle. It hands the
//! latest requested target to the pipeline, then forwards what the
//! pipeline bus reports until the target is reached:
//!
//! ```text
//! NULL ─► READY ─► PAUSED ─► PLAYING
//!  │                 │
//!  │                 └─ READY→PAUSED is async: sinks preroll
//!  └─ leaving NULL attaches the frame slot, returning to NULL releases it
//! ```
//!
//! A transition that fails, or does not preroll in time, is rolled back to
//! the state the pipeline actually reached.

use crate::config::PlayerConfig;
use crate::error::{FrameportError, Result};
use crate::pipeline::bridge::{post, BusMessage, ControlCommand};
use crate::pipeline::sink::FrameSlotHandle;
use crate::pipeline::state::{PipelineState, StateCell};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use gstreamer as gst;
use gstreamer::prelude::*;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Shared handles the executor needs from the controller
pub(crate) struct ExecutorParts {
    pub pipeline: gst::Pipeline,
    pub config: PlayerConfig,
    pub slot: Arc<FrameSlotHandle>,
    pub state: Arc<StateCell>,
    pub cmd_rx: Receiver<ControlCommand>,
    pub bus_tx: Sender<BusMessage>,
}

pub(crate) struct Executor {
    pipeline: gst::Pipeline,
    bus: gst::Bus,
    config: PlayerConfig,
    slot: Arc<FrameSlotHandle>,
    state: Arc<StateCell>,
    cmd_rx: Receiver<ControlCommand>,
    bus_tx: Sender<BusMessage>,

    target: PipelineState,
    /// Deadline of an in-flight asynchronous state change.
    async_deadline: Option<Instant>,
    shutdown: bool,
}

impl Executor {
    pub(crate) fn new(parts: ExecutorParts) -> Result<Self> {
        let bus = parts
            .pipeline
            .bus()
            .ok_or_else(|| FrameportError::Graph("pipeline has no bus".to_string()))?;
        Ok(Self {
            pipeline: parts.pipeline,
            bus,
            config: parts.config,
            slot: parts.slot,
            state: parts.state,
            cmd_rx: parts.cmd_rx,
            bus_tx: parts.bus_tx,
            target: PipelineState::Null,
            async_deadline: None,
            shutdown: false,
        })
    }

    /// Spawn the executor on its own thread.
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("frameport-executor".to_string())
            .spawn(move || self.run())
    }

    // ── Main run loop ──

    /// Run until a Shutdown (or a dropped controller), then bring the
    /// pipeline back to NULL.
    pub(crate) fn run(mut self) {
        tracing::debug!("Executor thread started");
        let poll = gst::ClockTime::from_nseconds(
            self.config.pipeline.poll_interval().as_nanos() as u64,
        );

        loop {
            self.process_commands();
            if self.shutdown {
                break;
            }
            self.check_deadline();
            if let Some(msg) = self.bus.timed_pop(poll) {
                self.handle_message(&msg);
                self.drain_bus();
            }
        }

        self.stop();
        tracing::debug!("Executor thread exiting");
    }

    /// Apply every queued command. Back-to-back state requests collapse
    /// into the latest one.
    fn process_commands(&mut self) {
        let mut latest = None;
        let mut requests = 0;
        loop {
            match self.cmd_rx.try_recv() {
                Ok(ControlCommand::SetState(target)) => {
                    latest = Some(target);
                    requests += 1;
                }
                Ok(ControlCommand::SendEos) => {
                    self.flush_requests(latest.take(), &mut requests);
                    self.send_eos();
                }
                Ok(ControlCommand::Shutdown) => {
                    self.shutdown = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.shutdown = true;
                    break;
                }
            }
        }
        self.flush_requests(latest, &mut requests);
    }

    fn flush_requests(&mut self, latest: Option<PipelineState>, requests: &mut usize) {
        if let Some(target) = latest {
            if !self.shutdown {
                self.apply_state(target);
            }
        }
        for _ in 0..*requests {
            self.state.request_handled();
        }
        *requests = 0;
    }

    fn send_eos(&self) {
        let current = self.state.snapshot().current;
        if current >= PipelineState::Paused || self.async_deadline.is_some() {
            tracing::debug!("Injecting end of stream");
            if !self.pipeline.send_event(gst::event::Eos::new()) {
                tracing::warn!("End of stream was not handled by every source");
            }
        } else {
            tracing::warn!("End of stream requested in {} state, ignoring", current);
        }
    }

    // ── State transitions ──

    fn apply_state(&mut self, target: PipelineState) {
        if target == PipelineState::VoidPending {
            tracing::warn!("Ignoring request for VOID_PENDING");
            return;
        }
        if target != self.target {
            tracing::debug!("Target state {} -> {}", self.target, target);
        }
        self.target = target;
        if target > PipelineState::Null {
            self.slot.attach();
        }

        match self.pipeline.set_state(target.into()) {
            Ok(gst::StateChangeSuccess::Async) => {
                self.state.set_pending(target);
                self.async_deadline = Some(Instant::now() + self.config.pipeline.preroll_timeout());
            }
            Ok(_) => {
                self.async_deadline = None;
                self.drain_bus();
                let current = PipelineState::from(self.pipeline.current_state());
                self.state.commit(current, PipelineState::VoidPending);
            }
            Err(_) => {
                let message = format!("could not change state to {}", target);
                post(
                    &self.bus_tx,
                    BusMessage::Error {
                        source: self.pipeline.name().to_string(),
                        message: message.clone(),
                    },
                );
                self.fail_transition(&message);
            }
        }

        if target == PipelineState::Null {
            self.slot.release();
        }
    }

    fn check_deadline(&mut self) {
        let timed_out = self
            .async_deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if timed_out {
            post(
                &self.bus_tx,
                BusMessage::Error {
                    source: self.pipeline.name().to_string(),
                    message: "preroll timed out".to_string(),
                },
            );
            self.fail_transition("preroll timed out");
        }
    }

    /// A transition could not complete: settle where the pipeline is and
    /// drop the request.
    fn fail_transition(&mut self, reason: &str) {
        let current = PipelineState::from(self.pipeline.current_state());
        let err = FrameportError::StateTransition(format!("{} -> {}: {}", current, self.target, reason));
        tracing::error!("{}", err);
        if self.pipeline.set_state(current.into()).is_err() {
            tracing::warn!("Could not abort transition, pipeline stays in {}", current);
        }
        self.target = current;
        self.async_deadline = None;
        self.state.commit(current, PipelineState::VoidPending);
    }

    fn stop(&mut self) {
        if self.pipeline.set_state(gst::State::Null).is_err() {
            tracing::error!("Pipeline refused to stop");
        }
        self.drain_bus();
        self.slot.release();
        self.state.commit(PipelineState::Null, PipelineState::VoidPending);
    }

    // ── Bus ──

    fn drain_bus(&mut self) {
        while let Some(msg) = self.bus.pop() {
            self.handle_message(&msg);
        }
    }

    fn handle_message(&mut self, msg: &gst::Message) {
        match msg.view() {
            gst::MessageView::StateChanged(changed) => {
                if msg.src() != Some(self.pipeline.upcast_ref::<gst::Object>()) {
                    return;
                }
                let old = PipelineState::from(changed.old());
                let new = PipelineState::from(changed.current());
                let pending = PipelineState::from(changed.pending());
                tracing::info!("State changed {} -> {} (pending {})", old, new, pending);
                // Posted first: a settled state implies its message is on the bus.
                post(&self.bus_tx, BusMessage::StateChanged { old, new, pending });
                self.state.commit(new, pending);
                if pending == PipelineState::VoidPending {
                    self.async_deadline = None;
                }
            }
            gst::MessageView::Error(err) => {
                let source = msg
                    .src()
                    .map(|src| src.path_string().to_string())
                    .unwrap_or_else(|| self.pipeline.name().to_string());
                let message = err.error().to_string();
                tracing::error!(
                    "Error from {}: {} ({})",
                    source,
                    message,
                    err.debug().as_deref().unwrap_or("no details")
                );
                post(&self.bus_tx, BusMessage::Error { source, message: message.clone() });
                if self.async_deadline.is_some() {
                    self.fail_transition(&message);
                }
            }
            gst::MessageView::Eos(_) => {
                tracing::info!("All sinks reached end of stream");
                post(&self.bus_tx, BusMessage::Eos);
            }
            gst::MessageView::AsyncDone(_) => {
                self.async_deadline = None;
            }
            gst::MessageView::Latency(_) => {
                if self.pipeline.recalculate_latency().is_err() {
                    tracing::debug!("Latency recalculation failed");
                }
            }
            _ => {}
        }
    }
}
