//! Pipeline controller: the consumer-facing handle.
//!
//! The controller owns the graph, the frame slot and the executor thread.
//! Every lifecycle call is fire-and-forget; completion is observed through
//! [`PipelineController::state`] or the bus.
//!
//! ```ignore
//! let mut player = PipelineController::new(PlayerConfig::default())?;
//! player.build_pipeline("videotestsrc ! video/x-raw,width=640,height=480 ! appsink name=sink")?;
//! player.register_sink_callback("sink", |event| {
//!     tracing::info!("{}", event.name());
//!     Ok(())
//! })?;
//! player.set_state(PipelineState::Playing);
//! while let Some(frame) = player.get_frame() { /* ... */ }
//! ```

use crate::config::PlayerConfig;
use crate::dispatch::{event_channel, SinkDispatcher, SinkEvent};
use crate::error::{FrameportError, Result};
use crate::frame::access::{FrameAccess, SlotUpdate};
use crate::frame::slot::{Frame, SharedMemoryDescriptor};
use crate::media::MediaInfo;
use crate::pipeline::bridge::{BusMessage, ControlBridge, ControlCommand};
use crate::pipeline::executor::{Executor, ExecutorParts};
use crate::pipeline::graph::Graph;
use crate::pipeline::sink::{attach_callbacks, FrameSlotHandle};
use crate::pipeline::state::{PipelineState, StateCell, StateSnapshot};
use crate::probe::{watch_pad, CapsProbeRegistry};
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A built graph and the thread driving it
struct ActivePipeline {
    graph: Graph,
    bridge: ControlBridge,
    state: Arc<StateCell>,
    executor: Option<JoinHandle<()>>,
    /// Pads already forwarding caps events to the probe registry.
    watched_pads: Mutex<HashSet<(String, String)>>,
}

pub struct PipelineController {
    config: PlayerConfig,
    descriptor: SharedMemoryDescriptor,
    dispatcher: Arc<SinkDispatcher>,
    probes: Arc<CapsProbeRegistry>,
    frames: FrameAccess,
    slot_tx: Sender<SlotUpdate>,
    active: Option<ActivePipeline>,
}

impl Default for PipelineController {
    fn default() -> Self {
        Self::with_valid_config(PlayerConfig::default())
    }
}

impl PipelineController {
    /// Create a controller. No pipeline exists until [`build_pipeline`](Self::build_pipeline).
    pub fn new(config: PlayerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: PlayerConfig) -> Self {
        let capacity = config.frame_slot.capacity_bytes;
        let descriptor = match &config.frame_slot.name {
            Some(name) => SharedMemoryDescriptor::new(name.clone(), capacity),
            None => SharedMemoryDescriptor::unique(capacity),
        };
        let (frames, slot_tx) = FrameAccess::new(descriptor.clone());
        tracing::debug!("Controller created with frame slot {}", descriptor.name);
        Self {
            config,
            descriptor,
            dispatcher: Arc::new(SinkDispatcher::new()),
            probes: Arc::new(CapsProbeRegistry::new()),
            frames,
            slot_tx,
            active: None,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    // ── Lifecycle ──

    /// Build a new pipeline from a launch description.
    ///
    /// Any existing pipeline is torn down to NULL first and every callback
    /// and probe registration is cleared. On failure no pipeline exists.
    pub fn build_pipeline(&mut self, description: &str) -> Result<()> {
        self.teardown();
        self.dispatcher.clear();
        self.probes.clear();

        let built = Graph::launch(description).and_then(|graph| {
            let frame_sink = graph.frame_sink(self.config.pipeline.frame_sink.as_deref())?;
            Ok((graph, frame_sink))
        });
        let (graph, frame_sink) = match built {
            Ok(built) => built,
            Err(e) => {
                tracing::error!("Failed to build pipeline: {}", e);
                return Err(e);
            }
        };

        let slot = Arc::new(FrameSlotHandle::new(
            self.descriptor.clone(),
            self.config.frame_slot.allow_resize,
            self.config.frame_slot.max_capacity_bytes,
            frame_sink,
            self.slot_tx.clone(),
        ));
        let sinks = graph.app_sinks();
        for sink in &sinks {
            attach_callbacks(sink, self.dispatcher.clone(), slot.clone());
        }

        let (bridge, cmd_rx, bus_tx) = ControlBridge::new();
        let state = Arc::new(StateCell::new());
        let executor = Executor::new(ExecutorParts {
            pipeline: graph.pipeline().clone(),
            config: self.config.clone(),
            slot,
            state: state.clone(),
            cmd_rx,
            bus_tx,
        })?
        .spawn()
        .map_err(|e| FrameportError::from(e).with_context("Failed to start executor"))?;

        tracing::info!(
            "Built pipeline: {} elements, {} appsinks",
            graph.element_names().len(),
            sinks.len()
        );
        self.active = Some(ActivePipeline {
            graph,
            bridge,
            state,
            executor: Some(executor),
            watched_pads: Mutex::new(HashSet::new()),
        });
        Ok(())
    }

    /// Request a state change. Returns immediately; a newer request
    /// replaces an older one that has not completed yet.
    pub fn set_state(&self, target: PipelineState) {
        let Some(active) = &self.active else {
            tracing::warn!("set_state({}) without a pipeline", target);
            return;
        };
        active.state.request(target);
        if let Err(e) = Self::send(active, ControlCommand::SetState(target)) {
            active.state.request_handled();
            tracing::error!("{}", e);
        }
    }

    fn send(active: &ActivePipeline, cmd: ControlCommand) -> Result<()> {
        if active.bridge.send_command(cmd.clone()) {
            Ok(())
        } else {
            Err(FrameportError::Channel(format!("executor is gone, dropping {:?}", cmd)))
        }
    }

    /// The settled state, or `VoidPending` while a transition is in flight.
    pub fn state(&self) -> PipelineState {
        self.state_snapshot().effective()
    }

    pub fn state_snapshot(&self) -> StateSnapshot {
        self.active
            .as_ref()
            .map(|active| active.state.snapshot())
            .unwrap_or(StateSnapshot::NULL)
    }

    /// Block until the pipeline has settled in `target`.
    pub fn wait_for_state(&self, target: PipelineState, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.state_snapshot();
            if snapshot.is_settled() && snapshot.current == target {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FrameportError::StateTransition(format!(
                    "timed out waiting for {} (current {}, pending {})",
                    target, snapshot.current, snapshot.pending
                )));
            }
            std::thread::sleep(self.config.pipeline.poll_interval());
        }
    }

    /// Inject end-of-stream into the pipeline. Ignored (and logged) outside
    /// PAUSED and PLAYING.
    pub fn send_end_of_stream(&self) {
        match &self.active {
            Some(active) => {
                if let Err(e) = Self::send(active, ControlCommand::SendEos) {
                    tracing::error!("{}", e);
                }
            }
            None => tracing::warn!("End of stream requested without a pipeline, ignoring"),
        }
    }

    /// Bring the pipeline down to NULL and stop its executor. Waits for
    /// every in-flight callback to return.
    fn teardown(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        if let Err(e) = Self::send(&active, ControlCommand::Shutdown) {
            tracing::debug!("{}", e);
        }
        if let Some(handle) = active.executor.take() {
            if handle.join().is_err() {
                tracing::error!("Executor thread panicked");
            }
        }
        let _ = self.slot_tx.send(SlotUpdate::Released);
        tracing::debug!("Pipeline torn down");
    }

    // ── Elements ──

    fn graph(&self) -> Result<&Graph> {
        self.active
            .as_ref()
            .map(|active| &active.graph)
            .ok_or(FrameportError::NoPipeline)
    }

    /// Names of every element in the pipeline, sorted.
    pub fn element_names(&self) -> Vec<String> {
        self.graph()
            .map(|graph| graph.element_names())
            .unwrap_or_default()
    }

    /// Read a property in its text form.
    pub fn property(&self, element: &str, property: &str) -> Result<String> {
        self.graph()?.property(element, property)
    }

    /// Set an element property from its text form.
    ///
    /// Changing a capsfilter's `caps` while streaming renegotiates the
    /// stream before its next buffer.
    pub fn set_property(&self, element: &str, property: &str, value: &str) -> Result<()> {
        self.graph()?.set_property(element, property, value)?;
        tracing::debug!("Set {}.{} = {}", element, property, value);
        Ok(())
    }

    // ── Callbacks ──

    /// Attach the callback of an appsink, replacing any previous one.
    pub fn register_sink_callback<F>(&self, element: &str, callback: F) -> Result<()>
    where
        F: Fn(SinkEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.graph()?.app_sink(element)?;
        self.dispatcher.register(element, Arc::new(callback));
        tracing::debug!("Registered sink callback on '{}'", element);
        Ok(())
    }

    /// Route an appsink's events into a bounded channel instead of a callback.
    pub fn register_sink_channel(&self, element: &str) -> Result<Receiver<SinkEvent>> {
        let (callback, rx) = event_channel(self.config.dispatch.event_channel_capacity);
        self.register_sink_callback(element, callback)?;
        Ok(rx)
    }

    pub fn unregister_sink_callback(&self, element: &str) -> bool {
        self.dispatcher.unregister(element)
    }

    /// Watch caps crossing `element:pad`, replacing any previous probe there.
    pub fn register_caps_probe<F>(&self, element: &str, pad: &str, callback: F) -> Result<()>
    where
        F: Fn(MediaInfo) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let active = self.active.as_ref().ok_or(FrameportError::NoPipeline)?;
        let gst_pad = active.graph.pad(element, pad)?;
        let mut watched = active.watched_pads.lock().unwrap_or_else(|e| e.into_inner());
        if watched.insert((element.to_string(), pad.to_string())) {
            watch_pad(&gst_pad, element, pad, self.probes.clone());
        }
        self.probes.register(element, pad, Arc::new(callback));
        tracing::debug!("Registered caps probe on {}:{}", element, pad);
        Ok(())
    }

    pub fn unregister_caps_probe(&self, element: &str, pad: &str) -> bool {
        self.probes.unregister(element, pad)
    }

    /// Events and probe calls lost to failing callbacks so far.
    pub fn callback_error_count(&self) -> u64 {
        self.dispatcher.error_count() + self.probes.error_count()
    }

    // ── Frames ──

    /// The newest frame not yet returned by this method, borrowed from the
    /// frame slot. `None` when nothing new was produced.
    pub fn get_frame(&mut self) -> Option<Frame<'_>> {
        self.frames.poll()
    }

    /// The frame slot as it is now, including any resize by the frame sink.
    pub fn get_shared_memory_info(&mut self) -> SharedMemoryDescriptor {
        self.frames.shared_memory_info()
    }

    // ── Bus ──

    pub fn pop_bus_message(&self) -> Option<BusMessage> {
        self.active.as_ref()?.bridge.try_recv()
    }

    pub fn drain_bus(&self) -> Vec<BusMessage> {
        self.active
            .as_ref()
            .map(|active| active.bridge.drain())
            .unwrap_or_default()
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.teardown();
    }
}
