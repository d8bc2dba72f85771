//! Thread boundary between the controller and the pipeline executor.
//!
//! Commands flow controller → executor over an unbounded channel, so a
//! request never waits on an executor busy with a slow state change. Bus
//! messages flow back from the executor, which forwards what the GStreamer
//! pipeline bus reports.

use crate::pipeline::state::PipelineState;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

/// Commands sent from the controller to the executor thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Move toward the given state. The latest request wins.
    SetState(PipelineState),
    /// Inject end-of-stream into every source.
    SendEos,
    /// Tear down to NULL and exit.
    Shutdown,
}

/// Messages posted on the pipeline bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// A state change was committed.
    StateChanged {
        old: PipelineState,
        new: PipelineState,
        pending: PipelineState,
    },
    /// An element or the executor hit an error.
    Error { source: String, message: String },
    /// Every sink reached end-of-stream.
    Eos,
}

/// Channel capacity for bus messages. Messages beyond this are dropped.
const BUS_CHANNEL_CAPACITY: usize = 1024;

/// Post a bus message without ever blocking a pipeline thread.
pub(crate) fn post(bus: &Sender<BusMessage>, msg: BusMessage) {
    match bus.try_send(msg) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(msg)) => {
            tracing::debug!("Bus full, dropping {:?}", msg);
        }
    }
}

/// Controller-side handle for communicating with the executor thread.
pub struct ControlBridge {
    cmd_tx: Sender<ControlCommand>,
    bus_rx: Receiver<BusMessage>,
}

impl ControlBridge {
    /// Create a new bridge pair: `(bridge, cmd_rx, bus_tx)`.
    ///
    /// The executor owns `cmd_rx` and `bus_tx`.
    pub fn new() -> (Self, Receiver<ControlCommand>, Sender<BusMessage>) {
        let (cmd_tx, cmd_rx) = unbounded();
        let (bus_tx, bus_rx) = bounded(BUS_CHANNEL_CAPACITY);
        (Self { cmd_tx, bus_rx }, cmd_rx, bus_tx)
    }

    /// Queue a command. Never blocks; returns false once the executor is gone.
    pub fn send_command(&self, cmd: ControlCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    /// Drain all pending bus messages.
    pub fn drain(&self) -> Vec<BusMessage> {
        self.bus_rx.try_iter().collect()
    }

    /// Try to receive a single bus message without blocking.
    pub fn try_recv(&self) -> Option<BusMessage> {
        self.bus_rx.try_recv().ok()
    }
}
