//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use frameport::{PipelineController, PipelineState, PlayerConfig, SinkEvent};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Generous timeout for anything that waits on the pipeline
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Poll `cond` until it holds or the timeout expires. Returns the last result.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// A controller with a small default slot and fast polling
pub fn controller(capacity_bytes: usize, allow_resize: bool) -> PipelineController {
    let mut config = PlayerConfig::default();
    config.frame_slot.capacity_bytes = capacity_bytes;
    config.frame_slot.allow_resize = allow_resize;
    config.pipeline.poll_interval_ms = 1;
    PipelineController::new(config).unwrap()
}

pub fn play_and_wait(player: &PipelineController) {
    player.set_state(PipelineState::Playing);
    player
        .wait_for_state(PipelineState::Playing, test_timeout())
        .unwrap();
}

/// Records every sink event it is given
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback feeding this recorder
    pub fn callback(&self) -> impl Fn(SinkEvent) -> anyhow::Result<()> + Send + Sync + 'static {
        let events = self.events.clone();
        move |event: SinkEvent| {
            events.lock().unwrap().push(event);
            Ok(())
        }
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    pub fn has_eos(&self) -> bool {
        self.count("eos") > 0
    }
}
