//! Pad-level caps probes.
//!
//! A probe watches one pad of one element and is called with the parsed
//! [`MediaInfo`] every time a caps event crosses that pad, including the
//! first negotiation. Caps events travel downstream ahead of the buffers,
//! so a probe on any pad of a branch runs before that branch's sink emits
//! the matching Setup.
//!
//! The GStreamer pad probe is installed once per pad ([`watch_pad`]) and
//! looks the callback up at every caps event, so replacing or removing a
//! registration never touches the pad.

use crate::dispatch::guarded;
use crate::media::MediaInfo;
use gstreamer as gst;
use gstreamer::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// A registered caps probe
pub type CapsProbeCallback = Arc<dyn Fn(MediaInfo) -> anyhow::Result<()> + Send + Sync>;

/// Probe registry keyed by (element name, pad name)
#[derive(Default)]
pub struct CapsProbeRegistry {
    probes: RwLock<HashMap<(String, String), CapsProbeCallback>>,
    errors: AtomicU64,
}

impl CapsProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a probe, replacing any previous one on the same pad.
    pub fn register(&self, element: &str, pad: &str, callback: CapsProbeCallback) -> bool {
        self.probes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((element.to_string(), pad.to_string()), callback)
            .is_some()
    }

    pub fn unregister(&self, element: &str, pad: &str) -> bool {
        self.probes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(element.to_string(), pad.to_string()))
            .is_some()
    }

    pub fn is_registered(&self, element: &str, pad: &str) -> bool {
        self.probes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&(element.to_string(), pad.to_string()))
    }

    pub fn clear(&self) {
        self.probes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of probe calls that failed or were skipped.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Report caps crossing `element:pad`. Returns true if a probe ran successfully.
    pub fn fire(&self, element: &str, pad: &str, caps: &gst::CapsRef) -> bool {
        let callback = {
            let probes = self.probes.read().unwrap_or_else(|e| e.into_inner());
            match probes.get(&(element.to_string(), pad.to_string())) {
                Some(cb) => cb.clone(),
                None => return false,
            }
        };

        let info = match MediaInfo::from_caps(caps) {
            Ok(info) => info,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Skipping caps probe on {}:{}: {}", element, pad, e);
                return false;
            }
        };

        match guarded(element, || callback(info)) {
            Ok(()) => true,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Caps probe on {}:{} failed: {}", element, pad, e);
                false
            }
        }
    }
}

/// Forward every downstream caps event on `pad` to `registry`.
pub(crate) fn watch_pad(
    pad: &gst::Pad,
    element: &str,
    pad_name: &str,
    registry: Arc<CapsProbeRegistry>,
) -> Option<gst::PadProbeId> {
    let element = element.to_string();
    let pad_name = pad_name.to_string();
    pad.add_probe(gst::PadProbeType::EVENT_DOWNSTREAM, move |_pad, info| {
        if let Some(gst::PadProbeData::Event(event)) = &info.data {
            if let gst::EventView::Caps(caps) = event.view() {
                registry.fire(&element, &pad_name, caps.caps());
            }
        }
        gst::PadProbeReturn::Ok
    })
}
