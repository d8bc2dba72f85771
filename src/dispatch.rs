//! Sink event dispatch.
//!
//! Every appsink has at most one registered callback. Events are delivered
//! synchronously on the streaming thread that feeds the sink, so a slow
//! callback stalls that branch of the pipeline. Callback failures (an `Err`
//! or a panic) are logged and counted, and only the failing event is lost.
//!
//! [`SinkSequencer`] sits between a sink and the dispatcher and enforces the
//! per-sink event order:
//!
//! ```text
//! Setup (NewPreroll)? NewSample* ... Setup NewSample* ... Eos
//! ```

use crate::error::FrameportError;
use crate::media::MediaInfo;
use crossbeam_channel::{bounded, Receiver};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Events delivered to a sink callback
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// A new format was negotiated. Precedes the first sample of the epoch.
    Setup(MediaInfo),
    /// First buffer reaching the sink after it entered PAUSED.
    NewPreroll(Vec<u8>),
    /// A rendered buffer.
    NewSample(Vec<u8>),
    /// End of stream. Nothing follows until the pipeline is rebuilt.
    Eos,
}

impl SinkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SinkEvent::Setup(_) => "setup",
            SinkEvent::NewPreroll(_) => "new-preroll",
            SinkEvent::NewSample(_) => "new-sample",
            SinkEvent::Eos => "eos",
        }
    }
}

/// A registered sink callback
pub type SinkCallback = Arc<dyn Fn(SinkEvent) -> anyhow::Result<()> + Send + Sync>;

/// Run a user callback, turning errors and panics into a `Callback` error.
pub(crate) fn guarded<F>(element: &str, f: F) -> Result<(), FrameportError>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(FrameportError::callback(element, format!("{:#}", e))),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "callback panicked".to_string());
            Err(FrameportError::callback(element, message))
        }
    }
}

/// Callback registry keyed by sink element name
#[derive(Default)]
pub struct SinkDispatcher {
    callbacks: RwLock<HashMap<String, SinkCallback>>,
    errors: AtomicU64,
}

impl SinkDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `element`, replacing any previous one.
    /// Returns true if a callback was replaced.
    pub fn register(&self, element: &str, callback: SinkCallback) -> bool {
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        let replaced = callbacks.insert(element.to_string(), callback).is_some();
        if replaced {
            tracing::debug!("Replaced sink callback on '{}'", element);
        }
        replaced
    }

    pub fn unregister(&self, element: &str) -> bool {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(element)
            .is_some()
    }

    pub fn is_registered(&self, element: &str) -> bool {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(element)
    }

    pub fn clear(&self) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of events lost to failing callbacks.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Deliver an event to `element`'s callback, if any.
    ///
    /// The event is only built when a callback is registered, so unobserved
    /// sinks never copy their payloads. Returns true if the callback ran
    /// successfully.
    pub fn dispatch_with<F>(&self, element: &str, make_event: F) -> bool
    where
        F: FnOnce() -> SinkEvent,
    {
        // Clone the Arc so the lock is not held while user code runs.
        let callback = {
            let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
            match callbacks.get(element) {
                Some(cb) => cb.clone(),
                None => return false,
            }
        };

        let event = make_event();
        let name = event.name();
        match guarded(element, || callback(event)) {
            Ok(()) => true,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Dropped {} event: {}", name, e);
                false
            }
        }
    }
}

/// Per-sink ordering state. Lives as long as the pipeline, so EOS stays
/// terminal across restarts.
pub(crate) struct SinkSequencer {
    element: String,
    dispatcher: Arc<SinkDispatcher>,
    pending_setup: Option<MediaInfo>,
    negotiated: bool,
    eos: bool,
}

impl SinkSequencer {
    pub(crate) fn new(element: &str, dispatcher: Arc<SinkDispatcher>) -> Self {
        Self {
            element: element.to_string(),
            dispatcher,
            pending_setup: None,
            negotiated: false,
            eos: false,
        }
    }

    pub(crate) fn is_eos(&self) -> bool {
        self.eos
    }

    /// Start a new negotiation epoch. The Setup is held back until the first
    /// buffer of the epoch, so back-to-back renegotiations yield one Setup.
    pub(crate) fn on_caps(&mut self, info: MediaInfo) {
        self.pending_setup = Some(info);
        self.negotiated = true;
    }

    /// The sink's caps could not be described: drop buffers until the next
    /// caps that can.
    pub(crate) fn on_unparseable_caps(&mut self) {
        self.pending_setup = None;
        self.negotiated = false;
    }

    fn flush_setup(&mut self) -> bool {
        if self.is_eos() {
            return false;
        }
        if !self.negotiated {
            tracing::warn!("Buffer reached '{}' before caps, dropping", self.element);
            return false;
        }
        if let Some(info) = self.pending_setup.take() {
            self.dispatcher
                .dispatch_with(&self.element, || SinkEvent::Setup(info));
        }
        true
    }

    pub(crate) fn preroll(&mut self, data: &[u8]) {
        if self.flush_setup() {
            self.dispatcher
                .dispatch_with(&self.element, || SinkEvent::NewPreroll(data.to_vec()));
        }
    }

    pub(crate) fn sample(&mut self, data: &[u8]) {
        if self.flush_setup() {
            self.dispatcher
                .dispatch_with(&self.element, || SinkEvent::NewSample(data.to_vec()));
        }
    }

    /// Emit Eos once. Returns false if the sink had already reached EOS.
    pub(crate) fn eos(&mut self) -> bool {
        if self.eos {
            return false;
        }
        self.eos = true;
        self.dispatcher.dispatch_with(&self.element, || SinkEvent::Eos);
        true
    }
}

/// A callback that forwards events into a bounded channel.
///
/// This moves callback work onto the receiver's thread while keeping
/// backpressure: a full channel blocks the streaming thread. The receiver
/// must keep draining until the pipeline is back in NULL. Dropping the
/// receiver turns every further event into a callback error.
pub fn event_channel(
    capacity: usize,
) -> (
    impl Fn(SinkEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    Receiver<SinkEvent>,
) {
    let (tx, rx) = bounded(capacity);
    let callback = move |event: SinkEvent| {
        tx.send(event)
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    };
    (callback, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{VideoFormat, VideoInfo};
    use std::sync::Mutex;

    fn recorder() -> (SinkCallback, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink_log = log.clone();
        let cb: SinkCallback = Arc::new(move |event: SinkEvent| {
            sink_log.lock().unwrap().push(event.name().to_string());
            Ok(())
        });
        (cb, log)
    }

    fn video_info() -> MediaInfo {
        MediaInfo::Video(VideoInfo::new(VideoFormat::I420, 2, 2))
    }

    #[test]
    fn test_reregistration_replaces() {
        let dispatcher = SinkDispatcher::new();
        let (first, first_log) = recorder();
        let (second, second_log) = recorder();

        assert!(!dispatcher.register("sink", first));
        assert!(dispatcher.register("sink", second));
        assert!(dispatcher.dispatch_with("sink", || SinkEvent::Eos));

        assert!(first_log.lock().unwrap().is_empty());
        assert_eq!(*second_log.lock().unwrap(), vec!["eos"]);
    }

    #[test]
    fn test_unregistered_sink_builds_no_event() {
        let dispatcher = SinkDispatcher::new();
        let delivered = dispatcher.dispatch_with("sink", || panic!("event must not be built"));
        assert!(!delivered);
    }

    #[test]
    fn test_callback_errors_are_contained() {
        let dispatcher = SinkDispatcher::new();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        dispatcher.register(
            "sink",
            Arc::new(move |event| {
                counter.fetch_add(1, Ordering::Relaxed);
                match event {
                    SinkEvent::NewSample(data) if data[0] == 1 => anyhow::bail!("bad sample"),
                    SinkEvent::NewSample(data) if data[0] == 2 => panic!("boom"),
                    _ => Ok(()),
                }
            }),
        );

        assert!(!dispatcher.dispatch_with("sink", || SinkEvent::NewSample(vec![1])));
        assert!(!dispatcher.dispatch_with("sink", || SinkEvent::NewSample(vec![2])));
        assert!(dispatcher.dispatch_with("sink", || SinkEvent::NewSample(vec![3])));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(dispatcher.error_count(), 2);
    }

    #[test]
    fn test_sequencer_orders_setup_first() {
        let dispatcher = Arc::new(SinkDispatcher::new());
        let (cb, log) = recorder();
        dispatcher.register("sink", cb);
        let mut seq = SinkSequencer::new("sink", dispatcher);

        seq.sample(&[0]); // before caps: dropped
        seq.on_caps(video_info());
        seq.on_caps(video_info()); // coalesced
        seq.preroll(&[1]);
        seq.sample(&[1]);
        seq.sample(&[2]);
        seq.on_caps(video_info());
        seq.sample(&[3]);
        assert!(seq.eos());
        assert!(!seq.eos());
        seq.on_caps(video_info());
        seq.sample(&[4]);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "setup",
                "new-preroll",
                "new-sample",
                "new-sample",
                "setup",
                "new-sample",
                "eos"
            ]
        );
    }

    #[test]
    fn test_unparseable_caps_drop_buffers() {
        let dispatcher = Arc::new(SinkDispatcher::new());
        let (cb, log) = recorder();
        dispatcher.register("sink", cb);
        let mut seq = SinkSequencer::new("sink", dispatcher);

        seq.on_caps(video_info());
        seq.sample(&[1]);
        seq.on_unparseable_caps();
        seq.sample(&[2]);
        seq.on_caps(video_info());
        seq.sample(&[3]);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["setup", "new-sample", "setup", "new-sample"]
        );
        assert!(!seq.is_eos());
    }

    #[test]
    fn test_event_channel_forwards_and_reports_drop() {
        let (cb, rx) = event_channel(4);
        cb(SinkEvent::Setup(video_info())).unwrap();
        cb(SinkEvent::NewSample(vec![9, 9])).unwrap();
        assert_eq!(rx.recv().unwrap(), SinkEvent::Setup(video_info()));
        assert_eq!(rx.recv().unwrap(), SinkEvent::NewSample(vec![9, 9]));

        drop(rx);
        assert!(cb(SinkEvent::Eos).is_err());
    }
}
