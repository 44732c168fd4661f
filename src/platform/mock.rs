//! Scripted platform for tests and demos.
//!
//! [`MockSource`] grants streams by default and can be told to reject the
//! next requests or to hold them until released. It counts acquisitions and
//! stop calls so tests can check that nothing is leaked. [`MockSink`] is a
//! cheaply clonable handle: keep a clone to drive events after mounting it.

use super::{
    RejectionReason, SinkEvents, SinkFault, StreamConstraints, VideoSink, VideoSource,
    VideoStream,
};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Debug)]
struct SourceShared {
    supported: AtomicBool,
    rejections: Mutex<VecDeque<RejectionReason>>,
    gate: watch::Sender<bool>,
    requests: AtomicU64,
    acquired: AtomicU64,
    stop_calls: AtomicU64,
}

/// Mock capability provider.
#[derive(Debug, Clone)]
pub struct MockSource {
    shared: Arc<SourceShared>,
}

impl MockSource {
    /// Creates a supported source that grants every request immediately.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            shared: Arc::new(SourceShared {
                supported: AtomicBool::new(true),
                rejections: Mutex::new(VecDeque::new()),
                gate,
                requests: AtomicU64::new(0),
                acquired: AtomicU64::new(0),
                stop_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a source on a platform without media-capture support.
    pub fn unsupported() -> Self {
        let source = Self::new();
        source.shared.supported.store(false, Ordering::SeqCst);
        source
    }

    /// Rejects the next request with the given platform error name.
    pub fn reject_next(&self, name: &str) {
        if let Ok(mut queue) = self.shared.rejections.lock() {
            queue.push_back(RejectionReason::new(name, "rejected by mock source"));
        }
    }

    /// Makes requests wait until [`release_requests`](Self::release_requests).
    pub fn hold_requests(&self) {
        self.shared.gate.send_replace(false);
    }

    /// Lets held and future requests resolve.
    pub fn release_requests(&self) {
        self.shared.gate.send_replace(true);
    }

    /// Number of requests received so far.
    pub fn requests(&self) -> u64 {
        self.shared.requests.load(Ordering::SeqCst)
    }

    /// Number of streams granted so far.
    pub fn acquired(&self) -> u64 {
        self.shared.acquired.load(Ordering::SeqCst)
    }

    /// Number of `stop()` calls across all granted streams.
    pub fn stop_calls(&self) -> u64 {
        self.shared.stop_calls.load(Ordering::SeqCst)
    }

    /// Granted streams that have not been stopped.
    pub fn live_streams(&self) -> u64 {
        self.acquired().saturating_sub(self.stop_calls())
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoSource for MockSource {
    type Stream = MockStream;

    fn is_supported(&self) -> bool {
        self.shared.supported.load(Ordering::SeqCst)
    }

    async fn request_stream(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<MockStream, RejectionReason> {
        self.shared.requests.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.shared.gate.subscribe();
        // Sender lives in `shared`, so the channel cannot close here.
        let _ = gate.wait_for(|open| *open).await;

        let rejection = self
            .shared
            .rejections
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        if let Some(reason) = rejection {
            return Err(reason);
        }

        let n = self.shared.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            stream = n,
            width = constraints.ideal_width,
            height = constraints.ideal_height,
            "MockSource granted stream"
        );
        Ok(MockStream {
            id: format!("mock-stream-{n}"),
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Stream granted by [`MockSource`].
#[derive(Debug)]
pub struct MockStream {
    id: String,
    shared: Arc<SourceShared>,
}

impl VideoStream for MockStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&mut self) {
        self.shared.stop_calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(stream = %self.id, "MockStream stopped");
    }
}

#[derive(Debug, Default)]
struct SinkShared {
    events: Option<SinkEvents>,
    attached_to: Option<String>,
    dimensions: (u32, u32),
    auto_ready: Option<(u32, u32)>,
    attach_fault: Option<String>,
    attach_count: u64,
    frames_drawn: u64,
}

/// Mock rendering target.
///
/// Dimensions stay `(0, 0)` until metadata is emitted, like a real video
/// surface before its stream metadata loads.
#[derive(Debug, Clone, Default)]
pub struct MockSink {
    shared: Arc<Mutex<SinkShared>>,
}

impl MockSink {
    /// Creates a sink that waits for events driven by the test.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that reports metadata and a first frame as soon as it
    /// is attached.
    pub fn auto_ready(width: u32, height: u32) -> Self {
        let sink = Self::default();
        sink.with(|s| s.auto_ready = Some((width, height)));
        sink
    }

    /// Makes the next attach fail with `detail`.
    pub fn fail_next_attach(&self, detail: &str) {
        self.with(|s| s.attach_fault = Some(detail.to_string()));
    }

    /// Emits stream metadata and records the dimensions.
    pub fn emit_metadata(&self, width: u32, height: u32) -> bool {
        self.with(|s| {
            s.dimensions = (width, height);
            s.events.as_ref().is_some_and(|e| e.metadata(width, height))
        })
    }

    /// Emits the first-frame event.
    pub fn emit_first_frame(&self) -> bool {
        self.with(|s| s.events.as_ref().is_some_and(|e| e.first_frame()))
    }

    /// Emits a fault.
    pub fn emit_fault(&self, detail: &str) -> bool {
        self.with(|s| s.events.as_ref().is_some_and(|e| e.fault(detail)))
    }

    /// Overrides the reported dimensions without emitting anything.
    pub fn set_dimensions(&self, width: u32, height: u32) {
        self.with(|s| s.dimensions = (width, height));
    }

    /// Whether the sink is currently attached to a stream.
    pub fn is_attached(&self) -> bool {
        self.with(|s| s.attached_to.is_some())
    }

    /// Id of the stream currently attached, if any.
    pub fn attached_stream(&self) -> Option<String> {
        self.with(|s| s.attached_to.clone())
    }

    /// Number of successful attaches.
    pub fn attach_count(&self) -> u64 {
        self.with(|s| s.attach_count)
    }

    /// Number of frames drawn so far.
    pub fn frames_drawn(&self) -> u64 {
        self.with(|s| s.frames_drawn)
    }

    fn with<R>(&self, f: impl FnOnce(&mut SinkShared) -> R) -> R {
        let mut guard = match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl VideoSink<MockStream> for MockSink {
    fn attach(&mut self, stream: &MockStream, events: SinkEvents) -> Result<(), SinkFault> {
        self.with(|s| {
            if let Some(detail) = s.attach_fault.take() {
                return Err(SinkFault(detail));
            }
            s.attached_to = Some(stream.id().to_string());
            s.attach_count += 1;
            s.dimensions = (0, 0);
            if let Some((width, height)) = s.auto_ready {
                s.dimensions = (width, height);
                events.metadata(width, height);
                events.first_frame();
            }
            s.events = Some(events);
            Ok(())
        })
    }

    fn detach(&mut self) {
        self.with(|s| {
            s.events = None;
            s.attached_to = None;
            s.dimensions = (0, 0);
        });
    }

    fn dimensions(&self) -> (u32, u32) {
        self.with(|s| s.dimensions)
    }

    fn draw_frame(&self, surface: &mut RgbImage) -> Result<(), SinkFault> {
        self.with(|s| {
            if s.attached_to.is_none() {
                return Err(SinkFault("sink is not attached".to_string()));
            }
            s.frames_drawn += 1;
            let shade = (s.frames_drawn % 256) as u8;
            // Synthetic gradient, varies per frame so buffers are distinct.
            for (x, y, pixel) in surface.enumerate_pixels_mut() {
                *pixel = Rgb([(x % 256) as u8, (y % 256) as u8, shade]);
            }
            Ok(())
        })
    }
}
