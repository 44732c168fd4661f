//! Native camera platform backed by `nokhwa`.
//!
//! The camera is opened and read on a dedicated thread, since `nokhwa`
//! cameras are not safe to move between threads on every backend. The
//! thread keeps the latest decoded frame in a shared [`Feed`]; a
//! [`NativeSink`] attached to the stream reads from that feed and relays
//! metadata, first-frame and fault notifications to the session.

use super::{
    RejectionReason, SinkEvents, SinkFault, StreamConstraints, VideoSink, VideoSource,
    VideoStream,
};
use async_trait::async_trait;
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::{Camera, NokhwaError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;

/// Consecutive failed reads before the feed reports a fault.
const MAX_CONSECUTIVE_FRAME_ERRORS: u32 = 30;

/// Target frame rate requested from the camera.
const TARGET_FPS: u32 = 30;

/// One decoded RGB frame.
struct RawFrame {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

#[derive(Default)]
struct FeedState {
    latest: Option<RawFrame>,
    events: Option<SinkEvents>,
    first_frame_sent: bool,
}

/// Latest frame shared between the capture thread and an attached sink.
#[derive(Default)]
struct Feed {
    state: Mutex<FeedState>,
}

impl Feed {
    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, frame: RawFrame) {
        let mut state = self.lock();
        let first_dimensions = state.latest.is_none();
        let (width, height) = (frame.width, frame.height);
        state.latest = Some(frame);

        if let Some(events) = state.events.clone() {
            if first_dimensions {
                events.metadata(width, height);
            }
            if !state.first_frame_sent {
                events.first_frame();
                state.first_frame_sent = true;
            }
        }
    }

    fn attach(&self, events: SinkEvents) {
        let mut state = self.lock();
        if let Some(frame) = state.latest.as_ref() {
            events.metadata(frame.width, frame.height);
        }
        state.first_frame_sent = false;
        state.events = Some(events);
    }

    fn detach(&self) {
        self.lock().events = None;
    }

    fn fault(&self, detail: String) {
        if let Some(events) = self.lock().events.as_ref() {
            events.fault(detail);
        }
    }
}

/// Capability provider for a local camera.
#[derive(Debug, Clone)]
pub struct NativeSource {
    device_index: u32,
}

impl NativeSource {
    /// Creates a source for the camera at `device_index`.
    pub fn new(device_index: u32) -> Self {
        Self { device_index }
    }
}

#[async_trait]
impl VideoSource for NativeSource {
    type Stream = NativeStream;

    fn is_supported(&self) -> bool {
        cfg!(any(target_os = "linux", target_os = "macos", target_os = "windows"))
    }

    async fn request_stream(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<NativeStream, RejectionReason> {
        if constraints.facing != super::FacingMode::User {
            tracing::debug!(facing = ?constraints.facing, "Facing mode is not selectable on this platform");
        }

        let feed = Arc::new(Feed::default());
        let stop = Arc::new(AtomicBool::new(false));
        let (opened_tx, opened_rx) = oneshot::channel();

        let index = self.device_index;
        let constraints = *constraints;
        let thread = thread::Builder::new()
            .name(format!("camera-{index}"))
            .spawn({
                let feed = Arc::clone(&feed);
                let stop = Arc::clone(&stop);
                move || run_capture_loop(index, constraints, feed, stop, opened_tx)
            })
            .map_err(|e| RejectionReason::new("AbortError", e.to_string()))?;

        match opened_rx.await {
            Ok(Ok(())) => Ok(NativeStream {
                id: format!("camera-{index}"),
                feed,
                stop,
                thread: Some(thread),
            }),
            Ok(Err(reason)) => Err(reason),
            Err(_) => Err(RejectionReason::new(
                "AbortError",
                "capture thread exited before opening the camera",
            )),
        }
    }
}

/// An open camera stream.
pub struct NativeStream {
    id: String,
    feed: Arc<Feed>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl VideoStream for NativeStream {
    fn id(&self) -> &str {
        &self.id
    }

    /// Signals the capture thread and returns without waiting for it.
    ///
    /// The thread may be stuck in a frame read on a wedged device, so it is
    /// joined on the blocking pool when a runtime is available and detached
    /// otherwise. It releases the camera itself on exit.
    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let Some(handle) = self.thread.take() else {
            return;
        };

        let id = self.id.clone();
        let reap = move || {
            if handle.join().is_err() {
                tracing::warn!(stream = %id, "Capture thread panicked");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(reap);
            }
            Err(_) => {
                drop(reap);
                tracing::debug!(stream = %self.id, "Capture thread detached");
            }
        }
    }
}

impl Drop for NativeStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Off-screen sink presenting a [`NativeStream`].
#[derive(Default)]
pub struct NativeSink {
    feed: Option<Arc<Feed>>,
}

impl NativeSink {
    /// Creates an unattached sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoSink<NativeStream> for NativeSink {
    fn attach(&mut self, stream: &NativeStream, events: SinkEvents) -> Result<(), SinkFault> {
        stream.feed.attach(events);
        self.feed = Some(Arc::clone(&stream.feed));
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.detach();
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        self.feed
            .as_ref()
            .and_then(|feed| feed.lock().latest.as_ref().map(|f| (f.width, f.height)))
            .unwrap_or((0, 0))
    }

    fn draw_frame(&self, surface: &mut RgbImage) -> Result<(), SinkFault> {
        let feed = self
            .feed
            .as_ref()
            .ok_or_else(|| SinkFault("sink is not attached".to_string()))?;
        let state = feed.lock();
        let frame = state
            .latest
            .as_ref()
            .ok_or_else(|| SinkFault("no frame presented yet".to_string()))?;

        if (frame.width, frame.height) != surface.dimensions() {
            return Err(SinkFault(format!(
                "frame size changed to {}x{} during capture",
                frame.width, frame.height
            )));
        }
        surface.copy_from_slice(&frame.rgb);
        Ok(())
    }
}

fn run_capture_loop(
    index: u32,
    constraints: StreamConstraints,
    feed: Arc<Feed>,
    stop: Arc<AtomicBool>,
    opened_tx: oneshot::Sender<Result<(), RejectionReason>>,
) {
    let mut camera = match open_camera(index, &constraints) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = opened_tx.send(Err(rejection_from(&e)));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        let _ = opened_tx.send(Err(rejection_from(&e)));
        return;
    }

    let resolution = camera.resolution();
    tracing::info!(
        device = index,
        width = resolution.width(),
        height = resolution.height(),
        fps = camera.frame_rate(),
        "Camera stream opened"
    );
    if opened_tx.send(Ok(())).is_err() {
        let _ = camera.stop_stream();
        return;
    }

    let mut consecutive_errors = 0;
    while !stop.load(Ordering::Relaxed) {
        match camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>())
        {
            Ok(decoded) => {
                consecutive_errors = 0;
                let (width, height) = decoded.dimensions();
                feed.publish(RawFrame {
                    width,
                    height,
                    rgb: decoded.into_raw(),
                });
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::trace!(error = %e, consecutive_errors, "Frame read failed");
                if consecutive_errors >= MAX_CONSECUTIVE_FRAME_ERRORS {
                    tracing::warn!(error = %e, "Camera stopped delivering frames");
                    feed.fault(e.to_string());
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    let _ = camera.stop_stream();
    tracing::debug!(device = index, "Capture loop exited");
}

/// Opens the camera, trying formats close to the ideal resolution first.
fn open_camera(index: u32, constraints: &StreamConstraints) -> Result<Camera, NokhwaError> {
    let ideal = Resolution::new(constraints.ideal_width, constraints.ideal_height);
    let attempts = [
        RequestedFormatType::Closest(CameraFormat::new(ideal, FrameFormat::MJPEG, TARGET_FPS)),
        RequestedFormatType::Closest(CameraFormat::new(ideal, FrameFormat::YUYV, TARGET_FPS)),
        RequestedFormatType::Closest(CameraFormat::new(ideal, FrameFormat::NV12, TARGET_FPS)),
        RequestedFormatType::AbsoluteHighestResolution,
    ];

    let mut last_error = None;
    for requested in attempts {
        match Camera::new(
            CameraIndex::Index(index),
            RequestedFormat::new::<RgbFormat>(requested),
        ) {
            Ok(camera) => return Ok(camera),
            Err(e) => {
                tracing::debug!(error = %e, "Camera format attempt failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        NokhwaError::OpenDeviceError(index.to_string(), "no format attempted".to_string())
    }))
}

fn rejection_from(error: &NokhwaError) -> RejectionReason {
    let detail = error.to_string();
    RejectionReason::new(rejection_name(&detail), detail)
}

/// Maps backend error text onto media-capture error names.
fn rejection_name(detail: &str) -> &'static str {
    let lower = detail.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("authoriz") {
        "NotAllowedError"
    } else if lower.contains("busy") || lower.contains("in use") {
        "NotReadableError"
    } else if lower.contains("not found")
        || lower.contains("no such")
        || lower.contains("no device")
    {
        "NotFoundError"
    } else if lower.contains("format") || lower.contains("resolution") {
        "OverconstrainedError"
    } else {
        "AbortError"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_names() {
        assert_eq!(rejection_name("Permission denied (os error 13)"), "NotAllowedError");
        assert_eq!(rejection_name("Device or resource busy"), "NotReadableError");
        assert_eq!(rejection_name("No such file or directory"), "NotFoundError");
        assert_eq!(rejection_name("Unsupported format YUYV"), "OverconstrainedError");
        assert_eq!(rejection_name("something odd"), "AbortError");
    }

    /// A stream whose capture thread blocks until `release` is dropped.
    fn wedged_stream() -> (NativeStream, std::sync::mpsc::Sender<()>) {
        let (release, blocked) = std::sync::mpsc::channel::<()>();
        let thread = thread::spawn(move || {
            let _ = blocked.recv();
        });
        let stream = NativeStream {
            id: "camera-test".to_string(),
            feed: Arc::new(Feed::default()),
            stop: Arc::new(AtomicBool::new(false)),
            thread: Some(thread),
        };
        (stream, release)
    }

    /// Runs `stop` on a helper thread and reports whether it returned.
    fn stop_returns(stream: NativeStream, with_runtime: bool) -> bool {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let mut stream = stream;
            if with_runtime {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();
                let guard = rt.enter();
                stream.stop();
                let _ = done_tx.send(());
                drop(guard);
                rt.shutdown_background();
            } else {
                stream.stop();
                let _ = done_tx.send(());
            }
        });
        done_rx.recv_timeout(Duration::from_secs(2)).is_ok()
    }

    #[test]
    fn test_stop_does_not_wait_for_wedged_thread() {
        let (stream, release) = wedged_stream();
        let stop = Arc::clone(&stream.stop);

        assert!(stop_returns(stream, false));
        assert!(stop.load(Ordering::SeqCst));
        drop(release);
    }

    #[test]
    fn test_stop_inside_runtime_does_not_block() {
        let (stream, release) = wedged_stream();
        let stop = Arc::clone(&stream.stop);

        assert!(stop_returns(stream, true));
        assert!(stop.load(Ordering::SeqCst));
        drop(release);
    }

    #[test]
    fn test_sink_reports_feed_dimensions() {
        let feed = Arc::new(Feed::default());
        let (events, mut rx) = SinkEvents::channel();
        feed.attach(events);

        feed.publish(RawFrame {
            width: 2,
            height: 1,
            rgb: vec![1, 2, 3, 4, 5, 6],
        });
        feed.publish(RawFrame {
            width: 2,
            height: 1,
            rgb: vec![6, 5, 4, 3, 2, 1],
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            crate::platform::SinkEvent::Metadata { width: 2, height: 1 }
        );
        assert_eq!(rx.try_recv().unwrap(), crate::platform::SinkEvent::FirstFrame);
        assert!(rx.try_recv().is_err());

        let sink = NativeSink {
            feed: Some(Arc::clone(&feed)),
        };
        assert_eq!(sink.dimensions(), (2, 1));
        let mut surface = RgbImage::new(2, 1);
        sink.draw_frame(&mut surface).unwrap();
        assert_eq!(surface.into_raw(), vec![6, 5, 4, 3, 2, 1]);
    }
}
