//! Single-frame capture from a ready session.

use super::still::CapturedImage;
use crate::platform::{SinkFault, VideoSource};
use crate::session::DeviceSession;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// JPEG quality factor, on a 0.0–1.0 scale.
pub const JPEG_QUALITY: f32 = 0.9;

/// Errors returned to the immediate caller of [`FrameCapturer::capture`].
///
/// None of these change session state.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture not ready: session is not ready or the sink has no frame dimensions yet")]
    NotReady,
    #[error("sink failed to draw the current frame: {0}")]
    Sink(#[from] SinkFault),
    #[error("failed to encode JPEG: {0}")]
    Encode(#[from] image::ImageError),
}

/// Receives every successfully captured image.
pub trait CaptureObserver: Send + Sync {
    /// Called once per successful capture, before the image is returned.
    fn on_image_captured(&self, image: &CapturedImage);
}

impl<F> CaptureObserver for F
where
    F: Fn(&CapturedImage) + Send + Sync,
{
    fn on_image_captured(&self, image: &CapturedImage) {
        self(image)
    }
}

/// Counters kept by a [`FrameCapturer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Successful captures.
    pub captures: u64,
    /// Total encoded bytes produced.
    pub bytes_encoded: u64,
    /// Captures refused because the session was not ready.
    pub not_ready: u64,
}

/// Renders the current frame of a ready session into a JPEG.
#[derive(Default)]
pub struct FrameCapturer {
    observers: Vec<Box<dyn CaptureObserver>>,
    captures: AtomicU64,
    bytes_encoded: AtomicU64,
    not_ready: AtomicU64,
}

impl FrameCapturer {
    /// Creates a capturer with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer notified of each captured image.
    pub fn with_observer(mut self, observer: impl CaptureObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Captures one frame.
    ///
    /// Returns [`CaptureError::NotReady`] unless the session is `Ready` and
    /// its sink reports positive dimensions. The raster is sized to the
    /// sink's dimensions at the moment of capture.
    pub fn capture<V: VideoSource>(
        &self,
        session: &DeviceSession<V>,
    ) -> Result<CapturedImage, CaptureError> {
        let drawn = session
            .with_ready_sink(|sink| {
                let (width, height) = sink.dimensions();
                if width == 0 || height == 0 {
                    return Err(CaptureError::NotReady);
                }
                let mut surface = RgbImage::new(width, height);
                sink.draw_frame(&mut surface)?;
                Ok(surface)
            })
            .unwrap_or(Err(CaptureError::NotReady));

        let surface = match drawn {
            Ok(surface) => surface,
            Err(CaptureError::NotReady) => {
                self.not_ready.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(state = %session.state(), "Capture refused, session not ready");
                return Err(CaptureError::NotReady);
            }
            Err(e) => return Err(e),
        };

        let image = encode_jpeg(&surface)?;
        self.captures.fetch_add(1, Ordering::Relaxed);
        self.bytes_encoded
            .fetch_add(image.len() as u64, Ordering::Relaxed);
        tracing::info!(
            width = image.width(),
            height = image.height(),
            bytes = image.len(),
            "Captured still frame"
        );

        for observer in &self.observers {
            observer.on_image_captured(&image);
        }
        Ok(image)
    }

    /// Returns the capture counters.
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            captures: self.captures.load(Ordering::Relaxed),
            bytes_encoded: self.bytes_encoded.load(Ordering::Relaxed),
            not_ready: self.not_ready.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for FrameCapturer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCapturer")
            .field("observers", &self.observers.len())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Encoder quality on the 1–100 scale for a 0.0–1.0 factor.
fn jpeg_quality(factor: f32) -> u8 {
    (factor * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Encodes an RGB raster as a JPEG at [`JPEG_QUALITY`].
pub fn encode_jpeg(surface: &RgbImage) -> Result<CapturedImage, CaptureError> {
    let mut bytes = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, jpeg_quality(JPEG_QUALITY));
        encoder.encode_image(surface)?;
    }
    Ok(CapturedImage::new(bytes, surface.width(), surface.height()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockSink, MockSource};
    use crate::session::SessionState;
    use std::sync::{Arc, Mutex};

    async fn ready_session(sink: &MockSink) -> DeviceSession<MockSource> {
        let session = DeviceSession::new(MockSource::new());
        session.mount_sink(sink.clone()).unwrap();
        session.open().await;
        assert_eq!(session.settled().await, SessionState::Ready);
        session
    }

    #[test]
    fn test_quality_mapping() {
        assert_eq!(jpeg_quality(JPEG_QUALITY), 90);
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(1.5), 100);
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let surface = RgbImage::from_fn(64, 48, |x, y| image::Rgb([x as u8, y as u8, 128]));
        let image = encode_jpeg(&surface).unwrap();

        assert!(image.has_jpeg_markers());
        assert_eq!((image.width(), image.height()), (64, 48));
        assert_eq!(image.mime_type(), "image/jpeg");
    }

    #[tokio::test]
    async fn test_capture_not_ready_without_open() {
        let session = DeviceSession::new(MockSource::new());
        let capturer = FrameCapturer::new();

        assert!(matches!(
            capturer.capture(&session),
            Err(CaptureError::NotReady)
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(capturer.stats().not_ready, 1);
    }

    #[tokio::test]
    async fn test_capture_not_ready_while_attaching() {
        let sink = MockSink::new();
        let session = DeviceSession::new(MockSource::new());
        session.mount_sink(sink.clone()).unwrap();
        session.open().await;
        sink.emit_metadata(640, 480);

        let capturer = FrameCapturer::new();
        assert!(matches!(
            capturer.capture(&session),
            Err(CaptureError::NotReady)
        ));
        assert_eq!(session.state(), SessionState::Attaching);
        assert_eq!(sink.frames_drawn(), 0);
    }

    #[tokio::test]
    async fn test_capture_not_ready_when_dimensions_collapse() {
        let sink = MockSink::auto_ready(640, 480);
        let session = ready_session(&sink).await;
        sink.set_dimensions(0, 0);

        let capturer = FrameCapturer::new();
        assert!(matches!(
            capturer.capture(&session),
            Err(CaptureError::NotReady)
        ));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_two_captures_are_independent() {
        let sink = MockSink::auto_ready(320, 240);
        let session = ready_session(&sink).await;
        let capturer = FrameCapturer::new();

        let first = capturer.capture(&session).unwrap();
        let second = capturer.capture(&session).unwrap();

        assert_eq!((first.width(), first.height()), (320, 240));
        assert_eq!((second.width(), second.height()), (320, 240));
        assert!(!first.is_empty() && !second.is_empty());
        assert_ne!(first.bytes().as_ptr(), second.bytes().as_ptr());
        assert_eq!(sink.frames_drawn(), 2);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(capturer.stats().captures, 2);
    }

    #[tokio::test]
    async fn test_observer_sees_each_capture() {
        let sink = MockSink::auto_ready(64, 64);
        let session = ready_session(&sink).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let capturer = FrameCapturer::new().with_observer({
            let seen = Arc::clone(&seen);
            move |image: &CapturedImage| seen.lock().unwrap().push(image.len())
        });

        let image = capturer.capture(&session).unwrap();
        let idle = DeviceSession::new(MockSource::new());
        assert!(capturer.capture(&idle).is_err());

        assert_eq!(*seen.lock().unwrap(), vec![image.len()]);
    }
}
