//! Platform abstraction over video capture hardware.
//!
//! The session never talks to a camera directly. It asks a [`VideoSource`]
//! for a stream, hands that stream to a [`VideoSink`] once the caller has
//! mounted one, and listens to the sink's [`SinkEvent`]s to decide when the
//! device is really producing frames.
//!
//! A scripted [`mock`] platform is always available. A native platform
//! backed by `nokhwa` is available behind the `camera` feature.

mod constraints;
mod events;
pub mod mock;
#[cfg(feature = "camera")]
pub mod native;

pub use constraints::{FacingMode, StreamConstraints};
pub use events::{SinkEvent, SinkEvents};

use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

/// Raw reason a platform gave for refusing a stream request.
///
/// `name` follows the media-capture error naming convention
/// (`NotAllowedError`, `NotFoundError`, ...). The session classifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionReason {
    /// Platform error name.
    pub name: String,
    /// Free-form platform detail.
    pub message: String,
}

impl RejectionReason {
    /// Creates a rejection reason.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

/// A sink could not attach to a stream or render a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SinkFault(pub String);

/// Capability provider: grants access to a video stream.
#[async_trait]
pub trait VideoSource: Send + Sync + 'static {
    /// Stream type produced by this source.
    type Stream: VideoStream;

    /// Whether this platform exposes a media-capture capability at all.
    fn is_supported(&self) -> bool;

    /// Requests a stream satisfying `constraints`.
    ///
    /// May suspend for as long as the platform takes to grant or deny
    /// access (permission prompts included).
    async fn request_stream(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Self::Stream, RejectionReason>;
}

/// An acquired hardware stream.
pub trait VideoStream: Send + 'static {
    /// Platform identifier for the stream, used in logs.
    fn id(&self) -> &str;

    /// Stops the hardware stream and releases the device.
    fn stop(&mut self);
}

/// Rendering target that consumes frames from a stream.
pub trait VideoSink<S: VideoStream>: Send + 'static {
    /// Starts presenting `stream`, reporting progress through `events`.
    fn attach(&mut self, stream: &S, events: SinkEvents) -> Result<(), SinkFault>;

    /// Stops presenting. Events sent after this are ignored by the session.
    fn detach(&mut self);

    /// Current frame dimensions. `(0, 0)` until metadata is known.
    fn dimensions(&self) -> (u32, u32);

    /// Draws the currently presented frame into `surface`, which is sized
    /// to [`dimensions`](Self::dimensions).
    fn draw_frame(&self, surface: &mut RgbImage) -> Result<(), SinkFault>;
}
