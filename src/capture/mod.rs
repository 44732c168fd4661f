//! Still-frame capture and JPEG encoding.
//!
//! A [`FrameCapturer`] reads from a ready [`DeviceSession`](crate::session::DeviceSession)
//! but never changes its state. Each call draws the sink's current frame
//! into a fresh raster and returns an owned [`CapturedImage`].

mod capturer;
mod still;

pub use capturer::{
    encode_jpeg, CaptureError, CaptureObserver, CaptureStats, FrameCapturer, JPEG_QUALITY,
};
pub use still::{CapturedImage, JPEG_MIME_TYPE};
