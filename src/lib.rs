//! Verification Camera Capture Library
//!
//! Acquires a camera for an identity-verification flow, gates readiness on
//! the camera actually producing frames and captures single JPEG stills.
//!
//! # Architecture
//!
//! ```text
//! platform (VideoSource → VideoStream → VideoSink)
//!     ↓
//! session (state machine, readiness barrier, error classification)
//!     ↓
//! capture (raster → JPEG)        metrics (Prometheus)
//! ```
//!
//! # Design Principles
//!
//! - **One stream per session**: a handle is held exactly in `Attaching`
//!   and `Ready`, and every other path stops it
//! - **Ready means frames**: metadata alone is not enough, the first frame
//!   must have been presented
//! - **Capture is read-only**: capturing never changes session state
//! - **No face detection**: `ready` says nothing about who is in frame
//!
//! # Example
//!
//! ```no_run
//! use verify_capture::{
//!     capture::FrameCapturer,
//!     platform::mock::{MockSink, MockSource},
//!     session::{DeviceSession, SessionState},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let session = DeviceSession::new(MockSource::new());
//! session.mount_sink(MockSink::auto_ready(640, 480)).unwrap();
//!
//! session.open().await;
//! if session.settled().await == SessionState::Ready {
//!     let capturer = FrameCapturer::new();
//!     let image = capturer.capture(&session).unwrap();
//!     println!("{} bytes of {}", image.len(), image.mime_type());
//! }
//!
//! session.close();
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod config;
pub mod metrics;
pub mod platform;
pub mod session;

// Re-export commonly used types at crate root
pub use capture::{CaptureError, CapturedImage, FrameCapturer};
pub use config::FileConfig;
pub use platform::{StreamConstraints, VideoSink, VideoSource, VideoStream};
pub use session::{DeviceSession, SessionError, SessionState, StatusSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
