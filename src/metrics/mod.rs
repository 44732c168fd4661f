//! Prometheus metrics for capture sessions.
//!
//! # Metrics Exposed
//!
//! ## Session
//! - `verify_capture_session_active` - Whether a stream is held
//! - `verify_capture_session_ready` - Whether the sink is producing frames
//! - `verify_capture_opens_total` - Open requests that started a stream request
//! - `verify_capture_streams_acquired_total` - Streams granted by the platform
//! - `verify_capture_streams_released_total` - Streams stopped by the session
//! - `verify_capture_ready_total` - Transitions into ready
//! - `verify_capture_failures_total{kind}` - Failures by error kind
//!
//! ## Capture
//! - `verify_capture_captures_total` - Still frames captured
//! - `verify_capture_capture_bytes_total` - Encoded JPEG bytes produced
//! - `verify_capture_captures_not_ready_total` - Captures refused as not ready
//!
//! # Example
//!
//! ```no_run
//! use verify_capture::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! let snapshot = MetricsSnapshot {
//!     active: true,
//!     ready: true,
//!     opens_requested: 1,
//!     streams_acquired: 1,
//!     ready_transitions: 1,
//!     captures: 1,
//!     bytes_encoded: 24_000,
//!     ..Default::default()
//! };
//!
//! registry.update(&snapshot);
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
