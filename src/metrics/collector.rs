//! Metrics collection and registry.

use crate::capture::CaptureStats;
use crate::session::{ErrorKind, SessionStats, StatusSnapshot};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of session and capturer state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// A stream is currently held.
    pub active: bool,
    /// The session is ready for capture.
    pub ready: bool,
    /// `open()` calls that started a request.
    pub opens_requested: u64,
    /// Streams granted by the platform.
    pub streams_acquired: u64,
    /// Streams stopped.
    pub streams_released: u64,
    /// Transitions into ready.
    pub ready_transitions: u64,
    /// Failures by kind.
    pub failures: BTreeMap<ErrorKind, u64>,
    /// Successful captures.
    pub captures: u64,
    /// Encoded bytes produced.
    pub bytes_encoded: u64,
    /// Captures refused as not ready.
    pub captures_not_ready: u64,
}

/// Prometheus metrics registry for capture sessions.
pub struct MetricsRegistry {
    registry: Registry,

    // Session state
    active: IntGauge,
    ready: IntGauge,

    // Session lifecycle
    opens_total: IntCounter,
    streams_acquired_total: IntCounter,
    streams_released_total: IntCounter,
    ready_total: IntCounter,
    failures_total: IntCounterVec,

    // Capture
    captures_total: IntCounter,
    capture_bytes_total: IntCounter,
    captures_not_ready_total: IntCounter,
}

/// Raises a counter to `target` if it is behind.
fn catch_up(counter: &IntCounter, target: u64) {
    let current = counter.get();
    if target > current {
        counter.inc_by(target - current);
    }
}

impl MetricsRegistry {
    /// Creates a new registry with all capture metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let active = IntGauge::new(
            "verify_capture_session_active",
            "Whether a video stream is held (1=held, 0=not held)",
        )?;
        let ready = IntGauge::new(
            "verify_capture_session_ready",
            "Whether the sink is producing frames (1=ready, 0=not ready)",
        )?;

        let opens_total = IntCounter::new(
            "verify_capture_opens_total",
            "Total open requests that started a stream request",
        )?;
        let streams_acquired_total = IntCounter::new(
            "verify_capture_streams_acquired_total",
            "Total video streams granted by the platform",
        )?;
        let streams_released_total = IntCounter::new(
            "verify_capture_streams_released_total",
            "Total video streams stopped by the session",
        )?;
        let ready_total = IntCounter::new(
            "verify_capture_ready_total",
            "Total transitions into the ready state",
        )?;
        let failures_total = IntCounterVec::new(
            Opts::new(
                "verify_capture_failures_total",
                "Total session failures by kind",
            ),
            &["kind"],
        )?;

        let captures_total = IntCounter::new(
            "verify_capture_captures_total",
            "Total still frames captured",
        )?;
        let capture_bytes_total = IntCounter::new(
            "verify_capture_capture_bytes_total",
            "Total encoded JPEG bytes produced",
        )?;
        let captures_not_ready_total = IntCounter::new(
            "verify_capture_captures_not_ready_total",
            "Total captures refused because the session was not ready",
        )?;

        registry.register(Box::new(active.clone()))?;
        registry.register(Box::new(ready.clone()))?;
        registry.register(Box::new(opens_total.clone()))?;
        registry.register(Box::new(streams_acquired_total.clone()))?;
        registry.register(Box::new(streams_released_total.clone()))?;
        registry.register(Box::new(ready_total.clone()))?;
        registry.register(Box::new(failures_total.clone()))?;
        registry.register(Box::new(captures_total.clone()))?;
        registry.register(Box::new(capture_bytes_total.clone()))?;
        registry.register(Box::new(captures_not_ready_total.clone()))?;

        // Pre-create every label so absent kinds export as zero
        for kind in ErrorKind::ALL {
            failures_total.with_label_values(&[kind.as_str()]);
        }

        Ok(Self {
            registry,
            active,
            ready,
            opens_total,
            streams_acquired_total,
            streams_released_total,
            ready_total,
            failures_total,
            captures_total,
            capture_bytes_total,
            captures_not_ready_total,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.active.set(i64::from(snapshot.active));
        self.ready.set(i64::from(snapshot.ready));

        // Counters only move forward
        catch_up(&self.opens_total, snapshot.opens_requested);
        catch_up(&self.streams_acquired_total, snapshot.streams_acquired);
        catch_up(&self.streams_released_total, snapshot.streams_released);
        catch_up(&self.ready_total, snapshot.ready_transitions);
        for (kind, count) in &snapshot.failures {
            catch_up(
                &self.failures_total.with_label_values(&[kind.as_str()]),
                *count,
            );
        }

        catch_up(&self.captures_total, snapshot.captures);
        catch_up(&self.capture_bytes_total, snapshot.bytes_encoded);
        catch_up(&self.captures_not_ready_total, snapshot.captures_not_ready);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl MetricsSnapshot {
    /// Creates a snapshot from the current state of a session and capturer.
    pub fn from_components(
        status: &StatusSnapshot,
        session: &SessionStats,
        capture: &CaptureStats,
    ) -> Self {
        Self {
            active: status.active,
            ready: status.ready,
            opens_requested: session.opens_requested,
            streams_acquired: session.streams_acquired,
            streams_released: session.streams_released,
            ready_transitions: session.ready_transitions,
            failures: session.failures.clone(),
            captures: capture.captures,
            bytes_encoded: capture.bytes_encoded,
            captures_not_ready: capture.not_ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        let mut failures = BTreeMap::new();
        failures.insert(ErrorKind::DeviceBusy, 2);
        let snapshot = MetricsSnapshot {
            active: true,
            ready: true,
            opens_requested: 3,
            streams_acquired: 1,
            streams_released: 0,
            ready_transitions: 1,
            failures,
            captures: 2,
            bytes_encoded: 4096,
            captures_not_ready: 1,
        };

        registry.update(&snapshot);
        // Re-applying the same totals must not double count
        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("verify_capture_session_ready 1"));
        assert!(output.contains("verify_capture_opens_total 3"));
        assert!(output.contains("verify_capture_failures_total{kind=\"device_busy\"} 2"));
        assert!(output.contains("verify_capture_captures_total 2"));
    }

    #[test]
    fn test_metrics_encode() {
        let registry = MetricsRegistry::new().unwrap();
        let output = registry.encode().unwrap();

        assert!(output.contains("verify_capture_session_active"));
        assert!(output.contains("verify_capture_failures_total{kind=\"permission_denied\"} 0"));
        assert!(output.contains("verify_capture_capture_bytes_total"));
    }

    #[test]
    fn test_snapshot_from_components() {
        let mut session = SessionStats::default();
        session.opens_requested = 4;
        session.record_failure(ErrorKind::SinkFault);
        let capture = CaptureStats {
            captures: 1,
            bytes_encoded: 100,
            not_ready: 0,
        };

        let snapshot = MetricsSnapshot::from_components(&StatusSnapshot::idle(), &session, &capture);

        assert!(!snapshot.active);
        assert_eq!(snapshot.opens_requested, 4);
        assert_eq!(snapshot.failures.get(&ErrorKind::SinkFault), Some(&1));
        assert_eq!(snapshot.bytes_encoded, 100);
    }
}
