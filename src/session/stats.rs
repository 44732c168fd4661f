//! Lifetime counters for a session.

use super::ErrorKind;
use std::collections::BTreeMap;

/// Counters kept by a [`DeviceSession`](super::DeviceSession).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// `open()` calls that started a request.
    pub opens_requested: u64,
    /// Streams granted by the platform, including ones discarded as stale.
    pub streams_acquired: u64,
    /// Streams stopped by the session.
    pub streams_released: u64,
    /// Transitions into `Ready`.
    pub ready_transitions: u64,
    /// Failures by kind.
    pub failures: BTreeMap<ErrorKind, u64>,
}

impl SessionStats {
    pub(crate) fn record_failure(&mut self, kind: ErrorKind) {
        *self.failures.entry(kind).or_insert(0) += 1;
    }

    /// Failures of one kind.
    pub fn failures_of(&self, kind: ErrorKind) -> u64 {
        self.failures.get(&kind).copied().unwrap_or(0)
    }

    /// Failures of every kind.
    pub fn total_failures(&self) -> u64 {
        self.failures.values().sum()
    }

    /// Streams granted and not yet stopped.
    pub fn live_streams(&self) -> u64 {
        self.streams_acquired.saturating_sub(self.streams_released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counting() {
        let mut stats = SessionStats::default();
        stats.record_failure(ErrorKind::DeviceBusy);
        stats.record_failure(ErrorKind::DeviceBusy);
        stats.record_failure(ErrorKind::SinkFault);

        assert_eq!(stats.failures_of(ErrorKind::DeviceBusy), 2);
        assert_eq!(stats.failures_of(ErrorKind::PermissionDenied), 0);
        assert_eq!(stats.total_failures(), 3);
    }
}
