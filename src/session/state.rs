//! Session states and the status value collaborators observe.

use serde::Serialize;

/// Lifecycle state of a [`DeviceSession`](super::DeviceSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No stream held, nothing in flight.
    Idle,
    /// Waiting for the platform to grant or deny a stream.
    Requesting,
    /// Stream held, waiting for the sink to confirm frames.
    Attaching,
    /// Stream held and the sink is producing frames.
    Ready,
    /// Last attempt failed. Retry with `open()`.
    Failed,
}

impl SessionState {
    /// Whether a stream handle is held in this state.
    #[inline]
    pub fn holds_stream(self) -> bool {
        matches!(self, SessionState::Attaching | SessionState::Ready)
    }

    /// Whether an attempt is still in progress.
    #[inline]
    pub fn is_pending(self) -> bool {
        matches!(self, SessionState::Requesting | SessionState::Attaching)
    }

    /// Short lowercase name, used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Requesting => "requesting",
            SessionState::Attaching => "attaching",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status emitted to collaborators on every transition.
///
/// `ready` means the video sink is confirmed producing frames. It is a
/// readiness flag only: nothing here inspects frame content, so it says
/// nothing about whether a face is in view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// A stream is held (attaching or ready).
    pub active: bool,
    /// The sink is producing frames and capture may proceed.
    pub ready: bool,
    /// Operator-facing diagnostic from the last failure.
    pub warning: Option<String>,
}

impl StatusSnapshot {
    /// Builds the snapshot for `state` with the given warning.
    pub fn new(state: SessionState, warning: Option<String>) -> Self {
        Self {
            active: state.holds_stream(),
            ready: state == SessionState::Ready,
            warning,
        }
    }

    /// Snapshot of a fresh session.
    pub fn idle() -> Self {
        Self::new(SessionState::Idle, None)
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_flags_per_state() {
        let cases = [
            (SessionState::Idle, false, false),
            (SessionState::Requesting, false, false),
            (SessionState::Attaching, true, false),
            (SessionState::Ready, true, true),
            (SessionState::Failed, false, false),
        ];
        for (state, active, ready) in cases {
            let snap = StatusSnapshot::new(state, None);
            assert_eq!(snap.active, active, "{state}");
            assert_eq!(snap.ready, ready, "{state}");
        }
    }

    #[test]
    fn test_pending_states() {
        assert!(SessionState::Requesting.is_pending());
        assert!(SessionState::Attaching.is_pending());
        assert!(!SessionState::Ready.is_pending());
        assert!(!SessionState::Failed.is_pending());
    }
}
