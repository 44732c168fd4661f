//! Classification of session failures.
//!
//! Every failure lands the session in `Failed` with the error's `Display`
//! text as the operator-facing warning. Nothing here is fatal: `open()` may
//! always be retried.

use crate::platform::RejectionReason;
use serde::Serialize;
use thiserror::Error;

/// Why a session attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Camera access was denied. Allow camera access and try again.")]
    PermissionDenied,
    #[error("No camera was found. Connect a camera and try again.")]
    DeviceNotFound,
    #[error("The camera is busy or in use by another application. Close it and try again.")]
    DeviceBusy,
    #[error("The camera cannot provide the requested video format.")]
    ConstraintsUnsatisfiable,
    #[error("Camera capture is not supported on this platform.")]
    UnsupportedPlatform,
    #[error("The video feed failed: {0}")]
    SinkFault(String),
    #[error("Could not start the camera: {0}")]
    Unknown(String),
}

impl SessionError {
    /// Maps a platform rejection to an error. Deterministic on the name.
    pub fn classify(reason: &RejectionReason) -> Self {
        match reason.name.as_str() {
            "NotAllowedError" => SessionError::PermissionDenied,
            "NotFoundError" => SessionError::DeviceNotFound,
            "NotReadableError" => SessionError::DeviceBusy,
            "OverconstrainedError" => SessionError::ConstraintsUnsatisfiable,
            _ => SessionError::Unknown(reason.to_string()),
        }
    }

    /// Payload-free kind, for metrics labels.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::PermissionDenied => ErrorKind::PermissionDenied,
            SessionError::DeviceNotFound => ErrorKind::DeviceNotFound,
            SessionError::DeviceBusy => ErrorKind::DeviceBusy,
            SessionError::ConstraintsUnsatisfiable => ErrorKind::ConstraintsUnsatisfiable,
            SessionError::UnsupportedPlatform => ErrorKind::UnsupportedPlatform,
            SessionError::SinkFault(_) => ErrorKind::SinkFault,
            SessionError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

impl From<&RejectionReason> for SessionError {
    fn from(reason: &RejectionReason) -> Self {
        SessionError::classify(reason)
    }
}

/// Kind of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    DeviceNotFound,
    DeviceBusy,
    ConstraintsUnsatisfiable,
    UnsupportedPlatform,
    SinkFault,
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::PermissionDenied,
        ErrorKind::DeviceNotFound,
        ErrorKind::DeviceBusy,
        ErrorKind::ConstraintsUnsatisfiable,
        ErrorKind::UnsupportedPlatform,
        ErrorKind::SinkFault,
        ErrorKind::Unknown,
    ];

    /// Snake-case label.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::DeviceNotFound => "device_not_found",
            ErrorKind::DeviceBusy => "device_busy",
            ErrorKind::ConstraintsUnsatisfiable => "constraints_unsatisfiable",
            ErrorKind::UnsupportedPlatform => "unsupported_platform",
            ErrorKind::SinkFault => "sink_fault",
            ErrorKind::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(name: &str) -> SessionError {
        SessionError::classify(&RejectionReason::new(name, "detail"))
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(classify("NotAllowedError"), SessionError::PermissionDenied);
        assert_eq!(classify("NotFoundError"), SessionError::DeviceNotFound);
        assert_eq!(classify("NotReadableError"), SessionError::DeviceBusy);
        assert_eq!(
            classify("OverconstrainedError"),
            SessionError::ConstraintsUnsatisfiable
        );
    }

    #[test]
    fn test_unrecognized_names_are_unknown() {
        for name in ["AbortError", "SecurityError", "notallowederror", ""] {
            match classify(name) {
                SessionError::Unknown(detail) => assert!(detail.contains("detail")),
                other => panic!("{name:?} classified as {other:?}"),
            }
        }
    }

    #[test]
    fn test_messages_are_operator_facing() {
        assert!(SessionError::DeviceBusy.to_string().contains("in use"));
        assert!(SessionError::PermissionDenied.to_string().contains("denied"));
        assert_eq!(
            SessionError::SinkFault("decoder stalled".into()).to_string(),
            "The video feed failed: decoder stalled"
        );
    }

    #[test]
    fn test_kind_labels_unique() {
        let labels: std::collections::HashSet<_> =
            ErrorKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(labels.len(), ErrorKind::ALL.len());
    }
}
