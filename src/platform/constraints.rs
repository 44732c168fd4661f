//! Stream request constraints.

use serde::Serialize;

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Front-facing, towards the operator.
    User,
    /// Rear-facing.
    Environment,
}

/// Constraints passed to [`VideoSource::request_stream`](super::VideoSource::request_stream).
///
/// Width and height are ideals, not hard requirements: a platform may
/// return the closest format it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamConstraints {
    /// Ideal frame width in pixels.
    pub ideal_width: u32,
    /// Ideal frame height in pixels.
    pub ideal_height: u32,
    /// Requested camera orientation.
    pub facing: FacingMode,
    /// Whether an audio track is requested.
    pub audio: bool,
}

impl StreamConstraints {
    /// The fixed constraints every verification session requests.
    pub const VERIFICATION: StreamConstraints = StreamConstraints {
        ideal_width: 640,
        ideal_height: 480,
        facing: FacingMode::User,
        audio: false,
    };
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self::VERIFICATION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_constraints() {
        let c = StreamConstraints::default();
        assert_eq!(c.ideal_width, 640);
        assert_eq!(c.ideal_height, 480);
        assert_eq!(c.facing, FacingMode::User);
        assert!(!c.audio);
    }
}
