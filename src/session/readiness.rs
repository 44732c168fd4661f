//! Two-stage readiness barrier.
//!
//! A sink is ready once it has reported metadata with non-zero dimensions
//! and presented a first frame. Hardware may deliver the first-frame
//! notification before metadata; it is remembered until metadata arrives.

use crate::platform::SinkEvent;

/// Outcome of feeding one event to the barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Still waiting on one or both stages.
    Pending,
    /// Both stages passed.
    Ready {
        /// Width reported in metadata.
        width: u32,
        /// Height reported in metadata.
        height: u32,
    },
    /// The sink faulted before becoming ready.
    Faulted(String),
}

/// Tracks metadata and first-frame stages.
#[derive(Debug, Default, Clone)]
pub struct ReadinessBarrier {
    metadata: Option<(u32, u32)>,
    first_frame: bool,
}

impl ReadinessBarrier {
    /// Creates a barrier with neither stage passed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds an event and reports where the barrier stands.
    pub fn observe(&mut self, event: &SinkEvent) -> Readiness {
        match event {
            SinkEvent::Fault(detail) => return Readiness::Faulted(detail.clone()),
            SinkEvent::Metadata { width, height } => {
                if *width == 0 || *height == 0 {
                    tracing::trace!(width, height, "ignoring metadata with empty dimensions");
                } else {
                    self.metadata = Some((*width, *height));
                }
            }
            SinkEvent::FirstFrame => {
                if self.metadata.is_none() {
                    tracing::trace!("first frame before metadata, holding");
                }
                self.first_frame = true;
            }
        }

        match self.metadata {
            Some((width, height)) if self.first_frame => Readiness::Ready { width, height },
            _ => Readiness::Pending,
        }
    }

    /// Whether metadata has been seen.
    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(width: u32, height: u32) -> SinkEvent {
        SinkEvent::Metadata { width, height }
    }

    #[test]
    fn test_ready_after_metadata_then_frame() {
        let mut barrier = ReadinessBarrier::new();
        assert_eq!(barrier.observe(&metadata(640, 480)), Readiness::Pending);
        assert!(barrier.has_metadata());
        assert_eq!(
            barrier.observe(&SinkEvent::FirstFrame),
            Readiness::Ready {
                width: 640,
                height: 480
            }
        );
    }

    #[test]
    fn test_frame_before_metadata_is_held() {
        let mut barrier = ReadinessBarrier::new();
        assert_eq!(barrier.observe(&SinkEvent::FirstFrame), Readiness::Pending);
        assert_eq!(
            barrier.observe(&metadata(320, 240)),
            Readiness::Ready {
                width: 320,
                height: 240
            }
        );
    }

    #[test]
    fn test_zero_dimensions_do_not_pass_stage_one() {
        let mut barrier = ReadinessBarrier::new();
        barrier.observe(&metadata(0, 480));
        assert_eq!(barrier.observe(&SinkEvent::FirstFrame), Readiness::Pending);
        assert!(!barrier.has_metadata());
    }

    #[test]
    fn test_fault_wins() {
        let mut barrier = ReadinessBarrier::new();
        barrier.observe(&metadata(640, 480));
        assert_eq!(
            barrier.observe(&SinkEvent::Fault("usb reset".into())),
            Readiness::Faulted("usb reset".into())
        );
    }
}
