//! Events a sink reports while presenting a stream.

use tokio::sync::mpsc;

/// Progress and fault notifications from a [`VideoSink`](super::VideoSink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Stream metadata arrived; frame dimensions are known.
    Metadata {
        /// Frame width in pixels.
        width: u32,
        /// Frame height in pixels.
        height: u32,
    },
    /// The first frame has been presented.
    FirstFrame,
    /// The sink hit an I/O fault and stopped presenting.
    Fault(String),
}

/// Sending half handed to a sink on attach.
///
/// Each attachment gets its own channel. Once the session leaves the
/// attachment (ready listeners dropped, stream released or a newer
/// attachment made), events sent here go nowhere.
#[derive(Debug, Clone)]
pub struct SinkEvents {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl SinkEvents {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Reports an event. Returns `false` if the session stopped listening.
    pub fn emit(&self, event: SinkEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Reports stream metadata.
    pub fn metadata(&self, width: u32, height: u32) -> bool {
        self.emit(SinkEvent::Metadata { width, height })
    }

    /// Reports the first presented frame.
    pub fn first_frame(&self) -> bool {
        self.emit(SinkEvent::FirstFrame)
    }

    /// Reports a fault.
    pub fn fault(&self, detail: impl Into<String>) -> bool {
        self.emit(SinkEvent::Fault(detail.into()))
    }

    /// Whether the session is still listening on this attachment.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (events, rx) = SinkEvents::channel();
        assert!(events.first_frame());
        drop(rx);
        assert!(!events.is_connected());
        assert!(!events.metadata(640, 480));
    }

    #[test]
    fn test_events_arrive_in_order() {
        let (events, mut rx) = SinkEvents::channel();
        events.metadata(320, 240);
        events.first_frame();
        assert_eq!(
            rx.try_recv().unwrap(),
            SinkEvent::Metadata {
                width: 320,
                height: 240
            }
        );
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::FirstFrame);
    }
}
