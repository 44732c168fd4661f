//! Status observer interface and delivery queue.

use super::StatusSnapshot;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Receives a [`StatusSnapshot`] on every session transition.
///
/// Snapshots are delivered in transition order, synchronously on the thread
/// that made the transition, after the session's state lock is released.
/// An observer may read or drive the session it observes; snapshots emitted
/// while it runs are delivered once it returns.
pub trait StatusObserver: Send + Sync {
    /// Called once per transition.
    fn on_status_change(&self, status: &StatusSnapshot);
}

impl<F> StatusObserver for F
where
    F: Fn(&StatusSnapshot) + Send + Sync,
{
    fn on_status_change(&self, status: &StatusSnapshot) {
        self(status)
    }
}

#[derive(Default)]
struct OutboxState {
    observers: Vec<Arc<dyn StatusObserver>>,
    queue: VecDeque<StatusSnapshot>,
    draining: bool,
}

/// Snapshots queued under the session lock, delivered after it is released.
///
/// One caller drains at a time. A reentrant or concurrent flush leaves its
/// snapshots to the active drainer, which keeps delivery in queue order.
#[derive(Default)]
pub(crate) struct Outbox {
    state: Mutex<OutboxState>,
}

impl Outbox {
    fn lock(&self) -> MutexGuard<'_, OutboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self, observer: Arc<dyn StatusObserver>) {
        self.lock().observers.push(observer);
    }

    pub(crate) fn push(&self, status: StatusSnapshot) {
        self.lock().queue.push_back(status);
    }

    pub(crate) fn flush(&self) {
        {
            let mut state = self.lock();
            if state.draining || state.queue.is_empty() {
                return;
            }
            state.draining = true;
        }

        loop {
            let (status, observers) = {
                let mut state = self.lock();
                match state.queue.pop_front() {
                    Some(status) => (status, state.observers.clone()),
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            for observer in &observers {
                observer.on_status_change(&status);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    #[test]
    fn test_reentrant_push_delivered_after_current() {
        let outbox = Arc::new(Outbox::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        outbox.subscribe(Arc::new({
            let outbox = Arc::downgrade(&outbox);
            let seen = Arc::clone(&seen);
            move |status: &StatusSnapshot| {
                seen.lock().unwrap().push(status.ready);
                if !status.ready {
                    if let Some(outbox) = outbox.upgrade() {
                        outbox.push(StatusSnapshot::new(SessionState::Ready, None));
                        // Nested flush returns at once; the outer loop delivers
                        outbox.flush();
                    }
                }
            }
        }));

        outbox.push(StatusSnapshot::idle());
        outbox.flush();

        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
        assert!(outbox.lock().queue.is_empty());
        assert!(!outbox.lock().draining);
    }
}
