//! Device acquisition and readiness state machine.
//!
//! A [`DeviceSession`] owns at most one hardware stream. It moves through
//!
//! ```text
//! Idle ──open()──▶ Requesting ──granted──▶ Attaching ──metadata+first frame──▶ Ready
//!   ▲                  │                       │                                 │
//!   │               rejected                 fault                             fault
//!   │                  ▼                       ▼                                 ▼
//!   └────close()─── Failed ◀───────────────────┴─────────────────────────────────┘
//! ```
//!
//! and `close()` from any state lands in `Idle`. Every transition, whether
//! triggered by a caller, a request completion or a sink event, runs under
//! one lock, and every asynchronous completion carries the epoch it was
//! started in: a completion from an older epoch is discarded and any stream
//! it carries is stopped on the spot.
//!
//! The caller supplies the rendering target explicitly with
//! [`DeviceSession::mount_sink`]. The stream is attached to it as soon as
//! both exist, in whichever order they arrive.

mod error;
mod observer;
mod readiness;
mod state;
mod stats;

pub use error::{ErrorKind, SessionError};
pub use observer::StatusObserver;

use observer::Outbox;
pub use readiness::{Readiness, ReadinessBarrier};
pub use state::{SessionState, StatusSnapshot};
pub use stats::SessionStats;

use crate::platform::{
    RejectionReason, SinkEvent, SinkEvents, SinkFault, StreamConstraints, VideoSink,
    VideoSource, VideoStream,
};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Owns an acquired stream and stops it when dropped.
struct StreamHandle<S: VideoStream> {
    stream: S,
}

impl<S: VideoStream> StreamHandle<S> {
    fn new(stream: S) -> Self {
        Self { stream }
    }

    fn get(&self) -> &S {
        &self.stream
    }
}

impl<S: VideoStream> Drop for StreamHandle<S> {
    fn drop(&mut self) {
        tracing::debug!(stream = %self.stream.id(), "Stopping video stream");
        self.stream.stop();
    }
}

/// Listeners registered for one sink attachment.
///
/// The readiness barrier is dropped on entry to `Ready`; the pump task,
/// which also carries fault events, is aborted when the scope is dropped.
struct ListenerScope {
    id: u64,
    barrier: Option<ReadinessBarrier>,
    pump: JoinHandle<()>,
}

impl Drop for ListenerScope {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

type BoxedSink<V> = Box<dyn VideoSink<<V as VideoSource>::Stream>>;

struct Core<V: VideoSource> {
    state: SessionState,
    stream: Option<StreamHandle<V::Stream>>,
    sink: Option<BoxedSink<V>>,
    listeners: Option<ListenerScope>,
    warning: Option<String>,
    last_error: Option<SessionError>,
    epoch: u64,
    attachments: u64,
    outbox: Arc<Outbox>,
    status_tx: watch::Sender<StatusSnapshot>,
    state_tx: watch::Sender<SessionState>,
    stats: SessionStats,
}

impl<V: VideoSource> Core<V> {
    fn new(outbox: Arc<Outbox>) -> Self {
        let (status_tx, _) = watch::channel(StatusSnapshot::idle());
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            state: SessionState::Idle,
            stream: None,
            sink: None,
            listeners: None,
            warning: None,
            last_error: None,
            epoch: 0,
            attachments: 0,
            outbox,
            status_tx,
            state_tx,
            stats: SessionStats::default(),
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot::new(self.state, self.warning.clone())
    }

    fn transition(&mut self, next: SessionState) {
        let prev = std::mem::replace(&mut self.state, next);
        debug_assert_eq!(
            self.stream.is_some(),
            next.holds_stream(),
            "stream handle out of step with state {next}"
        );
        tracing::debug!(from = %prev, to = %next, "Session transition");
        self.state_tx.send_replace(next);
        self.emit();
    }

    fn emit(&self) {
        let status = self.snapshot();
        self.outbox.push(status.clone());
        self.status_tx.send_replace(status);
    }

    /// Drops listeners, detaches the sink and releases the stream.
    fn teardown(&mut self) {
        if self.listeners.take().is_some() {
            if let Some(sink) = self.sink.as_mut() {
                sink.detach();
            }
        }
        if let Some(handle) = self.stream.take() {
            drop(handle);
            self.stats.streams_released += 1;
        }
    }

    fn fail(&mut self, error: SessionError) {
        tracing::warn!(
            kind = error.kind().as_str(),
            from = %self.state,
            "Session failed: {}",
            error
        );
        self.teardown();
        self.stats.record_failure(error.kind());
        self.warning = Some(error.to_string());
        self.last_error = Some(error);
        self.transition(SessionState::Failed);
    }

    fn close(&mut self) {
        if self.state == SessionState::Idle {
            tracing::trace!("Close on idle session ignored");
            return;
        }
        let from = self.state;
        self.epoch += 1;
        self.teardown();
        self.warning = None;
        self.last_error = None;
        self.transition(SessionState::Idle);
        tracing::info!(from = %from, "Session closed");
    }
}

struct Inner<V: VideoSource> {
    source: V,
    runtime: Handle,
    core: Mutex<Core<V>>,
    outbox: Arc<Outbox>,
}

/// The session lock. Queued status emissions are delivered once it is
/// released, so observers never run under it.
struct CoreGuard<'a, V: VideoSource> {
    guard: Option<MutexGuard<'a, Core<V>>>,
    outbox: &'a Outbox,
}

impl<V: VideoSource> Deref for CoreGuard<'_, V> {
    type Target = Core<V>;

    fn deref(&self) -> &Core<V> {
        match &self.guard {
            Some(guard) => guard,
            None => unreachable!("session lock released before drop"),
        }
    }
}

impl<V: VideoSource> DerefMut for CoreGuard<'_, V> {
    fn deref_mut(&mut self) -> &mut Core<V> {
        match &mut self.guard {
            Some(guard) => guard,
            None => unreachable!("session lock released before drop"),
        }
    }
}

impl<V: VideoSource> Drop for CoreGuard<'_, V> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.outbox.flush();
    }
}

impl<V: VideoSource> Inner<V> {
    fn lock(&self) -> CoreGuard<'_, V> {
        CoreGuard {
            guard: Some(self.core.lock().unwrap_or_else(PoisonError::into_inner)),
            outbox: &self.outbox,
        }
    }

    fn resolve_request(
        self: &Arc<Self>,
        ticket: u64,
        outcome: Result<V::Stream, RejectionReason>,
    ) {
        let mut core = self.lock();

        if core.epoch != ticket || core.state != SessionState::Requesting {
            if let Ok(stream) = outcome {
                tracing::warn!(
                    stream = %stream.id(),
                    "Stream granted after the request was cancelled, stopping it"
                );
                core.stats.streams_acquired += 1;
                drop(StreamHandle::new(stream));
                core.stats.streams_released += 1;
            }
            return;
        }

        match outcome {
            Ok(stream) => {
                tracing::info!(stream = %stream.id(), "Video stream acquired");
                core.stats.streams_acquired += 1;
                core.stream = Some(StreamHandle::new(stream));
                core.warning = None;
                core.last_error = None;
                core.transition(SessionState::Attaching);
                self.attach_if_mounted(&mut core);
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, "Stream request rejected");
                core.fail(SessionError::classify(&reason));
            }
        }
    }

    fn abandon_request(&self, ticket: u64, error: SessionError) {
        let mut core = self.lock();
        if core.epoch == ticket && core.state == SessionState::Requesting {
            core.fail(error);
        }
    }

    /// Attaches the held stream to the mounted sink once both exist.
    fn attach_if_mounted(self: &Arc<Self>, core: &mut Core<V>) {
        if core.state != SessionState::Attaching || core.listeners.is_some() {
            return;
        }

        let (events, rx) = SinkEvents::channel();
        let attached = match (core.sink.as_mut(), core.stream.as_ref()) {
            (Some(sink), Some(stream)) => sink.attach(stream.get(), events),
            _ => {
                tracing::debug!("Stream held, waiting for a sink to be mounted");
                return;
            }
        };

        match attached {
            Ok(()) => {
                core.attachments += 1;
                let id = core.attachments;
                let pump = self
                    .runtime
                    .spawn(pump_sink_events(Arc::downgrade(self), id, rx));
                core.listeners = Some(ListenerScope {
                    id,
                    barrier: Some(ReadinessBarrier::new()),
                    pump,
                });
                tracing::info!(attachment = id, "Sink attached, waiting for first frame");
            }
            Err(SinkFault(detail)) => core.fail(SessionError::SinkFault(detail)),
        }
    }

    /// Applies one sink event. Returns `false` once the attachment is over.
    fn on_sink_event(&self, id: u64, event: SinkEvent) -> bool {
        let mut core = self.lock();

        if !core.listeners.as_ref().is_some_and(|scope| scope.id == id) {
            tracing::trace!(attachment = id, ?event, "Dropping event from stale attachment");
            return false;
        }

        match core.state {
            SessionState::Attaching => {
                let readiness = match core.listeners.as_mut().and_then(|s| s.barrier.as_mut()) {
                    Some(barrier) => barrier.observe(&event),
                    None => Readiness::Pending,
                };
                match readiness {
                    Readiness::Pending => true,
                    Readiness::Ready { width, height } => {
                        if let Some(scope) = core.listeners.as_mut() {
                            scope.barrier = None;
                        }
                        core.stats.ready_transitions += 1;
                        core.transition(SessionState::Ready);
                        tracing::info!(width, height, "Sink producing frames, session ready");
                        true
                    }
                    Readiness::Faulted(detail) => {
                        core.fail(SessionError::SinkFault(detail));
                        false
                    }
                }
            }
            SessionState::Ready => match event {
                SinkEvent::Fault(detail) => {
                    core.fail(SessionError::SinkFault(detail));
                    false
                }
                other => {
                    tracing::trace!(?other, "Readiness event after ready ignored");
                    true
                }
            },
            _ => false,
        }
    }
}

async fn pump_sink_events<V: VideoSource>(
    inner: Weak<Inner<V>>,
    id: u64,
    mut rx: mpsc::UnboundedReceiver<SinkEvent>,
) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.on_sink_event(id, event) {
            break;
        }
    }
}

/// One verification attempt's hold on a video device.
///
/// Must be created inside a Tokio runtime. Dropping the session closes it.
pub struct DeviceSession<V: VideoSource> {
    inner: Arc<Inner<V>>,
}

impl<V: VideoSource> DeviceSession<V> {
    /// Creates an idle session over `source`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(source: V) -> Self {
        let outbox = Arc::new(Outbox::default());
        Self {
            inner: Arc::new(Inner {
                source,
                runtime: Handle::current(),
                core: Mutex::new(Core::new(Arc::clone(&outbox))),
                outbox,
            }),
        }
    }

    /// Registers an observer for every subsequent transition.
    pub fn add_observer(&self, observer: impl StatusObserver + 'static) {
        self.inner.outbox.subscribe(Arc::new(observer));
    }

    /// Subscribes to status snapshots.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.lock().status_tx.subscribe()
    }

    /// Current status.
    pub fn status(&self) -> StatusSnapshot {
        self.inner.lock().snapshot()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Current warning, if any.
    pub fn warning(&self) -> Option<String> {
        self.inner.lock().warning.clone()
    }

    /// Classified error behind the current warning.
    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.lock().last_error.clone()
    }

    /// Whether a stream handle is currently held.
    pub fn holds_stream(&self) -> bool {
        self.inner.lock().stream.is_some()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> SessionStats {
        self.inner.lock().stats.clone()
    }

    /// The platform this session acquires streams from.
    pub fn source(&self) -> &V {
        &self.inner.source
    }

    /// Requests a stream and returns the status once the request resolved.
    ///
    /// Failures are not returned as errors: they leave the session in
    /// `Failed` with a warning, visible in the returned status. Calling this
    /// while an attempt is already in progress or the session is ready
    /// returns the current status without acquiring anything.
    ///
    /// The request itself runs as a separate task, so dropping this future
    /// does not lose a granted stream: it is adopted or, if the session was
    /// closed meanwhile, stopped.
    pub async fn open(&self) -> StatusSnapshot {
        let ticket = {
            let mut core = self.inner.lock();

            if core.state != SessionState::Idle && core.state != SessionState::Failed {
                tracing::debug!(state = %core.state, "Open ignored, attempt already in progress");
                return core.snapshot();
            }

            if !self.inner.source.is_supported() {
                let error = SessionError::UnsupportedPlatform;
                tracing::warn!(kind = error.kind().as_str(), "Session failed: {}", error);
                core.stats.record_failure(error.kind());
                core.warning = Some(error.to_string());
                core.last_error = Some(error);
                core.emit();
                return core.snapshot();
            }

            core.epoch += 1;
            core.stats.opens_requested += 1;
            core.transition(SessionState::Requesting);
            core.epoch
        };

        let inner = Arc::clone(&self.inner);
        let request = self.inner.runtime.spawn(async move {
            let outcome = inner
                .source
                .request_stream(&StreamConstraints::VERIFICATION)
                .await;
            inner.resolve_request(ticket, outcome);
        });

        if let Err(e) = request.await {
            tracing::error!(error = %e, "Stream request task did not complete");
            self.inner
                .abandon_request(ticket, SessionError::Unknown(e.to_string()));
        }

        self.status()
    }

    /// Releases the stream and returns to `Idle`. No-op when idle.
    ///
    /// A request still in flight is invalidated: the stream it eventually
    /// yields is stopped immediately.
    pub fn close(&self) {
        self.inner.lock().close();
    }

    /// Hands the session its rendering target.
    ///
    /// If a stream is already held the sink is attached immediately;
    /// otherwise it is attached as soon as a stream is granted. Fails if a
    /// sink is currently attached.
    pub fn mount_sink(&self, sink: impl VideoSink<V::Stream>) -> Result<(), SinkFault> {
        let mut core = self.inner.lock();
        if core.listeners.is_some() {
            return Err(SinkFault(
                "a sink is already attached, unmount it first".to_string(),
            ));
        }
        if core.sink.replace(Box::new(sink)).is_some() {
            tracing::debug!("Replaced mounted sink");
        }
        self.inner.attach_if_mounted(&mut core);
        Ok(())
    }

    /// Removes the rendering target. Returns whether one was mounted.
    ///
    /// Unmounting an attached sink fails the session with a sink fault.
    pub fn unmount_sink(&self) -> bool {
        let mut core = self.inner.lock();
        if core.listeners.is_some() {
            core.fail(SessionError::SinkFault("sink was unmounted".to_string()));
        }
        core.sink.take().is_some()
    }

    /// Waits until the state satisfies `done` and returns it.
    pub async fn wait_until(&self, mut done: impl FnMut(SessionState) -> bool) -> SessionState {
        let mut rx = self.inner.lock().state_tx.subscribe();
        let reached = rx.wait_for(|state| done(*state)).await.map(|state| *state);
        match reached {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Waits until no attempt is in progress.
    pub async fn settled(&self) -> SessionState {
        self.wait_until(|state| !state.is_pending()).await
    }

    /// Runs `f` against the sink if the session is ready.
    pub(crate) fn with_ready_sink<R>(
        &self,
        f: impl FnOnce(&dyn VideoSink<V::Stream>) -> R,
    ) -> Option<R> {
        let core = self.inner.lock();
        if core.state != SessionState::Ready {
            return None;
        }
        core.sink.as_deref().map(f)
    }
}

impl<V: VideoSource> Drop for DeviceSession<V> {
    fn drop(&mut self) {
        self.inner.lock().close();
    }
}

impl<V: VideoSource> std::fmt::Debug for DeviceSession<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.lock();
        f.debug_struct("DeviceSession")
            .field("state", &core.state)
            .field("warning", &core.warning)
            .field("holds_stream", &core.stream.is_some())
            .field("sink_mounted", &core.sink.is_some())
            .finish()
    }
}
