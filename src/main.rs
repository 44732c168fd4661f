//! Verification Capture CLI
//!
//! Acquires a camera, waits for it to produce frames and writes the
//! requested number of JPEG stills.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use verify_capture::{
    capture::{CaptureError, CapturedImage, FrameCapturer},
    config::{Backend, ConfigError, FileConfig},
    metrics::{MetricsError, MetricsSnapshot},
    platform::{
        mock::{MockSink, MockSource},
        SinkFault, VideoSink, VideoSource,
    },
    session::{DeviceSession, SessionState, StatusSnapshot},
};

#[derive(Parser, Debug)]
#[command(name = "verify-capture")]
#[command(version, about = "Acquire a camera and capture verification stills", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Platform to acquire the stream from
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Camera device index
    #[arg(short, long)]
    device: Option<u32>,

    /// Number of stills to capture once ready
    #[arg(short = 'n', long)]
    count: Option<u32>,

    /// Directory to write stills to
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// How long to wait for the camera to become ready
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Port for the Prometheus exporter (0 disables it)
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not mount sink: {0}")]
    Sink(#[from] SinkFault),
    #[error("camera did not become ready: {0}")]
    NotReady(String),
    #[error("camera did not become ready within {0:?}")]
    Timeout(Duration),
    #[error("interrupted")]
    Interrupted,
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("failed to write still: {0}")]
    Io(#[from] std::io::Error),
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[cfg_attr(feature = "camera", allow(dead_code))]
    #[error("native backend requires building with the `camera` feature")]
    NativeUnavailable,
}

impl Args {
    /// Loads the config file, if any, and applies command-line overrides.
    fn resolve(&self) -> Result<FileConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };

        if let Some(backend) = self.backend {
            config.device.backend = backend;
        }
        if let Some(index) = self.device {
            config.device.index = index;
        }
        if let Some(count) = self.count {
            config.output.capture_count = count;
        }
        if let Some(directory) = &self.output {
            config.output.directory = directory.clone();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.session.ready_timeout_ms = timeout_ms;
        }
        if let Some(port) = self.metrics_port {
            config.output.metrics_port = port;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = match args.resolve() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Verify Capture v{}", verify_capture::VERSION);
    info!(
        backend = ?config.device.backend,
        device = config.device.index,
        captures = config.output.capture_count,
        "Starting capture"
    );

    let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    }) {
        warn!(error = %e, "Could not install interrupt handler");
    }

    let result = match config.device.backend {
        Backend::Mock => {
            run(
                MockSource::new(),
                MockSink::auto_ready(640, 480),
                &config,
                interrupt_rx,
            )
            .await
        }
        Backend::Native => run_native(&config, interrupt_rx).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "camera")]
async fn run_native(
    config: &FileConfig,
    interrupt: mpsc::UnboundedReceiver<()>,
) -> Result<(), CliError> {
    use verify_capture::platform::native::{NativeSink, NativeSource};

    run(
        NativeSource::new(config.device.index),
        NativeSink::new(),
        config,
        interrupt,
    )
    .await
}

#[cfg(not(feature = "camera"))]
async fn run_native(
    _config: &FileConfig,
    _interrupt: mpsc::UnboundedReceiver<()>,
) -> Result<(), CliError> {
    Err(CliError::NativeUnavailable)
}

async fn run<V, K>(
    source: V,
    sink: K,
    config: &FileConfig,
    mut interrupt: mpsc::UnboundedReceiver<()>,
) -> Result<(), CliError>
where
    V: VideoSource,
    K: VideoSink<V::Stream>,
{
    let exporter = Exporter::start(config.output.metrics_port)?;

    let session = Arc::new(DeviceSession::new(source));
    session.add_observer(|status: &StatusSnapshot| {
        debug!(
            active = status.active,
            ready = status.ready,
            warning = status.warning.as_deref().unwrap_or(""),
            "Status changed"
        );
    });
    let capturer = Arc::new(FrameCapturer::new().with_observer(|image: &CapturedImage| {
        debug!(
            bytes = image.len(),
            captured_at = %image.captured_at(),
            "Still handed to caller"
        );
    }));
    exporter.follow(&session, &capturer);

    session.mount_sink(sink)?;

    let timeout = config.session.ready_timeout();
    let attempt = async {
        session.open().await;
        tokio::time::timeout(timeout, session.settled()).await
    };

    let settled = tokio::select! {
        outcome = attempt => outcome,
        Some(()) = interrupt.recv() => {
            info!("Interrupted, closing session");
            session.close();
            exporter.publish(&session, &capturer).await;
            return Err(CliError::Interrupted);
        }
    };

    match settled {
        Ok(SessionState::Ready) => {}
        Ok(state) => {
            let reason = session.warning().unwrap_or_else(|| state.to_string());
            exporter.publish(&session, &capturer).await;
            log_summary(&session, &capturer);
            session.close();
            return Err(CliError::NotReady(reason));
        }
        Err(_) => {
            exporter.publish(&session, &capturer).await;
            log_summary(&session, &capturer);
            session.close();
            return Err(CliError::Timeout(timeout));
        }
    }

    std::fs::create_dir_all(&config.output.directory)?;
    for n in 1..=config.output.capture_count {
        if interrupt.try_recv().is_ok() {
            info!("Interrupted, closing session");
            session.close();
            exporter.publish(&session, &capturer).await;
            return Err(CliError::Interrupted);
        }

        let captured = capturer.capture(&session);
        exporter.publish(&session, &capturer).await;
        let image = captured?;

        let path = config.output.directory.join(format!(
            "capture-{}-{:02}.jpg",
            image.captured_at().format("%Y%m%dT%H%M%S%.3fZ"),
            n
        ));
        std::fs::write(&path, image.bytes())?;
        info!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            bytes = image.len(),
            "Wrote still"
        );
    }

    log_summary(&session, &capturer);
    session.close();
    exporter.publish(&session, &capturer).await;
    info!("Done");
    Ok(())
}

fn log_summary<V: VideoSource>(session: &DeviceSession<V>, capturer: &FrameCapturer) {
    let snapshot =
        MetricsSnapshot::from_components(&session.status(), &session.stats(), &capturer.stats());
    info!(
        opens = snapshot.opens_requested,
        acquired = snapshot.streams_acquired,
        released = snapshot.streams_released,
        ready = snapshot.ready_transitions,
        failures = snapshot.failures.values().sum::<u64>(),
        captures = snapshot.captures,
        bytes = snapshot.bytes_encoded,
        "Session summary"
    );
}

/// Feeds the HTTP exporter, when one is running.
#[derive(Clone, Default)]
struct Exporter {
    #[cfg(feature = "metrics")]
    state: Option<Arc<tokio::sync::RwLock<verify_capture::metrics::MetricsState>>>,
}

impl Exporter {
    #[cfg(feature = "metrics")]
    fn start(port: u16) -> Result<Self, CliError> {
        use verify_capture::metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig};

        if port == 0 {
            return Ok(Self::default());
        }
        let server = MetricsServer::new(MetricsServerConfig::with_port(port), MetricsRegistry::new()?);
        let state = server.state();
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "Metrics exporter stopped");
            }
        });
        Ok(Self { state: Some(state) })
    }

    #[cfg(not(feature = "metrics"))]
    fn start(port: u16) -> Result<Self, CliError> {
        if port != 0 {
            warn!(port, "Metrics exporter requested but the `metrics` feature is not enabled");
        }
        Ok(Self::default())
    }

    /// Publishes every status transition for the life of the session.
    #[cfg(feature = "metrics")]
    fn follow<V: VideoSource>(&self, session: &Arc<DeviceSession<V>>, capturer: &Arc<FrameCapturer>) {
        if self.state.is_none() {
            return;
        }
        let exporter = self.clone();
        let mut updates = session.subscribe();
        let session = Arc::downgrade(session);
        let capturer = Arc::clone(capturer);
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let Some(session) = session.upgrade() else {
                    break;
                };
                exporter.publish(&session, &capturer).await;
            }
        });
    }

    #[cfg(not(feature = "metrics"))]
    fn follow<V: VideoSource>(&self, _session: &Arc<DeviceSession<V>>, _capturer: &Arc<FrameCapturer>) {}

    #[cfg(feature = "metrics")]
    async fn publish<V: VideoSource>(&self, session: &DeviceSession<V>, capturer: &FrameCapturer) {
        if let Some(state) = &self.state {
            let status = session.status();
            let snapshot =
                MetricsSnapshot::from_components(&status, &session.stats(), &capturer.stats());
            state.write().await.publish(&status, &snapshot);
        }
    }

    #[cfg(not(feature = "metrics"))]
    async fn publish<V: VideoSource>(&self, _session: &DeviceSession<V>, _capturer: &FrameCapturer) {}
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;
    use verify_capture::metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig};

    fn exporter() -> Exporter {
        let server = MetricsServer::new(
            MetricsServerConfig::with_port(0),
            MetricsRegistry::new().unwrap(),
        );
        Exporter {
            state: Some(server.state()),
        }
    }

    async fn drain_tasks() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_exporter_tracks_session_while_running() {
        let exporter = exporter();
        let session = Arc::new(DeviceSession::new(MockSource::new()));
        let capturer = Arc::new(FrameCapturer::new());
        exporter.follow(&session, &capturer);
        session.mount_sink(MockSink::auto_ready(64, 48)).unwrap();

        session.open().await;
        assert_eq!(session.settled().await, SessionState::Ready);
        drain_tasks().await;

        let state = exporter.state.as_ref().unwrap();
        assert!(state.read().await.status().ready);
        assert!(state.read().await.updated_at().is_some());
        assert!(state
            .read()
            .await
            .encode()
            .unwrap()
            .contains("verify_capture_session_ready 1"));

        capturer.capture(&session).unwrap();
        exporter.publish(&session, &capturer).await;
        assert!(state
            .read()
            .await
            .encode()
            .unwrap()
            .contains("verify_capture_captures_total 1"));
    }

    #[tokio::test]
    async fn test_exporter_sees_failure_before_exit() {
        let exporter = exporter();
        let source = MockSource::new();
        source.reject_next("NotReadableError");
        let session = Arc::new(DeviceSession::new(source));
        let capturer = Arc::new(FrameCapturer::new());
        exporter.follow(&session, &capturer);

        session.open().await;
        drain_tasks().await;

        let state = exporter.state.as_ref().unwrap().read().await;
        assert!(!state.status().active);
        assert!(state.status().warning.is_some());
        assert!(state
            .encode()
            .unwrap()
            .contains("verify_capture_failures_total{kind=\"device_busy\"} 1"));
    }

    #[test]
    fn test_disabled_port_starts_no_exporter() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let exporter = rt.block_on(async { Exporter::start(0) }).unwrap();
        assert!(exporter.state.is_none());
    }
}
