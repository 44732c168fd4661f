//! HTTP exporter for capture metrics and session status.
//!
//! Serves `/metrics` (Prometheus text), `/status` (latest
//! [`StatusSnapshot`] as JSON) and `/health`. The exporter never reads the
//! session itself; the owner publishes into [`MetricsState`].

use crate::metrics::{MetricsError, MetricsRegistry, MetricsSnapshot};
use crate::session::StatusSnapshot;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

/// Errors from the metrics exporter.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind metrics exporter: {0}")]
    Bind(#[from] std::io::Error),

    #[error("metrics exporter stopped: {0}")]
    Server(String),
}

/// Where the exporter listens.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Listen address. Loopback unless explicitly overridden.
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self::with_port(9090)
    }
}

impl MetricsServerConfig {
    /// Loopback listener on `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], port).into(),
        }
    }
}

/// Latest published values served by the exporter.
pub struct MetricsState {
    registry: MetricsRegistry,
    status: StatusSnapshot,
    updated_at: Option<DateTime<Utc>>,
}

impl MetricsState {
    /// Records the current session status and counters.
    pub fn publish(&mut self, status: &StatusSnapshot, snapshot: &MetricsSnapshot) {
        self.registry.update(snapshot);
        self.status = status.clone();
        self.updated_at = Some(Utc::now());
    }

    /// Last published status.
    pub fn status(&self) -> &StatusSnapshot {
        &self.status
    }

    /// When values were last published.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Current metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        self.registry.encode()
    }
}

type SharedState = Arc<RwLock<MetricsState>>;

#[derive(Serialize)]
struct StatusBody {
    #[serde(flatten)]
    status: StatusSnapshot,
    updated_at: Option<DateTime<Utc>>,
}

/// HTTP exporter.
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: SharedState,
}

impl MetricsServer {
    /// Creates an exporter that serves `registry`.
    pub fn new(config: MetricsServerConfig, registry: MetricsRegistry) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(MetricsState {
                registry,
                status: StatusSnapshot::idle(),
                updated_at: None,
            })),
        }
    }

    /// Handle used to publish new values.
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(serve_metrics))
            .route("/status", get(serve_status))
            .route("/health", get(|| async { (StatusCode::OK, "OK") }))
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.state))
    }

    /// Binds and serves until the task is dropped or the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Metrics exporter listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| ServerError::Server(e.to_string()))
    }
}

async fn serve_metrics(State(state): State<SharedState>) -> impl IntoResponse {
    match state.read().await.registry.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Metrics encoding failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

async fn serve_status(State(state): State<SharedState>) -> Json<StatusBody> {
    let state = state.read().await;
    Json(StatusBody {
        status: state.status.clone(),
        updated_at: state.updated_at,
    })
}
