use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::collector::{MetricsCollector, MetricsError};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Set once the engine has completed its first relay sync
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
struct ServerState {
    collector: Arc<MetricsCollector>,
    readiness: Readiness,
}

/// HTTP endpoint for scrapes and probes: `/metrics`, `/health`, `/ready`
pub struct MetricsServer {
    state: ServerState,
    addr: String,
}

impl MetricsServer {
    pub fn new(collector: Arc<MetricsCollector>, addr: impl Into<String>) -> Self {
        Self {
            state: ServerState {
                collector,
                readiness: Readiness::new(),
            },
            addr: addr.into(),
        }
    }

    /// Report readiness from an existing flag instead of a private one
    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.state.readiness = readiness;
        self
    }

    pub fn readiness(&self) -> &Readiness {
        &self.state.readiness
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(scrape))
            .route("/health", get(|| async { StatusCode::OK }))
            .route("/ready", get(ready))
            .with_state(self.state.clone())
    }

    pub async fn serve(self) -> Result<(), MetricsServerError> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), MetricsServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| MetricsServerError::Bind {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(addr = %self.addr, "Serving LASH metrics");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| MetricsServerError::Serve(e.to_string()))
    }
}

async fn scrape(State(state): State<ServerState>) -> Response {
    match state.collector.export_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(MetricsError::EncodingError(reason)) => {
            tracing::warn!(error = %reason, "Metrics export failed");
            (StatusCode::INTERNAL_SERVER_ERROR, reason).into_response()
        }
    }
}

async fn ready(State(state): State<ServerState>) -> StatusCode {
    if state.readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsServerError {
    #[error("cannot bind metrics endpoint to {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("metrics endpoint failed: {0}")]
    Serve(String),
}
