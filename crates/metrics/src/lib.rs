//! Metrics and logging for the LASH engine.
//!
//! Prometheus metrics are registered process-wide and recorded through
//! [`MetricsCollector`]; [`MetricsServer`] exposes them over HTTP.
//! [`init_tracing`] installs the structured log subscriber.
//!
//! # Example
//!
//! ```no_run
//! use lash_metrics::{init_tracing, LoggingOptions, MetricsCollector, MetricsServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     init_tracing(&LoggingOptions::default()).unwrap();
//!
//!     let collector = Arc::new(MetricsCollector::new());
//!     collector.record_settlement_attempt("skipped");
//!
//!     let server = MetricsServer::new(collector.clone(), "0.0.0.0:9090");
//!     server.serve().await.unwrap();
//! }
//! ```

pub mod collector;
pub mod http;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError, SyncResult};
pub use http::{MetricsServer, MetricsServerError, Readiness};
pub use tracing::{
    init_tracing, CorrelationId, LogFormat, LoggingOptions, SettlementSpan, TracingError,
};
