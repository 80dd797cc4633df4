use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingOptions {
    /// Default directive when `RUST_LOG` is unset (e.g. `info`)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LoggingOptions {
    pub fn new(level: impl Into<String>, format: LogFormat) -> Self {
        Self {
            level: level.into(),
            format,
        }
    }

    /// `RUST_LOG` overrides the configured level
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(options: &LoggingOptions) -> Result<(), TracingError> {
    let (json, pretty) = match options.format {
        LogFormat::Json => (
            Some(fmt::layer().with_target(true).with_level(true).json()),
            None,
        ),
        LogFormat::Pretty => (None, Some(fmt::layer().with_target(true).pretty())),
    };

    tracing_subscriber::registry()
        .with(options.env_filter())
        .with(json)
        .with(pretty)
        .try_init()
        .map_err(|e| TracingError::InitError(e.to_string()))
}

/// Correlation id attached to one settlement attempt's logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span wrapping a settlement attempt
#[derive(Debug, Clone)]
pub struct SettlementSpan {
    pub correlation_id: CorrelationId,
    pub sender: String,
}

impl SettlementSpan {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            sender: sender.into(),
        }
    }

    /// Use with `tracing::Instrument::instrument` across awaits
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "settlement",
            correlation_id = %self.correlation_id,
            sender = %self.sender,
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
}
