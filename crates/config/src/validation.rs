//! Configuration validation

use crate::{AppConfig, CacheBackend, ConfigError, RelayConfig, Result};
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration, reporting every violation
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let errors = collect_errors(config);

    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Every violation in `config`, in section order
pub fn collect_errors(config: &AppConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Network
    if let Err(e) = validate_log_level(&config.network.log_level) {
        errors.push(e);
    }

    if !matches!(config.network.log_format.as_str(), "json" | "pretty") {
        errors.push(ValidationError::new(
            "network.log_format",
            format!("invalid log format '{}', must be json or pretty", config.network.log_format),
        ));
    }

    if config.network.metrics_enabled && config.network.metrics_port == 0 {
        errors.push(ValidationError::new(
            "network.metrics_port",
            "metrics port must be greater than 0",
        ));
    }

    // Relays
    errors.extend(validate_relays(&config.relays));

    // Expiration
    if config.expiration.window_secs == 0 {
        errors.push(ValidationError::new(
            "expiration.window_secs",
            "must be greater than 0",
        ));
    }

    // Gate
    if config.gate.poll_interval_secs == 0 {
        errors.push(ValidationError::new(
            "gate.poll_interval_secs",
            "must be greater than 0",
        ));
    }

    if config.gate.retry_initial_secs == 0 {
        errors.push(ValidationError::new(
            "gate.retry_initial_secs",
            "must be greater than 0",
        ));
    } else if config.gate.retry_initial_secs > config.gate.poll_interval_secs {
        errors.push(ValidationError::new(
            "gate.retry_initial_secs",
            "must not exceed gate.poll_interval_secs",
        ));
    }

    // Stability
    if config.stability.tick_interval_ms == 0 {
        errors.push(ValidationError::new(
            "stability.tick_interval_ms",
            "must be greater than 0",
        ));
    }

    // Settlement
    if config.settlement.max_batch_size == 0 {
        errors.push(ValidationError::new(
            "settlement.max_batch_size",
            "must be greater than 0",
        ));
    }

    if config.settlement.submit_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "settlement.submit_timeout_secs",
            "must be greater than 0",
        ));
    }

    // Cache
    if config.cache.backend == CacheBackend::Sqlite && config.cache.path.trim().is_empty() {
        errors.push(ValidationError::new(
            "cache.path",
            "database path is required for the sqlite backend",
        ));
    }

    // Sync
    if config.sync.interval_secs == 0 {
        errors.push(ValidationError::new(
            "sync.interval_secs",
            "must be greater than 0",
        ));
    }

    if config.sync.query_limit == Some(0) {
        errors.push(ValidationError::new(
            "sync.query_limit",
            "must be greater than 0 when set",
        ));
    }

    errors
}

fn validate_relays(relays: &RelayConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if relays.urls.is_empty() {
        errors.push(ValidationError::new(
            "relays.urls",
            "at least one relay must be configured",
        ));
    }

    let unique: HashSet<_> = relays.urls.iter().collect();
    if unique.len() != relays.urls.len() {
        errors.push(ValidationError::new(
            "relays.urls",
            "duplicate relay URLs found",
        ));
    }

    for (idx, url) in relays.urls.iter().enumerate() {
        if let Err(e) = validate_relay_url(url) {
            errors.push(ValidationError::new(format!("relays.urls[{idx}]"), e));
        }
    }

    if relays.query_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "relays.query_timeout_ms",
            "must be greater than 0",
        ));
    }

    if relays.publish_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "relays.publish_timeout_ms",
            "must be greater than 0",
        ));
    }

    if relays.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "relays.failure_threshold",
            "must be greater than 0",
        ));
    }

    errors
}

/// Relays speak websockets
pub fn validate_relay_url(url: &str) -> std::result::Result<(), String> {
    if url.is_empty() {
        return Err("URL cannot be empty".to_string());
    }

    let rest = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .ok_or_else(|| "relay URL must start with ws:// or wss://".to_string())?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err("relay URL must include a host".to_string());
    }

    Ok(())
}

fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "network.log_level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}
