use lash_cache::{CacheStore, InMemoryCache, SqliteStore};
use lash_config::{validate_config, AppConfig, CacheBackend, CacheConfig, NetworkConfig};
use lash_metrics::{LogFormat, LoggingOptions};
use lash_relay::PoolConfig;
use lash_resilience::CircuitBreakerConfig;
use lash_settlement::{GateConfig, OrchestratorConfig};
use lash_sync::{ExpirationPolicy, ReconcilerConfig};
use std::sync::Arc;
use std::time::Duration;

use crate::EngineError;

/// Runtime settings for one [`SenderEngine`](crate::SenderEngine), derived
/// from the file-level [`AppConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub reconciler: ReconcilerConfig,
    pub gate: GateConfig,
    /// Payable set must stay unchanged this long before settling
    pub quiet_period: Duration,
    /// Cadence of stability and settlement evaluation
    pub tick_interval: Duration,
    /// Cadence of relay reconciliation
    pub sync_interval: Duration,
    pub orchestrator: OrchestratorConfig,
    pub live_subscription: bool,
}

impl EngineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let expiration =
            ExpirationPolicy::new(Duration::from_secs(config.expiration.window_secs));

        Self {
            pool: PoolConfig {
                query_timeout: Duration::from_millis(config.relays.query_timeout_ms),
                publish_timeout: Duration::from_millis(config.relays.publish_timeout_ms),
                breaker: CircuitBreakerConfig {
                    failure_threshold: config.relays.failure_threshold,
                    cooldown: Duration::from_secs(config.relays.cooldown_secs),
                    ..CircuitBreakerConfig::default()
                },
                ..PoolConfig::default()
            },
            reconciler: ReconcilerConfig {
                query_timeout: Duration::from_millis(config.relays.query_timeout_ms),
                since_overlap: Duration::from_secs(config.sync.since_overlap_secs),
                query_limit: config.sync.query_limit,
                full_sync_every: config.sync.full_sync_every,
            },
            gate: GateConfig {
                poll_interval: Duration::from_secs(config.gate.poll_interval_secs),
                retry_initial: Duration::from_secs(config.gate.retry_initial_secs),
            },
            quiet_period: Duration::from_millis(config.stability.quiet_period_ms),
            tick_interval: Duration::from_millis(config.stability.tick_interval_ms),
            sync_interval: Duration::from_secs(config.sync.interval_secs),
            orchestrator: OrchestratorConfig {
                max_batch_size: config.settlement.max_batch_size,
                submit_timeout: Duration::from_secs(config.settlement.submit_timeout_secs),
                expiration,
            },
            live_subscription: config.sync.live_subscription,
        }
    }

    /// Validate first, reporting every violation
    pub fn try_from_app_config(config: &AppConfig) -> Result<Self, EngineError> {
        validate_config(config)?;
        Ok(Self::from_app_config(config))
    }

    pub fn expiration(&self) -> ExpirationPolicy {
        self.orchestrator.expiration
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

/// Log settings for [`lash_metrics::init_tracing`]. Unknown formats fall back
/// to JSON.
pub fn logging_options(network: &NetworkConfig) -> LoggingOptions {
    let format = match network.log_format.as_str() {
        "pretty" => LogFormat::Pretty,
        _ => LogFormat::Json,
    };
    LoggingOptions::new(network.log_level.clone(), format)
}

/// Open the configured tip cache
pub async fn open_cache(config: &CacheConfig) -> Result<Arc<dyn CacheStore>, EngineError> {
    match config.backend {
        CacheBackend::Memory => Ok(Arc::new(InMemoryCache::new())),
        CacheBackend::Sqlite => {
            let store = SqliteStore::new(&config.path).await?;
            Ok(Arc::new(store))
        }
    }
}
