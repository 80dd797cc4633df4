//! Configuration structures for the LASH engine

use serde::{Deserialize, Serialize};

/// Main application configuration. Every section and tunable has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub relays: RelayConfig,

    #[serde(default)]
    pub expiration: ExpirationConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub stability: StabilityConfig,

    #[serde(default)]
    pub settlement: SettlementConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

/// Process-level settings: logging and metrics exposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Local,
}

/// Relay node set and per-node resilience
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default = "default_relay_timeout_ms")]
    pub query_timeout_ms: u64,

    #[serde(default = "default_relay_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Consecutive failures before a node is skipped
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long a failing node is skipped
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpirationConfig {
    /// Lifetime of a pending tip without an explicit expiry (72h)
    #[serde(default = "default_expiration_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_gate_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// First retry delay after the oracle fails; doubles up to the interval
    #[serde(default = "default_gate_retry_initial_secs")]
    pub retry_initial_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// Payable set must stay unchanged this long before settling
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,

    /// Settlement evaluation tick
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Recipients per payment; the remainder waits for the next cycle
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,

    /// Database file for the sqlite backend
    #[serde(default = "default_cache_path")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,

    /// Incremental syncs re-read this much history
    #[serde(default = "default_since_overlap_secs")]
    pub since_overlap_secs: u64,

    #[serde(default)]
    pub query_limit: Option<usize>,

    /// Incremental syncs between two full resyncs; 0 makes every sync full
    #[serde(default = "default_full_sync_every")]
    pub full_sync_every: u32,

    /// Keep a live subscription open between syncs
    #[serde(default = "default_true")]
    pub live_subscription: bool,
}

// Default value functions
fn default_environment() -> Environment {
    Environment::Local
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_relay_timeout_ms() -> u64 {
    10_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_expiration_window_secs() -> u64 {
    72 * 60 * 60
}

fn default_gate_poll_interval_secs() -> u64 {
    120
}

fn default_gate_retry_initial_secs() -> u64 {
    5
}

fn default_quiet_period_ms() -> u64 {
    5_000
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_max_batch_size() -> usize {
    50
}

fn default_submit_timeout_secs() -> u64 {
    60
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Sqlite
}

fn default_cache_path() -> String {
    "lash-cache.db".to_string()
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_since_overlap_secs() -> u64 {
    300 // 5 minutes
}

fn default_full_sync_every() -> u32 {
    10
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_enabled: default_true(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            query_timeout_ms: default_relay_timeout_ms(),
            publish_timeout_ms: default_relay_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            window_secs: default_expiration_window_secs(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_gate_poll_interval_secs(),
            retry_initial_secs: default_gate_retry_initial_secs(),
        }
    }
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            submit_timeout_secs: default_submit_timeout_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            path: default_cache_path(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval_secs(),
            since_overlap_secs: default_since_overlap_secs(),
            query_limit: None,
            full_sync_every: default_full_sync_every(),
            live_subscription: default_true(),
        }
    }
}
