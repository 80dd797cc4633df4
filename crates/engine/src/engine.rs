use lash_cache::{CacheError, CacheStore};
use lash_config::ConfigError;
use lash_metrics::{MetricsCollector, Readiness, SettlementSpan, SyncResult};
use lash_relay::{RelayError, RelayNode, RelayPool, Subscription};
use lash_resilience::ExponentialBackoff;
use lash_settlement::{
    EligibilityGate, EligibilityOracle, PaymentBackend, SenderIdentity, SettlementOrchestrator,
    SettlementOutcome, StabilityDetector,
};
use lash_sync::{Reconciler, SyncError, SyncReport, SyncScope};
use lash_types::{unix_now, EligibilityStatus, Event};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::config::EngineConfig;

/// Live events waiting to be applied. Overflow is left to the next sync.
const LIVE_EVENT_BUFFER: usize = 1024;

// ═══════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Builder error
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid relay set: {0}")]
    Relays(#[from] RelayError),
}

fn missing(field: &str) -> BuilderError {
    BuilderError::MissingField {
        field: field.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Builder for [`SenderEngine`]
pub struct SenderEngineBuilder {
    config: EngineConfig,
    pool: Option<Arc<RelayPool>>,
    relays: Vec<Arc<dyn RelayNode>>,
    cache: Option<Arc<dyn CacheStore>>,
    identity: Option<SenderIdentity>,
    backend: Option<Arc<dyn PaymentBackend>>,
    oracle: Option<Arc<dyn EligibilityOracle>>,
    metrics: MetricsCollector,
    readiness: Readiness,
}

impl SenderEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            pool: None,
            relays: Vec::new(),
            cache: None,
            identity: None,
            backend: None,
            oracle: None,
            metrics: MetricsCollector::new(),
            readiness: Readiness::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing pool, e.g. one shared by several senders
    pub fn with_pool(mut self, pool: Arc<RelayPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Build a pool from these nodes using the configured pool settings.
    /// Ignored when a pool is set.
    pub fn with_relays(mut self, relays: Vec<Arc<dyn RelayNode>>) -> Self {
        self.relays = relays;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_identity(mut self, identity: SenderIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn PaymentBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn EligibilityOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Flag to raise after the first complete sync, e.g. the one a
    /// [`lash_metrics::MetricsServer`] reports on `/ready`
    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn build(self) -> Result<SenderEngine, BuilderError> {
        let identity = self.identity.ok_or_else(|| missing("identity"))?;
        let cache = self.cache.ok_or_else(|| missing("cache"))?;
        let backend = self.backend.ok_or_else(|| missing("backend"))?;
        let oracle = self.oracle.ok_or_else(|| missing("oracle"))?;

        let pool = match self.pool {
            Some(pool) => pool,
            None if self.relays.is_empty() => return Err(missing("pool")),
            None => Arc::new(RelayPool::new(self.relays, self.config.pool.clone())?),
        };

        let config = self.config;
        let reconciler = Arc::new(Reconciler::new(
            pool.clone(),
            cache.clone(),
            config.expiration(),
            config.reconciler.clone(),
        ));
        let gate = Arc::new(EligibilityGate::new(oracle, config.gate.clone()));
        let stability = Arc::new(StabilityDetector::new(config.quiet_period));
        let orchestrator = Arc::new(SettlementOrchestrator::new(
            identity,
            cache,
            pool.clone(),
            backend,
            gate,
            stability,
            config.orchestrator.clone(),
        ));

        Ok(SenderEngine {
            sender: orchestrator.sender().to_string(),
            pool,
            reconciler,
            orchestrator,
            metrics: self.metrics,
            readiness: self.readiness,
            config,
        })
    }
}

impl Default for SenderEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// Runtime for one sender: keeps the cache in step with the relays, tracks
/// eligibility and settles payable tips when the trigger conditions hold.
pub struct SenderEngine {
    sender: String,
    pool: Arc<RelayPool>,
    reconciler: Arc<Reconciler>,
    orchestrator: Arc<SettlementOrchestrator>,
    metrics: MetricsCollector,
    readiness: Readiness,
    config: EngineConfig,
}

impl SenderEngine {
    pub fn builder() -> SenderEngineBuilder {
        SenderEngineBuilder::new()
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn orchestrator(&self) -> &Arc<SettlementOrchestrator> {
        &self.orchestrator
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Reconcile this sender's records and refresh the pending gauges
    pub async fn sync_once(&self, now: u64) -> Result<SyncReport, EngineError> {
        let started = Instant::now();
        let result = self.reconciler.sync_sender(&self.sender, now).await;

        match &result {
            Ok(report) => {
                let label = if report.stale {
                    SyncResult::Stale
                } else {
                    SyncResult::Ok
                };
                self.metrics.record_sync(
                    "sender",
                    label,
                    report.fetched,
                    report.skipped,
                    started.elapsed(),
                );
                self.metrics.record_cache_upserts(report.upserted);
                if !report.stale {
                    self.readiness.mark_ready();
                }
            }
            Err(_) => {
                self.metrics
                    .record_sync("sender", SyncResult::Error, 0, 0, started.elapsed());
            }
        }

        let report = result?;
        let totals = self.reconciler.pending_totals(&self.sender, now).await?;
        self.metrics.set_pending_totals(
            totals.payable_count,
            totals.payable_amount,
            totals.expired_count,
        );
        Ok(report)
    }

    /// Poll the eligibility oracle once
    pub async fn refresh_gate(&self) -> EligibilityStatus {
        let status = self
            .orchestrator
            .gate()
            .check_eligibility(&self.sender)
            .await;
        self.metrics
            .set_gate_status(status.can_send, status.current_block, status.is_unknown());
        status
    }

    /// One stability and settlement evaluation
    pub async fn run_cycle(&self, now: u64) -> SettlementOutcome {
        let started = Instant::now();
        let outcome = self.orchestrator.try_settle(now).await;

        self.metrics.record_settlement_attempt(outcome.label());
        match &outcome {
            SettlementOutcome::Skipped(reason) => {
                self.metrics.record_settlement_skip(reason.label());
            }
            SettlementOutcome::Settled(receipt) => {
                self.metrics.record_settlement_success(
                    receipt.lash_ids.len(),
                    receipt.total_amount,
                    started.elapsed(),
                );
                for report in &receipt.publish_reports {
                    self.metrics.record_published_event(report.is_success());
                    for failure in report.failures() {
                        self.metrics.record_relay_failure(&failure.relay, "publish");
                    }
                }
            }
            SettlementOutcome::Failed { .. } => {}
        }

        outcome
    }

    /// Spawn the engine's timers. Settlement attempts run on detached tasks
    /// and outlive [`EngineHandle::shutdown`].
    pub async fn start(self) -> EngineHandle {
        let engine = Arc::new(self);
        let mut tasks = Vec::new();

        info!(sender = %engine.sender, "Starting sender engine");

        tasks.push(tokio::spawn(reconcile_loop(engine.clone())));
        tasks.push(tokio::spawn(gate_loop(engine.clone())));
        tasks.push(tokio::spawn(tick_loop(engine.clone())));

        let subscription = if engine.config.live_subscription {
            match engine.subscribe_live().await {
                Ok((subscription, task)) => {
                    tasks.push(task);
                    Some(subscription)
                }
                Err(e) => {
                    warn!(
                        sender = %engine.sender,
                        error = %e,
                        "Live subscription unavailable, relying on periodic sync"
                    );
                    None
                }
            }
        } else {
            None
        };

        EngineHandle {
            engine,
            tasks,
            subscription,
        }
    }

    async fn subscribe_live(
        self: &Arc<Self>,
    ) -> Result<(Subscription, JoinHandle<()>), EngineError> {
        let (tx, mut rx) = mpsc::channel::<Event>(LIVE_EVENT_BUFFER);
        let filter = SyncScope::Sender(self.sender.clone()).filter();
        let sender = self.sender.clone();
        let overflow_sender = self.sender.clone();

        let subscription = self
            .pool
            .subscribe(
                &filter,
                move |event| {
                    if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
                        debug!(sender = %overflow_sender, event_id = %event.id, "Live event buffer full, dropping event");
                    }
                },
                move || debug!(sender = %sender, "Live subscription caught up"),
            )
            .await?;

        let engine = self.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match engine.reconciler.apply_event(&event, unix_now()).await {
                    Ok(true) => {
                        debug!(sender = %engine.sender, event_id = %event.id, "Live event applied");
                        engine.metrics.record_cache_upserts(1);
                    }
                    Ok(false) => {}
                    Err(e) => warn!(
                        sender = %engine.sender,
                        event_id = %event.id,
                        error = %e,
                        "Could not apply live event"
                    ),
                }
            }
        });

        Ok((subscription, task))
    }
}

async fn reconcile_loop(engine: Arc<SenderEngine>) {
    let interval = engine.config.sync_interval;
    let mut backoff = ExponentialBackoff::new(engine.config.gate.retry_initial, interval);

    loop {
        let delay = match engine.sync_once(unix_now()).await {
            Ok(report) if !report.stale => {
                backoff.reset();
                interval
            }
            Ok(_) => backoff.next_delay(),
            Err(e) => {
                warn!(sender = %engine.sender, error = %e, "Sync failed");
                backoff.next_delay()
            }
        };
        tokio::time::sleep(delay).await;
    }
}

async fn gate_loop(engine: Arc<SenderEngine>) {
    loop {
        engine.refresh_gate().await;
        let delay = engine.orchestrator.gate().next_poll_delay();
        tokio::time::sleep(delay).await;
    }
}

async fn tick_loop(engine: Arc<SenderEngine>) {
    let mut interval = tokio::time::interval(engine.config.tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        if engine.orchestrator.is_in_flight() {
            continue;
        }

        let span = SettlementSpan::new(engine.sender.clone()).span();
        let attempt = engine.clone();
        tokio::spawn(
            async move {
                attempt.run_cycle(unix_now()).await;
            }
            .instrument(span),
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HANDLE
// ═══════════════════════════════════════════════════════════════════════════

/// Running engine. Dropping the handle leaves the timers running; call
/// [`shutdown`](Self::shutdown) to stop them.
pub struct EngineHandle {
    engine: Arc<SenderEngine>,
    tasks: Vec<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

impl EngineHandle {
    pub fn engine(&self) -> &Arc<SenderEngine> {
        &self.engine
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .as_ref()
            .map(Subscription::is_active)
            .unwrap_or(false)
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }

    /// Stop timers and the live subscription. An in-flight settlement is not
    /// interrupted.
    pub async fn shutdown(mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!(sender = %self.engine.sender, "Sender engine stopped");
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
