use futures::future::join_all;
use lash_cache::CacheStore;
use lash_relay::{PublishReport, RelayPool};
use lash_sync::ExpirationPolicy;
use lash_types::{
    CacheRow, EventSigner, PaidTransition, PaymentResponse, SenderKey, SettlementBatch,
    TipEventBuilder, TipRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::PaymentBackend;
use crate::error::{Result, SettlementError};
use crate::gate::{EligibilityGate, GateReading};
use crate::stability::StabilityDetector;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Recipients per payment; the oldest tips go first
    pub max_batch_size: usize,

    /// Bound on one payment backend call
    pub submit_timeout: Duration,

    pub expiration: ExpirationPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            submit_timeout: Duration::from_secs(60),
            expiration: ExpirationPolicy::default(),
        }
    }
}

/// Who pays: the signer publishing transitions, the opaque key handle passed
/// to the backend and the wallet receiving change.
#[derive(Clone)]
pub struct SenderIdentity {
    pub signer: Arc<dyn EventSigner>,
    pub sender_key: SenderKey,
    pub change_address: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE & OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Ready,
    Sending,
    Publishing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    NothingPayable,
    Unstable,
    NotEligible {
        last_block: Option<u64>,
        current_block: Option<u64>,
    },
    BlockClaimed(u64),
    /// The block is unknown and the gate has not refreshed since the last
    /// attempt
    AwaitingRefresh,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::InFlight => "in_flight",
            SkipReason::NothingPayable => "nothing_payable",
            SkipReason::Unstable => "unstable",
            SkipReason::NotEligible { .. } => "not_eligible",
            SkipReason::BlockClaimed(_) => "block_claimed",
            SkipReason::AwaitingRefresh => "awaiting_refresh",
        }
    }
}

#[derive(Debug)]
pub struct SettlementReceipt {
    pub tx_id: String,
    pub block: Option<u64>,
    pub lash_ids: Vec<String>,
    pub total_amount: u64,
    /// One report per published paid transition
    pub publish_reports: Vec<PublishReport>,
}

impl SettlementReceipt {
    /// Transitions accepted by at least one relay
    pub fn published_count(&self) -> usize {
        self.publish_reports.iter().filter(|r| r.is_success()).count()
    }
}

#[derive(Debug)]
pub enum SettlementOutcome {
    Skipped(SkipReason),
    Settled(SettlementReceipt),
    Failed {
        block: Option<u64>,
        error: SettlementError,
    },
}

impl SettlementOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, SettlementOutcome::Settled(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SettlementOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::Skipped(_) => "skipped",
            SettlementOutcome::Settled(_) => "settled",
            SettlementOutcome::Failed { .. } => "failed",
        }
    }
}

/// What the last attempt was made against: a known block height, or the gate
/// refresh it followed when the oracle could not name a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Block(u64),
    Refresh(u64),
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════

/// Decides when a sender's payable tips are paid and republishes the paid
/// transitions.
///
/// At most one attempt runs at a time, and at most one attempt is made per
/// block height: the block is claimed before the payment call is issued.
/// Attempts are triggered by the gate's polled status and confirmed with a
/// fresh oracle call; when the block is unknown, at most one attempt is made
/// per gate refresh.
pub struct SettlementOrchestrator {
    sender: String,
    identity: SenderIdentity,
    cache: Arc<dyn CacheStore>,
    pool: Arc<RelayPool>,
    backend: Arc<dyn PaymentBackend>,
    gate: Arc<EligibilityGate>,
    stability: Arc<StabilityDetector>,
    config: OrchestratorConfig,
    in_flight: AtomicBool,
    claimed: Mutex<Option<Claim>>,
    state: Mutex<OrchestratorState>,
}

impl SettlementOrchestrator {
    pub fn new(
        identity: SenderIdentity,
        cache: Arc<dyn CacheStore>,
        pool: Arc<RelayPool>,
        backend: Arc<dyn PaymentBackend>,
        gate: Arc<EligibilityGate>,
        stability: Arc<StabilityDetector>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            sender: identity.signer.pubkey().to_string(),
            identity,
            cache,
            pool,
            backend,
            gate,
            stability,
            config,
            in_flight: AtomicBool::new(false),
            claimed: Mutex::new(None),
            state: Mutex::new(OrchestratorState::Idle),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.lock().unwrap()
    }

    pub fn claimed_block(&self) -> Option<u64> {
        match *self.claimed.lock().unwrap() {
            Some(Claim::Block(height)) => Some(height),
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn gate(&self) -> &Arc<EligibilityGate> {
        &self.gate
    }

    pub fn stability(&self) -> &Arc<StabilityDetector> {
        &self.stability
    }

    fn set_state(&self, state: OrchestratorState) {
        *self.state.lock().unwrap() = state;
    }

    /// Pending, non-expired records for this sender, oldest first
    pub async fn payable(&self, now: u64) -> Result<Vec<TipRecord>> {
        let rows = self.cache.read_pending_for_sender(&self.sender).await?;
        Ok(self.config.expiration.select_payable(rows, now))
    }

    /// Evaluate the trigger and, when every condition holds, pay all payable
    /// tips in one backend call. Failures are reported in the outcome and
    /// retried on the next eligible cycle.
    pub async fn try_settle(&self, now: u64) -> SettlementOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!(sender = %self.sender, "Settlement already in flight");
            return SettlementOutcome::Skipped(SkipReason::InFlight);
        };

        let outcome = self.attempt(now).await;
        self.set_state(OrchestratorState::Idle);
        outcome
    }

    async fn attempt(&self, now: u64) -> SettlementOutcome {
        let mut payable = match self.payable(now).await {
            Ok(records) => records,
            Err(error) => return self.failed(None, error),
        };

        self.stability
            .observe(payable.iter().map(|r| r.lash_id.clone()));
        if payable.is_empty() {
            return SettlementOutcome::Skipped(SkipReason::NothingPayable);
        }
        if !self.stability.is_stable() {
            return SettlementOutcome::Skipped(SkipReason::Unstable);
        }

        // The polled status triggers; a fresh oracle call confirms
        let reading = match self.gate.latest_reading() {
            Some(polled) => {
                if let Some(reason) = self.blocked_by(&polled) {
                    return SettlementOutcome::Skipped(reason);
                }
                self.gate.refresh(&self.sender).await
            }
            None => self.gate.refresh(&self.sender).await,
        };
        if let Some(reason) = self.blocked_by(&reading) {
            return SettlementOutcome::Skipped(reason);
        }

        let block = reading.status.current_block;
        *self.claimed.lock().unwrap() = Some(match block {
            Some(height) => Claim::Block(height),
            None => Claim::Refresh(reading.seq),
        });
        self.set_state(OrchestratorState::Ready);

        payable.truncate(self.config.max_batch_size.max(1));
        let batch = match SettlementBatch::new(
            self.sender.clone(),
            &payable,
            self.identity.sender_key.clone(),
            self.identity.change_address.clone(),
        ) {
            Ok(batch) => batch,
            Err(error) => return self.failed(block, error.into()),
        };

        let lash_ids: Vec<String> = batch.lash_ids().map(str::to_string).collect();
        let total_amount = batch.total_amount();

        info!(
            sender = %self.sender,
            block = ?block,
            recipients = batch.len(),
            total_amount,
            "Submitting settlement batch"
        );
        self.set_state(OrchestratorState::Sending);

        let (response, tx_id) = match self.submit(batch).await {
            Ok(sent) => sent,
            Err(error) => return self.failed(block, error),
        };

        info!(sender = %self.sender, tx_id = %tx_id, "Settlement confirmed by backend");
        self.set_state(OrchestratorState::Publishing);

        let publish_reports = self.publish_paid(&payable, &response, &tx_id, now).await;

        SettlementOutcome::Settled(SettlementReceipt {
            tx_id,
            block,
            lash_ids,
            total_amount,
            publish_reports,
        })
    }

    async fn submit(&self, batch: SettlementBatch) -> Result<(PaymentResponse, String)> {
        let response = tokio::time::timeout(
            self.config.submit_timeout,
            self.backend.submit(batch.into_request()),
        )
        .await
        .map_err(|_| SettlementError::SubmitTimeout(self.config.submit_timeout))??;

        if !response.success {
            return Err(SettlementError::Rejected(
                response
                    .error
                    .clone()
                    .unwrap_or_else(|| "no reason given".to_string()),
            ));
        }

        let tx_id = response
            .transaction_id
            .clone()
            .ok_or(SettlementError::MissingTransactionId)?;
        Ok((response, tx_id))
    }

    /// Build, sign, record locally and publish one paid transition per
    /// confirmed recipient. Nothing here changes the settlement outcome.
    async fn publish_paid(
        &self,
        batch: &[TipRecord],
        response: &PaymentResponse,
        tx_id: &str,
        now: u64,
    ) -> Vec<PublishReport> {
        let by_lash: HashMap<&str, &TipRecord> =
            batch.iter().map(|r| (r.lash_id.as_str(), r)).collect();

        // Backends that do not itemise outputs pay recipients in batch order
        let confirmed: Vec<(&TipRecord, u32)> = if response.confirmed_recipients.is_empty() {
            warn!(sender = %self.sender, tx_id, "Backend returned no recipients, assuming the whole batch");
            batch.iter().zip(0u32..).collect()
        } else {
            response
                .confirmed_recipients
                .iter()
                .filter_map(|c| match by_lash.get(c.lash_id.as_str()) {
                    Some(record) => Some((*record, c.output_index)),
                    None => {
                        warn!(sender = %self.sender, lash_id = %c.lash_id, "Backend confirmed a tip outside the batch");
                        None
                    }
                })
                .collect()
        };

        let builder = TipEventBuilder::new(self.sender.clone())
            .with_sender_wallet(self.identity.change_address.clone());

        let mut rows = Vec::with_capacity(confirmed.len());
        let mut signed = Vec::with_capacity(confirmed.len());
        for (record, output_index) in confirmed {
            let transition = PaidTransition {
                tx_id: tx_id.to_string(),
                output_index,
                block_height: response.block_height,
                block_time: response.block_time,
            };
            let unsigned = builder.paid(record, &transition, now);

            let event = match self.identity.signer.sign(unsigned.clone()).await {
                Ok(event) => {
                    signed.push(event.clone());
                    event
                }
                Err(e) => {
                    // Still recorded locally so the tip is not paid twice
                    warn!(sender = %self.sender, lash_id = %record.lash_id, error = %e, "Could not sign paid transition");
                    unsigned.into_signed(String::new())
                }
            };

            match CacheRow::from_event(&event, now) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!(lash_id = %record.lash_id, error = %e, "Paid transition does not project to a tip record")
                }
            }
        }

        if let Err(e) = self.cache.upsert_many(&rows).await {
            warn!(sender = %self.sender, tx_id, error = %e, "Could not record paid tips locally");
        }

        let reports = join_all(signed.iter().map(|event| self.pool.publish(event))).await;
        for report in &reports {
            if !report.is_success() {
                warn!(
                    sender = %self.sender,
                    event_id = %report.event_id,
                    "Paid transition not accepted by any relay, next sync will retry"
                );
            } else if report.is_partial_failure() {
                for failure in report.failures() {
                    warn!(
                        event_id = %report.event_id,
                        relay = %failure.relay,
                        "Paid transition rejected by relay"
                    );
                }
            }
        }

        reports
    }

    fn blocked_by(&self, reading: &GateReading) -> Option<SkipReason> {
        let status = &reading.status;
        if !status.can_send {
            return Some(SkipReason::NotEligible {
                last_block: status.last_block,
                current_block: status.current_block,
            });
        }

        match (status.current_block, *self.claimed.lock().unwrap()) {
            (Some(height), Some(Claim::Block(claimed))) if height == claimed => {
                Some(SkipReason::BlockClaimed(height))
            }
            (None, Some(Claim::Refresh(seq))) if reading.seq <= seq => {
                Some(SkipReason::AwaitingRefresh)
            }
            _ => None,
        }
    }

    fn failed(&self, block: Option<u64>, error: SettlementError) -> SettlementOutcome {
        warn!(
            sender = %self.sender,
            block = ?block,
            error = %error,
            "Settlement failed, will retry on the next eligible cycle"
        );
        SettlementOutcome::Failed { block, error }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, EligibilityOracle, OracleError};
    use crate::gate::GateConfig;
    use async_trait::async_trait;
    use lash_cache::InMemoryCache;
    use lash_relay::{InMemoryRelay, PoolConfig, RelayNode};
    use lash_types::{
        ConfirmedRecipient, EligibilityStatus, Event, PaymentRequest, SignerError, TipState,
        UnsignedEvent,
    };
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    const NOW: u64 = 1_700_000_000;

    struct MockSigner;

    #[async_trait]
    impl EventSigner for MockSigner {
        fn pubkey(&self) -> &str {
            "alice"
        }

        async fn sign(&self, event: UnsignedEvent) -> std::result::Result<Event, SignerError> {
            Ok(event.into_signed("sig"))
        }
    }

    struct MockOracle {
        calls: AtomicUsize,
        block: AtomicU64,
        can_send: AtomicBool,
        down: AtomicBool,
    }

    #[async_trait]
    impl EligibilityOracle for MockOracle {
        async fn check(&self, _sender: &str) -> std::result::Result<EligibilityStatus, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(OracleError::Unavailable("connection refused".into()));
            }
            let block = self.block.load(Ordering::SeqCst);
            if self.can_send.load(Ordering::SeqCst) {
                Ok(EligibilityStatus::eligible(block))
            } else {
                Ok(EligibilityStatus::blocked(block - 1, block))
            }
        }
    }

    struct MockBackend {
        calls: AtomicUsize,
        should_fail: AtomicBool,
        latency: Duration,
        requests: Mutex<Vec<PaymentRequest>>,
    }

    #[async_trait]
    impl PaymentBackend for MockBackend {
        async fn submit(
            &self,
            request: PaymentRequest,
        ) -> std::result::Result<PaymentResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(BackendError::BroadcastFailed("mempool rejected".into()));
            }

            let confirmed_recipients = request
                .recipients
                .iter()
                .zip(0u32..)
                .map(|(r, vout)| ConfirmedRecipient {
                    address: r.address.clone(),
                    amount: r.amount,
                    recipient_pubkey: r.recipient_pubkey.clone(),
                    source_event_id: r.source_event_id.clone(),
                    lash_id: r.lash_id.clone(),
                    output_index: vout,
                })
                .collect();
            self.requests.lock().unwrap().push(request);

            Ok(PaymentResponse {
                success: true,
                transaction_id: Some("tx-abc".into()),
                confirmed_recipients,
                block_height: Some(42),
                block_time: Some(NOW),
                error: None,
            })
        }
    }

    struct Harness {
        relay: Arc<InMemoryRelay>,
        cache: Arc<InMemoryCache>,
        oracle: Arc<MockOracle>,
        backend: Arc<MockBackend>,
        orchestrator: Arc<SettlementOrchestrator>,
    }

    fn harness(latency: Duration, config: OrchestratorConfig) -> Harness {
        let relay = Arc::new(InMemoryRelay::new("wss://relay.test"));
        let pool = Arc::new(
            RelayPool::new(vec![relay.clone() as Arc<dyn RelayNode>], PoolConfig::default())
                .unwrap(),
        );
        let cache = Arc::new(InMemoryCache::new());
        let oracle = Arc::new(MockOracle {
            calls: AtomicUsize::new(0),
            block: AtomicU64::new(42),
            can_send: AtomicBool::new(true),
            down: AtomicBool::new(false),
        });
        let backend = Arc::new(MockBackend {
            calls: AtomicUsize::new(0),
            should_fail: AtomicBool::new(false),
            latency,
            requests: Mutex::new(Vec::new()),
        });
        let identity = SenderIdentity {
            signer: Arc::new(MockSigner),
            sender_key: SenderKey::new("alice-key"),
            change_address: "alice-wallet".into(),
        };
        let orchestrator = Arc::new(SettlementOrchestrator::new(
            identity,
            cache.clone(),
            pool,
            backend.clone(),
            Arc::new(EligibilityGate::new(oracle.clone(), GateConfig::default())),
            Arc::new(StabilityDetector::default()),
            config,
        ));
        Harness {
            relay,
            cache,
            oracle,
            backend,
            orchestrator,
        }
    }

    async fn seed(cache: &InMemoryCache, tips: &[(&str, &str, u64)]) {
        let builder = TipEventBuilder::new("alice").with_sender_wallet("alice-wallet");
        let rows: Vec<CacheRow> = tips
            .iter()
            .enumerate()
            .map(|(i, (lash_id, wallet, amount))| {
                let event = builder
                    .pending(lash_id, &format!("pk-{wallet}"), wallet, *amount, NOW - 100 + i as u64, None)
                    .into_signed("sig");
                CacheRow::from_event(&event, NOW).unwrap()
            })
            .collect();
        cache.upsert_many(&rows).await.unwrap();
    }

    async fn settle_when_stable(orchestrator: &SettlementOrchestrator) -> SettlementOutcome {
        let first = orchestrator.try_settle(NOW).await;
        assert!(matches!(first, SettlementOutcome::Skipped(SkipReason::Unstable)));
        tokio::time::advance(Duration::from_secs(6)).await;
        orchestrator.try_settle(NOW).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_stable_batch_and_publishes_transitions() {
        let h = harness(Duration::ZERO, OrchestratorConfig::default());
        seed(&h.cache, &[("L1", "w1", 10), ("L2", "w2", 20), ("L3", "w3", 30)]).await;

        let outcome = settle_when_stable(&h.orchestrator).await;
        let SettlementOutcome::Settled(receipt) = outcome else {
            panic!("expected settlement, got {outcome:?}");
        };

        assert_eq!(receipt.tx_id, "tx-abc");
        assert_eq!(receipt.total_amount, 60);
        assert_eq!(receipt.lash_ids, vec!["L1", "L2", "L3"]);
        assert_eq!(receipt.published_count(), 3);
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.backend.requests.lock().unwrap()[0].recipients.len(), 3);
        assert_eq!(h.relay.accepted_count(), 3);

        // Recorded locally before any relay round trip
        for row in h.cache.snapshot() {
            assert_eq!(row.record.state, TipState::Paid);
            assert_eq!(row.record.settlement_tx_id.as_deref(), Some("tx-abc"));
        }
        assert_eq!(h.orchestrator.state(), OrchestratorState::Idle);
        assert!(!h.orchestrator.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_attempt_per_block() {
        let h = harness(Duration::ZERO, OrchestratorConfig::default());
        h.backend.should_fail.store(true, Ordering::SeqCst);
        seed(&h.cache, &[("L1", "w1", 10)]).await;

        let outcome = settle_when_stable(&h.orchestrator).await;
        assert!(outcome.is_failed());
        assert_eq!(h.orchestrator.claimed_block(), Some(42));

        let again = h.orchestrator.try_settle(NOW).await;
        assert!(matches!(again, SettlementOutcome::Skipped(SkipReason::BlockClaimed(42))));
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);

        // A new block is only seen once the gate polls again
        h.oracle.block.store(43, Ordering::SeqCst);
        let again = h.orchestrator.try_settle(NOW).await;
        assert!(matches!(again, SettlementOutcome::Skipped(SkipReason::BlockClaimed(42))));

        h.orchestrator.gate().check_eligibility("alice").await;
        h.orchestrator.try_settle(NOW).await;
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.orchestrator.claimed_block(), Some(43));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_gate_is_not_polled_by_ticks() {
        let h = harness(Duration::ZERO, OrchestratorConfig::default());
        h.oracle.can_send.store(false, Ordering::SeqCst);
        seed(&h.cache, &[("L1", "w1", 10)]).await;

        let outcome = settle_when_stable(&h.orchestrator).await;
        assert_eq!(outcome.label(), "skipped");
        assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 1);

        for _ in 0..60 {
            tokio::time::advance(Duration::from_secs(1)).await;
            let outcome = h.orchestrator.try_settle(NOW).await;
            assert!(matches!(
                outcome,
                SettlementOutcome::Skipped(SkipReason::NotEligible { .. })
            ));
        }
        assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_block_allows_one_attempt_per_refresh() {
        let h = harness(Duration::ZERO, OrchestratorConfig::default());
        h.oracle.down.store(true, Ordering::SeqCst);
        h.backend.should_fail.store(true, Ordering::SeqCst);
        seed(&h.cache, &[("L1", "w1", 10)]).await;

        let outcome = settle_when_stable(&h.orchestrator).await;
        assert!(matches!(outcome, SettlementOutcome::Failed { block: None, .. }));
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);

        for _ in 0..60 {
            tokio::time::advance(Duration::from_secs(1)).await;
            let outcome = h.orchestrator.try_settle(NOW).await;
            assert!(matches!(
                outcome,
                SettlementOutcome::Skipped(SkipReason::AwaitingRefresh)
            ));
        }
        assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);

        // The next scheduled poll opens one more attempt
        h.orchestrator.gate().check_eligibility("alice").await;
        assert!(h.orchestrator.try_settle(NOW).await.is_failed());
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_publishes_nothing_and_keeps_pending() {
        let h = harness(Duration::ZERO, OrchestratorConfig::default());
        h.backend.should_fail.store(true, Ordering::SeqCst);
        seed(&h.cache, &[("L1", "w1", 10), ("L2", "w2", 20)]).await;

        let outcome = settle_when_stable(&h.orchestrator).await;
        assert!(matches!(
            outcome,
            SettlementOutcome::Failed {
                block: Some(42),
                error: SettlementError::Backend(_)
            }
        ));
        assert!(h.relay.is_empty());
        assert_eq!(h.orchestrator.payable(NOW).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_are_single_flight() {
        let h = harness(Duration::from_secs(2), OrchestratorConfig::default());
        seed(&h.cache, &[("L1", "w1", 10)]).await;
        h.orchestrator.try_settle(NOW).await;
        tokio::time::advance(Duration::from_secs(6)).await;

        let (a, b) = tokio::join!(h.orchestrator.try_settle(NOW), h.orchestrator.try_settle(NOW));
        let skipped = [&a, &b]
            .iter()
            .filter(|o| matches!(o, SettlementOutcome::Skipped(SkipReason::InFlight)))
            .count();

        assert_eq!(skipped, 1);
        assert!(a.is_settled() || b.is_settled());
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ineligible_sender_is_skipped() {
        let h = harness(Duration::ZERO, OrchestratorConfig::default());
        h.oracle.can_send.store(false, Ordering::SeqCst);
        seed(&h.cache, &[("L1", "w1", 10)]).await;

        let outcome = settle_when_stable(&h.orchestrator).await;
        assert!(matches!(
            outcome,
            SettlementOutcome::Skipped(SkipReason::NotEligible {
                current_block: Some(42),
                ..
            })
        ));
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.orchestrator.claimed_block(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_is_capped_oldest_first() {
        let config = OrchestratorConfig {
            max_batch_size: 2,
            ..Default::default()
        };
        let h = harness(Duration::ZERO, config);
        seed(&h.cache, &[("L1", "w1", 10), ("L2", "w2", 20), ("L3", "w3", 30)]).await;

        let SettlementOutcome::Settled(receipt) = settle_when_stable(&h.orchestrator).await else {
            panic!("expected settlement");
        };
        assert_eq!(receipt.lash_ids, vec!["L1", "L2"]);
        assert_eq!(h.orchestrator.payable(NOW).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out() {
        let config = OrchestratorConfig {
            submit_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let h = harness(Duration::from_secs(30), config);
        seed(&h.cache, &[("L1", "w1", 10)]).await;

        let outcome = settle_when_stable(&h.orchestrator).await;
        assert!(matches!(
            outcome,
            SettlementOutcome::Failed {
                error: SettlementError::SubmitTimeout(_),
                ..
            }
        ));
        assert!(h.relay.is_empty());
    }
}
