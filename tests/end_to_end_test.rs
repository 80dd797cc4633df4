use async_trait::async_trait;
use futures::future::join_all;
use lash::cache::{CacheStore, InMemoryCache};
use lash::engine::{EngineConfig, SenderEngine};
use lash::relay::{InMemoryRelay, PoolConfig, RelayNode, RelayPool};
use lash::settlement::{
    BackendError, EligibilityOracle, OracleError, PaymentBackend, SenderIdentity,
    SettlementOutcome, SkipReason,
};
use lash::sync::{ExpirationPolicy, Reconciler, ReconcilerConfig};
use lash::types::{
    unix_now, ConfirmedRecipient, EligibilityStatus, Event, EventSigner, PaymentRequest,
    PaymentResponse, SenderKey, SignerError, TipEventBuilder, TipState, UnsignedEvent,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════
// MOCK COLLABORATORS
// ═══════════════════════════════════════════════════════════════════════════

struct MockSigner;

#[async_trait]
impl EventSigner for MockSigner {
    fn pubkey(&self) -> &str {
        "alice"
    }

    async fn sign(&self, event: UnsignedEvent) -> Result<Event, SignerError> {
        Ok(event.into_signed("sig"))
    }
}

struct MockOracle {
    block: AtomicU64,
}

impl MockOracle {
    fn advance_block(&self) {
        self.block.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EligibilityOracle for MockOracle {
    async fn check(&self, _sender: &str) -> Result<EligibilityStatus, OracleError> {
        Ok(EligibilityStatus::eligible(self.block.load(Ordering::SeqCst)))
    }
}

/// Payment backend that records requests and confirms every recipient
struct MockBackend {
    calls: AtomicUsize,
    should_fail: AtomicBool,
    requests: Mutex<Vec<PaymentRequest>>,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            should_fail: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentBackend for MockBackend {
    async fn submit(&self, request: PaymentRequest) -> Result<PaymentResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;

        if self.should_fail.load(Ordering::SeqCst) {
            return Err(BackendError::InsufficientFunds {
                needed: request.recipients.iter().map(|r| r.amount).sum(),
                available: 0,
            });
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
            transaction_id: Some("tx-e2e".into()),
            confirmed_recipients,
            block_height: Some(42),
            block_time: Some(unix_now()),
            error: None,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HARNESS
// ═══════════════════════════════════════════════════════════════════════════

struct Network {
    primary: Arc<InMemoryRelay>,
    flaky: Arc<InMemoryRelay>,
    pool: Arc<RelayPool>,
    cache: Arc<InMemoryCache>,
    oracle: Arc<MockOracle>,
    backend: Arc<MockBackend>,
    engine: Arc<SenderEngine>,
}

fn network() -> Network {
    let primary = Arc::new(InMemoryRelay::new("wss://primary.test"));
    let flaky = Arc::new(InMemoryRelay::new("wss://flaky.test"));
    let pool = Arc::new(
        RelayPool::new(
            vec![
                primary.clone() as Arc<dyn RelayNode>,
                flaky.clone() as Arc<dyn RelayNode>,
            ],
            PoolConfig::default(),
        )
        .unwrap(),
    );
    let cache = Arc::new(InMemoryCache::new());
    let oracle = Arc::new(MockOracle {
        block: AtomicU64::new(42),
    });
    let backend = Arc::new(MockBackend::new());

    let engine = SenderEngine::builder()
        .with_config(EngineConfig::default())
        .with_pool(pool.clone())
        .with_cache(cache.clone())
        .with_identity(SenderIdentity {
            signer: Arc::new(MockSigner),
            sender_key: SenderKey::new("alice-key"),
            change_address: "alice-change".into(),
        })
        .with_backend(backend.clone())
        .with_oracle(oracle.clone())
        .build()
        .unwrap();

    Network {
        primary,
        flaky,
        pool,
        cache,
        oracle,
        backend,
        engine: Arc::new(engine),
    }
}

fn tip(lash_id: &str, recipient: &str, amount: u64, created_at: u64) -> Event {
    TipEventBuilder::new("alice")
        .with_sender_wallet("alice-wallet")
        .pending(
            lash_id,
            recipient,
            &format!("{recipient}-wallet"),
            amount,
            created_at,
            None,
        )
        .into_signed("sig")
}

async fn wait_out_quiet_period() {
    tokio::time::advance(Duration::from_secs(6)).await;
}

// ═══════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_three_tips_settle_in_one_payment_and_sync_back_as_paid() {
    let net = network();
    let now = unix_now();

    net.primary.insert(tip("L1", "bob", 10, now - 300));
    net.primary.insert(tip("L2", "carol", 20, now - 200));
    net.primary.insert(tip("L3", "dave", 30, now - 100));

    let report = net.engine.sync_once(now).await.unwrap();
    assert_eq!(report.upserted, 3);
    assert!(!report.stale);

    // First look starts the quiet period
    let outcome = net.engine.run_cycle(now).await;
    assert!(matches!(outcome, SettlementOutcome::Skipped(SkipReason::Unstable)));

    wait_out_quiet_period().await;
    let outcome = net.engine.run_cycle(now).await;
    let SettlementOutcome::Settled(receipt) = outcome else {
        panic!("expected settlement, got {outcome:?}");
    };

    assert_eq!(net.backend.calls(), 1);
    let requests = net.backend.requests.lock().unwrap().clone();
    assert_eq!(requests[0].recipients.len(), 3);
    assert_eq!(
        requests[0]
            .recipients
            .iter()
            .map(|r| r.amount)
            .collect::<Vec<_>>(),
        vec![10, 20, 30]
    );
    assert_eq!(receipt.total_amount, 60);
    assert_eq!(receipt.published_count(), 3);

    // Three paid transitions reached the relays
    assert_eq!(net.primary.accepted_count(), 3);
    assert_eq!(net.flaky.accepted_count(), 3);

    // A second device with an empty cache resolves every tip as paid
    let other_device = Reconciler::new(
        net.pool.clone(),
        Arc::new(InMemoryCache::new()),
        ExpirationPolicy::default(),
        ReconcilerConfig::default(),
    );
    other_device.sync_sender("alice", now + 1).await.unwrap();
    let rows = other_device
        .cache()
        .read_all_for_sender("alice")
        .await
        .unwrap();

    assert_eq!(rows.len(), 3);
    for row in rows {
        assert_eq!(row.record.state, TipState::Paid);
        assert_eq!(row.record.settlement_tx_id.as_deref(), Some("tx-e2e"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_payment_publishes_nothing_and_retries_with_new_tips() {
    let net = network();
    let now = unix_now();

    net.primary.insert(tip("L1", "bob", 10, now - 300));
    net.primary.insert(tip("L2", "carol", 20, now - 200));
    net.engine.sync_once(now).await.unwrap();
    net.backend.should_fail.store(true, Ordering::SeqCst);

    net.engine.run_cycle(now).await;
    wait_out_quiet_period().await;
    let outcome = net.engine.run_cycle(now).await;
    assert!(outcome.is_failed(), "expected failure, got {outcome:?}");

    // Pending rows untouched and no transition published
    let pending = net.cache.read_pending_for_sender("alice").await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(net.primary.accepted_count(), 0);

    // Same block stays claimed
    let outcome = net.engine.run_cycle(now).await;
    assert!(matches!(
        outcome,
        SettlementOutcome::Skipped(SkipReason::BlockClaimed(42))
    ));

    // A new tip arrives and a new block is mined
    net.backend.should_fail.store(false, Ordering::SeqCst);
    net.primary.insert(tip("L3", "dave", 30, now - 50));
    net.engine.sync_once(now).await.unwrap();
    net.oracle.advance_block();
    net.engine.refresh_gate().await;

    // The grown set needs a fresh quiet period
    let outcome = net.engine.run_cycle(now).await;
    assert!(matches!(outcome, SettlementOutcome::Skipped(SkipReason::Unstable)));

    wait_out_quiet_period().await;
    let outcome = net.engine.run_cycle(now).await;
    let SettlementOutcome::Settled(receipt) = outcome else {
        panic!("expected settlement, got {outcome:?}");
    };
    assert_eq!(receipt.lash_ids, vec!["L1", "L2", "L3"]);
    assert_eq!(receipt.block, Some(43));
    assert_eq!(net.backend.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_cycles_make_one_payment() {
    let net = network();
    let now = unix_now();

    net.primary.insert(tip("L1", "bob", 10, now - 300));
    net.engine.sync_once(now).await.unwrap();
    net.engine.run_cycle(now).await;
    wait_out_quiet_period().await;

    let outcomes = join_all((0..5).map(|_| {
        let engine = net.engine.clone();
        async move { engine.run_cycle(now).await }
    }))
    .await;

    assert_eq!(outcomes.iter().filter(|o| o.is_settled()).count(), 1);
    assert_eq!(net.backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_partial_publish_failure_self_heals() {
    let net = network();
    let now = unix_now();
    net.flaky.set_reject_publish(true);

    net.primary.insert(tip("L1", "bob", 10, now - 300));
    net.engine.sync_once(now).await.unwrap();
    net.engine.run_cycle(now).await;
    wait_out_quiet_period().await;

    let SettlementOutcome::Settled(receipt) = net.engine.run_cycle(now).await else {
        panic!("expected settlement");
    };
    assert!(receipt.publish_reports[0].is_partial_failure());
    assert_eq!(receipt.published_count(), 1);

    // The paid row is already local and a resync keeps it paid
    net.engine.sync_once(now + 1).await.unwrap();
    let rows = net.cache.read_all_for_sender("alice").await.unwrap();
    assert_eq!(rows[0].record.state, TipState::Paid);
}

#[tokio::test(start_paused = true)]
async fn test_relays_down_serve_stale_cache() {
    let net = network();
    let now = unix_now();

    net.primary.insert(tip("L1", "bob", 10, now - 300));
    net.engine.sync_once(now).await.unwrap();

    net.primary.set_offline(true);
    net.flaky.set_offline(true);

    let report = net.engine.sync_once(now + 60).await.unwrap();
    assert!(report.stale);
    assert_eq!(net.cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_tips_are_not_paid() {
    let net = network();
    let now = unix_now();
    let four_days = 4 * 24 * 60 * 60;

    net.primary.insert(tip("OLD", "bob", 10, now - four_days));
    net.engine.sync_once(now).await.unwrap();

    let totals = net
        .engine
        .reconciler()
        .pending_totals("alice", now)
        .await
        .unwrap();
    assert_eq!(totals.expired_count, 1);
    assert_eq!(totals.payable_count, 0);

    net.engine.run_cycle(now).await;
    wait_out_quiet_period().await;
    let outcome = net.engine.run_cycle(now).await;
    assert!(matches!(
        outcome,
        SettlementOutcome::Skipped(SkipReason::NothingPayable)
    ));
    assert_eq!(net.backend.calls(), 0);
}
