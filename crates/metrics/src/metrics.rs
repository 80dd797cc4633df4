use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ═══════════════════════════════════════════════════════════════════════════
    // SYNC METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Reconciliation passes by scope and result (ok, stale, error)
    pub static ref SYNC_RUNS: IntCounterVec = register_int_counter_vec!(
        "lash_sync_runs_total",
        "Total reconciliation passes",
        &["scope", "result"]
    )
    .unwrap();

    pub static ref SYNC_EVENTS_FETCHED: IntCounter = register_int_counter!(
        "lash_sync_events_fetched_total",
        "Total LASH events fetched from relays"
    )
    .unwrap();

    /// Forged or malformed events dropped during reconciliation
    pub static ref SYNC_EVENTS_SKIPPED: IntCounter = register_int_counter!(
        "lash_sync_events_skipped_total",
        "Total LASH events skipped as invalid"
    )
    .unwrap();

    pub static ref SYNC_DURATION: Histogram = register_histogram!(
        "lash_sync_duration_ms",
        "Reconciliation pass duration in milliseconds",
        vec![10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // RELAY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Per-node failures by relay and operation
    pub static ref RELAY_FAILURES: IntCounterVec = register_int_counter_vec!(
        "lash_relay_failures_total",
        "Total relay node failures",
        &["relay", "operation"]
    )
    .unwrap();

    /// Published events by result (accepted, rejected)
    pub static ref PUBLISHED_EVENTS: IntCounterVec = register_int_counter_vec!(
        "lash_published_events_total",
        "Total paid transitions published",
        &["result"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // CACHE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub static ref CACHE_UPSERTS: IntCounter = register_int_counter!(
        "lash_cache_upserts_total",
        "Total cache rows inserted or replaced"
    )
    .unwrap();

    pub static ref PAYABLE_TIPS: IntGauge = register_int_gauge!(
        "lash_payable_tips",
        "Pending, non-expired tips of the sender"
    )
    .unwrap();

    pub static ref PAYABLE_AMOUNT: IntGauge = register_int_gauge!(
        "lash_payable_amount",
        "Amount owed by pending, non-expired tips"
    )
    .unwrap();

    pub static ref EXPIRED_PENDING_TIPS: IntGauge = register_int_gauge!(
        "lash_expired_pending_tips",
        "Pending tips past their expiry"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // SETTLEMENT METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Settlement evaluations by outcome (skipped, settled, failed)
    pub static ref SETTLEMENT_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "lash_settlement_attempts_total",
        "Total settlement evaluations",
        &["outcome"]
    )
    .unwrap();

    pub static ref SETTLEMENT_SKIPS: IntCounterVec = register_int_counter_vec!(
        "lash_settlement_skips_total",
        "Total skipped settlement evaluations by reason",
        &["reason"]
    )
    .unwrap();

    pub static ref SETTLEMENT_RECIPIENTS: Histogram = register_histogram!(
        "lash_settlement_recipients",
        "Recipients per settled batch",
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]
    )
    .unwrap();

    pub static ref SETTLED_AMOUNT: IntCounter = register_int_counter!(
        "lash_settled_amount_total",
        "Total amount paid out in settled batches"
    )
    .unwrap();

    pub static ref SETTLEMENT_DURATION: Histogram = register_histogram!(
        "lash_settlement_duration_ms",
        "Settlement attempt duration in milliseconds",
        vec![100.0, 500.0, 1000.0, 5000.0, 10000.0, 30000.0, 60000.0]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // GATE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// 1 when the sender may settle, 0 otherwise
    pub static ref GATE_CAN_SEND: IntGauge = register_int_gauge!(
        "lash_gate_can_send",
        "Whether the eligibility gate allows settlement"
    )
    .unwrap();

    pub static ref GATE_CURRENT_BLOCK: IntGauge = register_int_gauge!(
        "lash_gate_current_block",
        "Block height last reported by the eligibility oracle"
    )
    .unwrap();

    pub static ref GATE_UNKNOWN: IntCounter = register_int_counter!(
        "lash_gate_unknown_total",
        "Eligibility checks answered optimistically after an oracle failure"
    )
    .unwrap();
}
