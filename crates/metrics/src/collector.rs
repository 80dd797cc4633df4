use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use crate::metrics::*;

/// Result label of a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    Ok,
    /// No relay answered; cached records were served
    Stale,
    Error,
}

impl SyncResult {
    fn as_str(&self) -> &'static str {
        match self {
            SyncResult::Ok => "ok",
            SyncResult::Stale => "stale",
            SyncResult::Error => "error",
        }
    }
}

/// Facade over the process-wide LASH metrics
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SYNC METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_sync(
        &self,
        scope: &str,
        result: SyncResult,
        fetched: usize,
        skipped: usize,
        duration: Duration,
    ) {
        SYNC_RUNS.with_label_values(&[scope, result.as_str()]).inc();
        SYNC_EVENTS_FETCHED.inc_by(fetched as u64);
        SYNC_EVENTS_SKIPPED.inc_by(skipped as u64);
        SYNC_DURATION.observe(duration.as_millis() as f64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RELAY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_relay_failure(&self, relay: &str, operation: &str) {
        RELAY_FAILURES.with_label_values(&[relay, operation]).inc();
    }

    pub fn record_published_event(&self, accepted: bool) {
        let result = if accepted { "accepted" } else { "rejected" };
        PUBLISHED_EVENTS.with_label_values(&[result]).inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CACHE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_cache_upserts(&self, rows: usize) {
        CACHE_UPSERTS.inc_by(rows as u64);
    }

    pub fn set_pending_totals(&self, payable_count: usize, payable_amount: u64, expired_count: usize) {
        PAYABLE_TIPS.set(payable_count as i64);
        PAYABLE_AMOUNT.set(payable_amount.min(i64::MAX as u64) as i64);
        EXPIRED_PENDING_TIPS.set(expired_count as i64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SETTLEMENT METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record one settlement evaluation (`skipped`, `settled` or `failed`)
    pub fn record_settlement_attempt(&self, outcome: &str) {
        SETTLEMENT_ATTEMPTS.with_label_values(&[outcome]).inc();
    }

    pub fn record_settlement_skip(&self, reason: &str) {
        SETTLEMENT_SKIPS.with_label_values(&[reason]).inc();
    }

    pub fn record_settlement_success(&self, recipients: usize, amount: u64, duration: Duration) {
        SETTLEMENT_RECIPIENTS.observe(recipients as f64);
        SETTLED_AMOUNT.inc_by(amount);
        SETTLEMENT_DURATION.observe(duration.as_millis() as f64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // GATE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn set_gate_status(&self, can_send: bool, current_block: Option<u64>, unknown: bool) {
        GATE_CAN_SEND.set(i64::from(can_send));
        if let Some(block) = current_block {
            GATE_CURRENT_BLOCK.set(block.min(i64::MAX as u64) as i64);
        }
        if unknown {
            GATE_UNKNOWN.inc();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Export all metrics in Prometheus text format
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
}
