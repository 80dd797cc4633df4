use lash_types::{CacheRow, TipRecord, TipState};
use std::time::Duration;

/// Default lifetime of an unpaid tip
pub const DEFAULT_EXPIRATION_WINDOW: Duration = Duration::from_secs(72 * 60 * 60);

/// Soft expiration of pending tips.
///
/// Expired records stay in the cache; they only drop out of payable sets and
/// totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    window: Duration,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRATION_WINDOW)
    }
}

impl ExpirationPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn compute_default_expiry(&self, created_at: u64) -> u64 {
        created_at.saturating_add(self.window.as_secs())
    }

    /// Explicit `expires_at` when present, else the default window
    pub fn effective_expiry(&self, record: &TipRecord) -> u64 {
        record
            .expires_at
            .unwrap_or_else(|| self.compute_default_expiry(record.created_at))
    }

    pub fn is_expired(&self, record: &TipRecord, now: u64) -> bool {
        now > self.effective_expiry(record)
    }

    /// Pending and not expired
    pub fn is_payable(&self, record: &TipRecord, now: u64) -> bool {
        record.state == TipState::Pending && !self.is_expired(record, now)
    }

    /// The payable records among `rows`, in the order given
    pub fn select_payable<I>(&self, rows: I, now: u64) -> Vec<TipRecord>
    where
        I: IntoIterator<Item = CacheRow>,
    {
        rows.into_iter()
            .map(|row| row.record)
            .filter(|record| self.is_payable(record, now))
            .collect()
    }
}
