use lash_cache::{CacheError, CacheStore};
use lash_relay::{RelayError, RelayPool};
use lash_types::{CacheRow, Event, Filter, LASH_KIND, TAG_RECIPIENT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::expiration::ExpirationPolicy;
use crate::resolver::resolve_by_lash;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Per-sync relay query timeout
    pub query_timeout: Duration,
    /// Incremental syncs re-read this much history before the last sync
    pub since_overlap: Duration,
    /// Upper bound on events requested per sync
    pub query_limit: Option<usize>,
    /// Incremental syncs between two full resyncs. Full passes pick up
    /// events that reached a relay after the cursor moved past them.
    pub full_sync_every: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(10),
            since_overlap: Duration::from_secs(300),
            query_limit: None,
            full_sync_every: 10,
        }
    }
}

/// Whose records a sync covers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SyncScope {
    Sender(String),
    Recipient(String),
}

impl SyncScope {
    /// Relay filter selecting every LASH event in this scope
    pub fn filter(&self) -> Filter {
        let filter = Filter::new().kind(LASH_KIND);
        match self {
            SyncScope::Sender(sender) => filter.author(sender.clone()),
            SyncScope::Recipient(recipient) => filter.tag(TAG_RECIPIENT, recipient.clone()),
        }
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: usize,
    pub resolved: usize,
    pub upserted: usize,
    /// Canonical events that could not be projected into a tip record
    pub skipped: usize,
    /// No relay answered; the cache was left as it was
    pub stale: bool,
    /// The query covered the whole history of the scope
    pub full: bool,
    pub since: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    last_sync: u64,
    incremental_passes: u32,
    /// Set by a stale pass, cleared by the next full one
    resync: bool,
}

/// Payable vs expired amounts for one sender
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTotals {
    pub payable_amount: u64,
    pub payable_count: usize,
    pub expired_amount: u64,
    pub expired_count: usize,
}

/// Pulls LASH events from the relay pool, resolves them and merges the
/// result into the local cache.
pub struct Reconciler {
    pool: Arc<RelayPool>,
    cache: Arc<dyn CacheStore>,
    policy: ExpirationPolicy,
    config: ReconcilerConfig,
    cursors: Mutex<HashMap<SyncScope, Cursor>>,
}

impl Reconciler {
    pub fn new(
        pool: Arc<RelayPool>,
        cache: Arc<dyn CacheStore>,
        policy: ExpirationPolicy,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            policy,
            config,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &ExpirationPolicy {
        &self.policy
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn last_sync(&self, scope: &SyncScope) -> Option<u64> {
        self.cursors
            .lock()
            .unwrap()
            .get(scope)
            .map(|cursor| cursor.last_sync)
    }

    pub async fn sync_sender(&self, sender: &str, now: u64) -> Result<SyncReport> {
        self.sync(SyncScope::Sender(sender.to_string()), now).await
    }

    pub async fn sync_recipient(&self, recipient: &str, now: u64) -> Result<SyncReport> {
        self.sync(SyncScope::Recipient(recipient.to_string()), now).await
    }

    /// `since` for the next pass of `scope`, or `None` for a full pass
    fn next_since(&self, scope: &SyncScope) -> Option<u64> {
        let cursors = self.cursors.lock().unwrap();
        let cursor = cursors.get(scope)?;
        if cursor.resync || cursor.incremental_passes >= self.config.full_sync_every {
            return None;
        }
        Some(
            cursor
                .last_sync
                .saturating_sub(self.config.since_overlap.as_secs()),
        )
    }

    /// One reconciliation pass. Relay unavailability degrades to a stale
    /// report; only cache failures are errors.
    ///
    /// Passes are incremental once a scope has synced, except every
    /// `full_sync_every`-th pass and the first pass after a stale one.
    pub async fn sync(&self, scope: SyncScope, now: u64) -> Result<SyncReport> {
        let since = self.next_since(&scope);

        let mut filter = scope.filter();
        if let Some(since) = since {
            filter = filter.since(since);
        }
        if let Some(limit) = self.config.query_limit {
            filter = filter.limit(limit);
        }

        let events = match self
            .pool
            .query_with_timeout(&filter, self.config.query_timeout)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                match e {
                    RelayError::SourceUnavailable { attempted } => {
                        warn!(?scope, attempted, "No relay reachable, serving cached records");
                    }
                    RelayError::NoNodes => {
                        warn!(?scope, "Relay pool is empty, serving cached records");
                    }
                }
                if let Some(cursor) = self.cursors.lock().unwrap().get_mut(&scope) {
                    cursor.resync = true;
                }
                return Ok(SyncReport {
                    stale: true,
                    since,
                    ..Default::default()
                });
            }
        };

        let mut report = self.apply_events(&events, now).await?;
        report.since = since;
        report.full = since.is_none();

        let mut cursors = self.cursors.lock().unwrap();
        let incremental_passes = match (report.full, cursors.get(&scope)) {
            (false, Some(cursor)) => cursor.incremental_passes + 1,
            _ => 0,
        };
        cursors.insert(
            scope.clone(),
            Cursor {
                last_sync: now,
                incremental_passes,
                resync: false,
            },
        );
        drop(cursors);

        info!(
            ?scope,
            full = report.full,
            fetched = report.fetched,
            upserted = report.upserted,
            skipped = report.skipped,
            "Sync complete"
        );
        Ok(report)
    }

    /// Resolve a batch of events and merge the canonical ones into the cache
    pub async fn apply_events(&self, events: &[Event], now: u64) -> Result<SyncReport> {
        let mut report = SyncReport {
            fetched: events.len(),
            ..Default::default()
        };

        let valid: Vec<Event> = events
            .iter()
            .filter(|e| {
                let ok = e.has_valid_id();
                if !ok {
                    debug!(event_id = %e.id, "Dropping event with mismatched id");
                }
                ok
            })
            .cloned()
            .collect();
        report.skipped = events.len() - valid.len();

        let canonical = resolve_by_lash(&valid);
        report.resolved = canonical.len();

        let mut rows = Vec::with_capacity(canonical.len());
        for (lash_id, event) in canonical {
            match CacheRow::from_event(&event, now) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!(%lash_id, event_id = %event.id, error = %e, "Skipping malformed tip event");
                    report.skipped += 1;
                }
            }
        }

        report.upserted = self.cache.upsert_many(&rows).await?;
        Ok(report)
    }

    /// Merge a single live event. Returns whether the cache changed.
    pub async fn apply_event(&self, event: &Event, now: u64) -> Result<bool> {
        let report = self.apply_events(std::slice::from_ref(event), now).await?;
        Ok(report.upserted > 0)
    }

    pub async fn pending_totals(&self, sender: &str, now: u64) -> Result<PendingTotals> {
        let rows = self.cache.read_pending_for_sender(sender).await?;
        let mut totals = PendingTotals::default();

        for row in rows {
            if self.policy.is_expired(&row.record, now) {
                totals.expired_amount += row.record.amount;
                totals.expired_count += 1;
            } else {
                totals.payable_amount += row.record.amount;
                totals.payable_count += 1;
            }
        }

        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lash_cache::InMemoryCache;
    use lash_relay::{InMemoryRelay, PoolConfig, RelayNode};
    use lash_types::{PaidTransition, TipEventBuilder, TipRecord, TipState, UnsignedEvent};

    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        relay: Arc<InMemoryRelay>,
        cache: Arc<InMemoryCache>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let relay = Arc::new(InMemoryRelay::new("wss://relay.test"));
        let pool = RelayPool::new(
            vec![relay.clone() as Arc<dyn RelayNode>],
            PoolConfig::default(),
        )
        .unwrap();
        let cache = Arc::new(InMemoryCache::new());
        let reconciler = Reconciler::new(
            Arc::new(pool),
            cache.clone(),
            ExpirationPolicy::default(),
            ReconcilerConfig::default(),
        );
        Fixture {
            relay,
            cache,
            reconciler,
        }
    }

    fn pending(lash_id: &str, amount: u64, created_at: u64) -> Event {
        TipEventBuilder::new("alice")
            .with_sender_wallet("alice-wallet")
            .pending(lash_id, "bob", "bob-wallet", amount, created_at, None)
            .into_signed("sig")
    }

    #[tokio::test]
    async fn test_sync_resolves_into_cache() {
        let f = fixture();
        f.relay.insert(pending("L1", 10, NOW - 10));
        f.relay.insert(pending("L2", 20, NOW - 5));

        let report = f.reconciler.sync_sender("alice", NOW).await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.upserted, 2);
        assert!(!report.stale);
        assert_eq!(f.cache.len(), 2);
        assert_eq!(f.reconciler.last_sync(&SyncScope::Sender("alice".into())), Some(NOW));
    }

    #[tokio::test]
    async fn test_paid_transition_supersedes_pending() {
        let f = fixture();
        let original = pending("L1", 10, NOW - 100);
        f.relay.insert(original.clone());
        f.reconciler.sync_sender("alice", NOW).await.unwrap();

        let record = TipRecord::from_event(&original).unwrap();
        let paid = TipEventBuilder::new("alice")
            .paid(
                &record,
                &PaidTransition {
                    tx_id: "tx-9".into(),
                    output_index: 0,
                    block_height: Some(42),
                    block_time: None,
                },
                NOW + 1,
            )
            .into_signed("sig");
        f.relay.insert(paid);

        let report = f.reconciler.sync_sender("alice", NOW + 10).await.unwrap();
        assert_eq!(report.since, Some(NOW - 300));
        assert_eq!(report.upserted, 1);

        let rows = f.cache.read_by_ids(&["L1".to_string()]).await.unwrap();
        assert_eq!(rows[0].record.state, TipState::Paid);
        assert_eq!(rows[0].record.settlement_tx_id.as_deref(), Some("tx-9"));
    }

    #[tokio::test]
    async fn test_unavailable_relays_keep_stale_cache() {
        let f = fixture();
        f.relay.insert(pending("L1", 10, NOW - 10));
        f.reconciler.sync_sender("alice", NOW).await.unwrap();

        f.relay.set_offline(true);
        let report = f.reconciler.sync_sender("alice", NOW + 60).await.unwrap();
        assert!(report.stale);
        assert_eq!(f.cache.len(), 1);
        // A failed pass does not advance the incremental cursor
        assert_eq!(f.reconciler.last_sync(&SyncScope::Sender("alice".into())), Some(NOW));
    }

    #[tokio::test]
    async fn test_late_event_is_picked_up_by_full_resync() {
        let f = fixture();
        let first = f.reconciler.sync_sender("alice", NOW).await.unwrap();
        assert!(first.full);

        // Reaches the relay after the cursor has moved past its timestamp
        f.relay.insert(pending("late", 10, NOW - 600));

        let config = ReconcilerConfig::default();
        for pass in 1..=config.full_sync_every {
            let report = f
                .reconciler
                .sync_sender("alice", NOW + 60 * pass as u64)
                .await
                .unwrap();
            assert!(!report.full);
            assert_eq!(f.cache.len(), 0);
        }

        let report = f.reconciler.sync_sender("alice", NOW + 3600).await.unwrap();
        assert!(report.full);
        assert_eq!(report.since, None);
        assert_eq!(f.cache.len(), 1);

        // Back to incremental afterwards
        let report = f.reconciler.sync_sender("alice", NOW + 3660).await.unwrap();
        assert_eq!(report.since, Some(NOW + 3600 - 300));
    }

    #[tokio::test]
    async fn test_first_pass_after_outage_is_full() {
        let f = fixture();
        f.reconciler.sync_sender("alice", NOW).await.unwrap();

        f.relay.set_offline(true);
        assert!(f.reconciler.sync_sender("alice", NOW + 60).await.unwrap().stale);

        // Published elsewhere while this device could not reach the relay
        f.relay.set_offline(false);
        f.relay.insert(pending("missed", 10, NOW - 900));

        let report = f.reconciler.sync_sender("alice", NOW + 120).await.unwrap();
        assert!(report.full);
        assert_eq!(report.upserted, 1);
        assert_eq!(f.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_and_forged_events_are_skipped() {
        let f = fixture();
        let missing_amount = UnsignedEvent::new("alice", NOW, LASH_KIND)
            .tag(["d", "broken"])
            .into_signed("sig");
        let mut forged = pending("L2", 20, NOW);
        forged.content = "edited".into();

        let report = f
            .reconciler
            .apply_events(&[missing_amount, forged, pending("L3", 30, NOW)], NOW)
            .await
            .unwrap();

        assert_eq!(report.skipped, 2);
        assert_eq!(report.upserted, 1);
    }

    #[tokio::test]
    async fn test_recipient_sync_and_totals() {
        let f = fixture();
        f.relay.insert(pending("L1", 10, NOW - 10));
        f.relay.insert(pending("old", 99, NOW - 80 * 3600));

        f.reconciler.sync_recipient("bob", NOW).await.unwrap();
        assert_eq!(f.cache.read_for_recipient("bob").await.unwrap().len(), 2);

        let totals = f.reconciler.pending_totals("alice", NOW).await.unwrap();
        assert_eq!(
            totals,
            PendingTotals {
                payable_amount: 10,
                payable_count: 1,
                expired_amount: 99,
                expired_count: 1,
            }
        );

        let pending = f.cache.read_pending_for_sender("alice").await.unwrap();
        let payable = f.reconciler.policy().select_payable(pending, NOW);
        assert_eq!(payable.len(), 1);
        assert_eq!(payable[0].lash_id, "L1");
    }
}
