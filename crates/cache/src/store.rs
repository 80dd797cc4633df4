use async_trait::async_trait;
use lash_types::{CacheRow, TipState};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// MERGE RULE
// ═══════════════════════════════════════════════════════════════════════════

/// What an upsert does with an incoming row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    Insert,
    Replace,
    /// Same canonical event seen again; only `last_fetched_at` moves forward
    RefreshFetched,
    Ignore,
}

/// Conflict resolution shared by every store backend.
///
/// Paid is absorbing: a paid row is never replaced by a pending one, and a
/// paid row always replaces a pending one. Rows in the same state follow the
/// replaceable-event rule.
pub fn merge_action(existing: Option<&CacheRow>, incoming: &CacheRow) -> MergeAction {
    let Some(existing) = existing else {
        return MergeAction::Insert;
    };

    if existing.canonical_event_id == incoming.canonical_event_id {
        return if incoming.last_fetched_at > existing.last_fetched_at {
            MergeAction::RefreshFetched
        } else {
            MergeAction::Ignore
        };
    }

    match (existing.record.state, incoming.record.state) {
        (TipState::Paid, TipState::Pending) => MergeAction::Ignore,
        (TipState::Pending, TipState::Paid) => MergeAction::Replace,
        _ if incoming.supersedes(existing) => MergeAction::Replace,
        _ => MergeAction::Ignore,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Local projection of resolved tip records. Reads never touch the network.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Insert or merge rows keyed by `lash_id`. Safe to repeat with
    /// overlapping input; conflicts are merged per [`merge_action`], never
    /// reported. Returns the number of rows inserted or replaced.
    async fn upsert_many(&self, rows: &[CacheRow]) -> Result<usize, CacheError>;

    async fn read_by_ids(&self, lash_ids: &[String]) -> Result<Vec<CacheRow>, CacheError>;

    /// Pending rows of a sender, oldest first. Expired rows are included;
    /// callers apply the expiration policy.
    async fn read_pending_for_sender(&self, sender: &str) -> Result<Vec<CacheRow>, CacheError>;

    async fn read_all_for_sender(&self, sender: &str) -> Result<Vec<CacheRow>, CacheError>;

    async fn read_for_recipient(&self, recipient: &str) -> Result<Vec<CacheRow>, CacheError>;

    async fn count(&self) -> Result<usize, CacheError>;
}

fn sort_rows(rows: &mut [CacheRow]) {
    rows.sort_by(|a, b| {
        a.record
            .created_at
            .cmp(&b.record.created_at)
            .then_with(|| a.record.lash_id.cmp(&b.record.lash_id))
    });
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
pub struct InMemoryCache {
    rows: Arc<RwLock<HashMap<String, CacheRow>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }

    /// Snapshot of every row, sorted (for tests and diagnostics)
    pub fn snapshot(&self) -> Vec<CacheRow> {
        let mut rows: Vec<_> = self.rows.read().unwrap().values().cloned().collect();
        sort_rows(&mut rows);
        rows
    }

    fn select<P>(&self, predicate: P) -> Vec<CacheRow>
    where
        P: Fn(&CacheRow) -> bool,
    {
        let mut rows: Vec<_> = self
            .rows
            .read()
            .unwrap()
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect();
        sort_rows(&mut rows);
        rows
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn upsert_many(&self, rows: &[CacheRow]) -> Result<usize, CacheError> {
        let mut stored = self.rows.write().unwrap();
        let mut changed = 0;

        for row in rows {
            match merge_action(stored.get(row.lash_id()), row) {
                MergeAction::Insert | MergeAction::Replace => {
                    stored.insert(row.lash_id().to_string(), row.clone());
                    changed += 1;
                }
                MergeAction::RefreshFetched => {
                    if let Some(existing) = stored.get_mut(row.lash_id()) {
                        existing.last_fetched_at = row.last_fetched_at;
                    }
                }
                MergeAction::Ignore => {}
            }
        }

        Ok(changed)
    }

    async fn read_by_ids(&self, lash_ids: &[String]) -> Result<Vec<CacheRow>, CacheError> {
        let stored = self.rows.read().unwrap();
        Ok(lash_ids
            .iter()
            .filter_map(|id| stored.get(id).cloned())
            .collect())
    }

    async fn read_pending_for_sender(&self, sender: &str) -> Result<Vec<CacheRow>, CacheError> {
        Ok(self.select(|r| r.record.sender_pubkey == sender && r.record.state == TipState::Pending))
    }

    async fn read_all_for_sender(&self, sender: &str) -> Result<Vec<CacheRow>, CacheError> {
        Ok(self.select(|r| r.record.sender_pubkey == sender))
    }

    async fn read_for_recipient(&self, recipient: &str) -> Result<Vec<CacheRow>, CacheError> {
        Ok(self.select(|r| r.record.recipient_pubkey == recipient))
    }

    async fn count(&self) -> Result<usize, CacheError> {
        Ok(self.len())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TEST FIXTURES
// ═══════════════════════════════════════════════════════════════════════════


// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
