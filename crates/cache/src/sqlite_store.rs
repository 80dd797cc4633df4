use async_trait::async_trait;
use lash_types::{CacheRow, TipRecord, TipState};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::store::{merge_action, CacheError, CacheStore, MergeAction};

const SELECT_COLUMNS: &str = r#"
    SELECT lash_id, canonical_event_id, source_event_id, sender_pubkey,
           recipient_pubkey, recipient_wallet, sender_wallet, amount,
           created_at, expires_at, state, settlement_tx_id, output_index,
           block_height, block_time, last_fetched_at
    FROM lash_tips
"#;

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the cache database at the given path
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(path = %db_path.as_ref().display(), "Opened tip cache");

        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self, CacheError> {
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), CacheError> {
        sqlx::query(include_str!("../migrations/001_create_lash_tips.sql"))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(include_str!("../migrations/002_create_lash_tips_indexes.sql"))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    fn row_to_cache_row(row: &SqliteRow) -> Result<CacheRow, CacheError> {
        let state_str: String = row.get("state");
        let state = TipState::from_str(&state_str)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        let record = TipRecord {
            lash_id: row.get("lash_id"),
            source_event_id: row.get("source_event_id"),
            sender_pubkey: row.get("sender_pubkey"),
            recipient_pubkey: row.get("recipient_pubkey"),
            recipient_wallet: row.get("recipient_wallet"),
            sender_wallet: row.get("sender_wallet"),
            amount: row.get::<i64, _>("amount") as u64,
            created_at: row.get::<i64, _>("created_at") as u64,
            expires_at: row.get::<Option<i64>, _>("expires_at").map(|v| v as u64),
            state,
            settlement_tx_id: row.get("settlement_tx_id"),
            output_index: row.get::<Option<i64>, _>("output_index").map(|v| v as u32),
            block_height: row.get::<Option<i64>, _>("block_height").map(|v| v as u64),
            block_time: row.get::<Option<i64>, _>("block_time").map(|v| v as u64),
        };

        Ok(CacheRow {
            record,
            canonical_event_id: row.get("canonical_event_id"),
            last_fetched_at: row.get::<i64, _>("last_fetched_at") as u64,
        })
    }

    async fn fetch_where(&self, clause: &str, binds: &[&str]) -> Result<Vec<CacheRow>, CacheError> {
        let sql = format!("{SELECT_COLUMNS} WHERE {clause} ORDER BY created_at ASC, lash_id ASC");
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(*value);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(Self::row_to_cache_row).collect()
    }

    async fn write_row(
        tx: &mut Transaction<'_, Sqlite>,
        row: &CacheRow,
    ) -> Result<(), CacheError> {
        let r = &row.record;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO lash_tips (
                lash_id, canonical_event_id, source_event_id, sender_pubkey,
                recipient_pubkey, recipient_wallet, sender_wallet, amount,
                created_at, expires_at, state, settlement_tx_id, output_index,
                block_height, block_time, last_fetched_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&r.lash_id)
        .bind(&row.canonical_event_id)
        .bind(&r.source_event_id)
        .bind(&r.sender_pubkey)
        .bind(&r.recipient_pubkey)
        .bind(&r.recipient_wallet)
        .bind(&r.sender_wallet)
        .bind(r.amount as i64)
        .bind(r.created_at as i64)
        .bind(r.expires_at.map(|v| v as i64))
        .bind(r.state.as_str())
        .bind(&r.settlement_tx_id)
        .bind(r.output_index.map(i64::from))
        .bind(r.block_height.map(|v| v as i64))
        .bind(r.block_time.map(|v| v as i64))
        .bind(row.last_fetched_at as i64)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> CacheError {
    CacheError::DatabaseError(e.to_string())
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn upsert_many(&self, rows: &[CacheRow]) -> Result<usize, CacheError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut changed = 0;

        for row in rows {
            let sql = format!("{SELECT_COLUMNS} WHERE lash_id = ?");
            let existing = sqlx::query(&sql)
                .bind(row.lash_id())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?
                .map(|r| Self::row_to_cache_row(&r))
                .transpose()?;

            match merge_action(existing.as_ref(), row) {
                MergeAction::Insert | MergeAction::Replace => {
                    Self::write_row(&mut tx, row).await?;
                    changed += 1;
                }
                MergeAction::RefreshFetched => {
                    sqlx::query("UPDATE lash_tips SET last_fetched_at = ? WHERE lash_id = ?")
                        .bind(row.last_fetched_at as i64)
                        .bind(row.lash_id())
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                }
                MergeAction::Ignore => {
                    debug!(lash_id = %row.lash_id(), "Ignoring stale cache row");
                }
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(changed)
    }

    async fn read_by_ids(&self, lash_ids: &[String]) -> Result<Vec<CacheRow>, CacheError> {
        if lash_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; lash_ids.len()].join(", ");
        let binds: Vec<&str> = lash_ids.iter().map(String::as_str).collect();
        let rows = self
            .fetch_where(&format!("lash_id IN ({placeholders})"), &binds)
            .await?;

        // Preserve the caller's order
        Ok(lash_ids
            .iter()
            .filter_map(|id| rows.iter().find(|r| r.lash_id() == id).cloned())
            .collect())
    }

    async fn read_pending_for_sender(&self, sender: &str) -> Result<Vec<CacheRow>, CacheError> {
        self.fetch_where("sender_pubkey = ? AND state = 'pending'", &[sender])
            .await
    }

    async fn read_all_for_sender(&self, sender: &str) -> Result<Vec<CacheRow>, CacheError> {
        self.fetch_where("sender_pubkey = ?", &[sender]).await
    }

    async fn read_for_recipient(&self, recipient: &str) -> Result<Vec<CacheRow>, CacheError> {
        self.fetch_where("recipient_pubkey = ?", &[recipient]).await
    }

    async fn count(&self) -> Result<usize, CacheError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM lash_tips")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("n") as usize)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
