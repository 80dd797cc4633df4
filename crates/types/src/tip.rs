use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::event::*;

/// Latest `created_at` accepted from a relay, 9999-12-31T23:59:59Z
pub const MAX_CREATED_AT: u64 = 253_402_300_799;

/// Settlement state of a tip
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TipState {
    Pending,
    Paid,
}

impl TipState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipState::Pending => "pending",
            TipState::Paid => "paid",
        }
    }
}

impl fmt::Display for TipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TipState {
    type Err = TipParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TipState::Pending),
            "paid" => Ok(TipState::Paid),
            other => Err(TipParseError::InvalidTag {
                tag: TAG_STATE,
                value: other.to_string(),
            }),
        }
    }
}

/// One pending or settled micro-tip
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TipRecord {
    pub lash_id: String,
    pub source_event_id: String,
    pub sender_pubkey: String,
    pub recipient_pubkey: String,
    pub recipient_wallet: String,
    pub sender_wallet: Option<String>,
    pub amount: u64,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    pub state: TipState,
    pub settlement_tx_id: Option<String>,
    pub output_index: Option<u32>,
    pub block_height: Option<u64>,
    pub block_time: Option<u64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TipParseError {
    #[error("unexpected event kind {0}")]
    WrongKind(u32),

    #[error("missing tag: {0}")]
    MissingTag(&'static str),

    #[error("invalid value for tag {tag}: {value}")]
    InvalidTag { tag: &'static str, value: String },

    #[error("sender tag {sender} does not match author {author}")]
    AuthorMismatch { sender: String, author: String },

    #[error("paid record {0} has no settlement transaction id")]
    PaidWithoutTx(String),

    #[error("implausible created_at {0}")]
    ImplausibleTimestamp(u64),
}

fn required<'a>(event: &'a Event, tag: &'static str) -> Result<&'a str, TipParseError> {
    event.tag_value(tag).ok_or(TipParseError::MissingTag(tag))
}

fn parse_num<T: FromStr>(tag: &'static str, value: &str) -> Result<T, TipParseError> {
    value.parse().map_err(|_| TipParseError::InvalidTag {
        tag,
        value: value.to_string(),
    })
}

impl TipRecord {
    /// Project a canonical LASH event into a tip record.
    ///
    /// The event author is the sender; a `sender` tag naming someone else is
    /// rejected so nobody can publish state transitions for another sender's
    /// tips.
    pub fn from_event(event: &Event) -> Result<Self, TipParseError> {
        if event.kind != LASH_KIND {
            return Err(TipParseError::WrongKind(event.kind));
        }
        if event.created_at > MAX_CREATED_AT {
            return Err(TipParseError::ImplausibleTimestamp(event.created_at));
        }

        let lash_id = required(event, TAG_D)?.to_string();
        if lash_id.is_empty() {
            return Err(TipParseError::InvalidTag {
                tag: TAG_D,
                value: lash_id,
            });
        }

        if let Some(sender) = event.tag_value(TAG_SENDER) {
            if sender != event.pubkey {
                return Err(TipParseError::AuthorMismatch {
                    sender: sender.to_string(),
                    author: event.pubkey.clone(),
                });
            }
        }

        let recipient_pubkey = required(event, TAG_RECIPIENT)?.to_string();
        let amount = parse_num::<u64>(TAG_AMOUNT, required(event, TAG_AMOUNT)?)?;

        // ["wallet", <sender wallet>, <recipient wallet>]
        let wallet = event.tag(TAG_WALLET).ok_or(TipParseError::MissingTag(TAG_WALLET))?;
        let (sender_wallet, recipient_wallet) = match wallet {
            [_, recipient] => (None, recipient.clone()),
            [_, sender, recipient, ..] => (
                Some(sender.clone()).filter(|s| !s.is_empty()),
                recipient.clone(),
            ),
            _ => return Err(TipParseError::MissingTag(TAG_WALLET)),
        };

        let state = match event.tag_value(TAG_STATE) {
            Some(s) => s.parse()?,
            None => TipState::Pending,
        };

        // A pending tip is its own source event
        let source_event_id = event
            .tag_value(TAG_SOURCE_EVENT)
            .map(str::to_string)
            .unwrap_or_else(|| event.id.clone());

        let expires_at = event
            .tag_value(TAG_EXPIRATION)
            .map(|v| parse_num::<u64>(TAG_EXPIRATION, v))
            .transpose()?;

        let settlement_tx_id = event.tag_value(TAG_TXID).map(str::to_string);
        if state == TipState::Paid && settlement_tx_id.is_none() {
            return Err(TipParseError::PaidWithoutTx(lash_id));
        }

        let output_index = event
            .tag_value(TAG_VOUT)
            .map(|v| parse_num::<u32>(TAG_VOUT, v))
            .transpose()?;

        let (block_height, block_time) = match event.tag(TAG_BLOCK) {
            Some(block) => (
                block
                    .get(1)
                    .map(|v| parse_num::<u64>(TAG_BLOCK, v))
                    .transpose()?,
                block
                    .get(2)
                    .map(|v| parse_num::<u64>(TAG_BLOCK, v))
                    .transpose()?,
            ),
            None => (None, None),
        };

        Ok(Self {
            lash_id,
            source_event_id,
            sender_pubkey: event.pubkey.clone(),
            recipient_pubkey,
            recipient_wallet,
            sender_wallet,
            amount,
            created_at: event.created_at,
            expires_at,
            state,
            settlement_tx_id: if state == TipState::Paid {
                settlement_tx_id
            } else {
                None
            },
            output_index,
            block_height,
            block_time,
        })
    }

    pub fn is_paid(&self) -> bool {
        self.state == TipState::Paid
    }
}

/// Durable projection of a resolved tip record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheRow {
    pub record: TipRecord,
    /// Id of the event this row was projected from
    pub canonical_event_id: String,
    pub last_fetched_at: u64,
}

impl CacheRow {
    pub fn from_event(event: &Event, fetched_at: u64) -> Result<Self, TipParseError> {
        Ok(Self {
            record: TipRecord::from_event(event)?,
            canonical_event_id: event.id.clone(),
            last_fetched_at: fetched_at,
        })
    }

    pub fn lash_id(&self) -> &str {
        &self.record.lash_id
    }

    /// Whether this row's canonical event supersedes `other`'s under the
    /// replaceable-event rule (newer `created_at`, then greater event id).
    pub fn supersedes(&self, other: &CacheRow) -> bool {
        (self.record.created_at, self.canonical_event_id.as_str())
            > (other.record.created_at, other.canonical_event_id.as_str())
    }
}

/// Settlement details stamped onto a paid transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidTransition {
    pub tx_id: String,
    pub output_index: u32,
    pub block_height: Option<u64>,
    pub block_time: Option<u64>,
}

/// Builds LASH events for new tips and for pending → paid transitions
#[derive(Debug, Clone)]
pub struct TipEventBuilder {
    sender_pubkey: String,
    sender_wallet: Option<String>,
}

impl TipEventBuilder {
    pub fn new(sender_pubkey: impl Into<String>) -> Self {
        Self {
            sender_pubkey: sender_pubkey.into(),
            sender_wallet: None,
        }
    }

    pub fn with_sender_wallet(mut self, wallet: impl Into<String>) -> Self {
        self.sender_wallet = Some(wallet.into());
        self
    }

    fn base(&self, lash_id: &str, created_at: u64) -> UnsignedEvent {
        UnsignedEvent::new(self.sender_pubkey.clone(), created_at, LASH_KIND)
            .tag([TAG_D, lash_id])
            .tag([TAG_SENDER, self.sender_pubkey.as_str()])
    }

    /// A freshly granted tip
    pub fn pending(
        &self,
        lash_id: &str,
        recipient_pubkey: &str,
        recipient_wallet: &str,
        amount: u64,
        created_at: u64,
        expires_at: Option<u64>,
    ) -> UnsignedEvent {
        let mut event = self
            .base(lash_id, created_at)
            .tag([TAG_RECIPIENT, recipient_pubkey])
            .tag([TAG_AMOUNT, amount.to_string().as_str()])
            .tag([
                TAG_WALLET,
                self.sender_wallet.as_deref().unwrap_or(""),
                recipient_wallet,
            ])
            .tag([TAG_STATE, TipState::Pending.as_str()]);
        if let Some(expires_at) = expires_at {
            event = event.tag([TAG_EXPIRATION, expires_at.to_string().as_str()]);
        }
        event.tag([TAG_HASHTAG, LASH_HASHTAG])
    }

    /// Replacement event moving `record` to paid. `created_at` must be later
    /// than the record's so the transition wins resolution.
    pub fn paid(
        &self,
        record: &TipRecord,
        transition: &PaidTransition,
        created_at: u64,
    ) -> UnsignedEvent {
        let created_at = created_at.max(record.created_at.saturating_add(1));
        let sender_wallet = self
            .sender_wallet
            .as_deref()
            .or(record.sender_wallet.as_deref())
            .unwrap_or("");

        let mut block = vec![TAG_BLOCK.to_string()];
        if let Some(height) = transition.block_height {
            block.push(height.to_string());
            if let Some(time) = transition.block_time {
                block.push(time.to_string());
            }
        }

        let mut event = self
            .base(&record.lash_id, created_at)
            .tag([TAG_RECIPIENT, record.recipient_pubkey.as_str()])
            .tag([TAG_SOURCE_EVENT, record.source_event_id.as_str()])
            .tag([TAG_AMOUNT, record.amount.to_string().as_str()])
            .tag([TAG_WALLET, sender_wallet, record.recipient_wallet.as_str()])
            .tag([TAG_STATE, TipState::Paid.as_str()])
            .tag([TAG_TXID, transition.tx_id.as_str()])
            .tag([TAG_VOUT, transition.output_index.to_string().as_str()]);
        if block.len() > 1 {
            event = event.tag(block);
        }
        if let Some(expires_at) = record.expires_at {
            event = event.tag([TAG_EXPIRATION, expires_at.to_string().as_str()]);
        }
        event.tag([TAG_HASHTAG, LASH_HASHTAG])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> TipEventBuilder {
        TipEventBuilder::new("alice").with_sender_wallet("alice-wallet")
    }

    #[test]
    fn test_pending_round_trip() {
        let event = builder()
            .pending("lash-1", "bob", "bob-wallet", 25, 1_000, None)
            .into_signed("sig");
        let record = TipRecord::from_event(&event).unwrap();

        assert_eq!(record.lash_id, "lash-1");
        assert_eq!(record.sender_pubkey, "alice");
        assert_eq!(record.recipient_pubkey, "bob");
        assert_eq!(record.recipient_wallet, "bob-wallet");
        assert_eq!(record.sender_wallet.as_deref(), Some("alice-wallet"));
        assert_eq!(record.amount, 25);
        assert_eq!(record.state, TipState::Pending);
        assert_eq!(record.source_event_id, event.id);
        assert_eq!(record.settlement_tx_id, None);
    }

    #[test]
    fn test_paid_transition_keeps_source_reference() {
        let pending = builder()
            .pending("lash-1", "bob", "bob-wallet", 25, 1_000, Some(5_000))
            .into_signed("sig");
        let record = TipRecord::from_event(&pending).unwrap();

        let transition = PaidTransition {
            tx_id: "tx-abc".to_string(),
            output_index: 2,
            block_height: Some(42),
            block_time: Some(1_700_000_000),
        };
        let paid = builder().paid(&record, &transition, 900).into_signed("sig");
        let paid_record = TipRecord::from_event(&paid).unwrap();

        assert!(paid.created_at > pending.created_at);
        assert_eq!(paid.discriminator(), Some("lash-1"));
        assert_eq!(paid_record.state, TipState::Paid);
        assert_eq!(paid_record.source_event_id, pending.id);
        assert_eq!(paid_record.settlement_tx_id.as_deref(), Some("tx-abc"));
        assert_eq!(paid_record.output_index, Some(2));
        assert_eq!(paid_record.block_height, Some(42));
        assert_eq!(paid_record.block_time, Some(1_700_000_000));
        assert_eq!(paid_record.expires_at, Some(5_000));
    }

    #[test]
    fn test_rejects_foreign_sender_tag() {
        let event = UnsignedEvent::new("mallory", 10, LASH_KIND)
            .tag([TAG_D, "lash-1"])
            .tag([TAG_SENDER, "alice"])
            .tag([TAG_RECIPIENT, "bob"])
            .tag([TAG_AMOUNT, "5"])
            .tag([TAG_WALLET, "", "bob-wallet"])
            .into_signed("sig");

        assert!(matches!(
            TipRecord::from_event(&event),
            Err(TipParseError::AuthorMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_malformed_events() {
        let no_amount = UnsignedEvent::new("alice", 10, LASH_KIND)
            .tag([TAG_D, "lash-1"])
            .tag([TAG_RECIPIENT, "bob"])
            .tag([TAG_WALLET, "", "bob-wallet"])
            .into_signed("sig");
        assert_eq!(
            TipRecord::from_event(&no_amount),
            Err(TipParseError::MissingTag(TAG_AMOUNT))
        );

        let paid_without_tx = UnsignedEvent::new("alice", 10, LASH_KIND)
            .tag([TAG_D, "lash-1"])
            .tag([TAG_RECIPIENT, "bob"])
            .tag([TAG_AMOUNT, "5"])
            .tag([TAG_WALLET, "", "bob-wallet"])
            .tag([TAG_STATE, "paid"])
            .into_signed("sig");
        assert!(matches!(
            TipRecord::from_event(&paid_without_tx),
            Err(TipParseError::PaidWithoutTx(_))
        ));

        let wrong_kind = UnsignedEvent::new("alice", 10, 1).into_signed("sig");
        assert_eq!(
            TipRecord::from_event(&wrong_kind),
            Err(TipParseError::WrongKind(1))
        );
    }

    #[test]
    fn test_supersedes_orders_by_time_then_id() {
        let older = CacheRow::from_event(
            &builder()
                .pending("lash-1", "bob", "w", 1, 100, None)
                .into_signed("sig"),
            0,
        )
        .unwrap();
        let mut newer = older.clone();
        newer.record.created_at = 200;
        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));

        let mut same_time = older.clone();
        same_time.canonical_event_id = "ffff".to_string();
        let mut lower = older.clone();
        lower.canonical_event_id = "0000".to_string();
        assert!(same_time.supersedes(&lower));
        assert!(!older.supersedes(&older));
    }

    #[test]
    fn test_far_future_timestamps() {
        let far_future = builder()
            .pending("lash-1", "bob", "bob-wallet", 25, u64::MAX, None)
            .into_signed("sig");
        assert_eq!(
            TipRecord::from_event(&far_future),
            Err(TipParseError::ImplausibleTimestamp(u64::MAX))
        );

        let edge = builder()
            .pending("lash-1", "bob", "bob-wallet", 25, MAX_CREATED_AT, None)
            .into_signed("sig");
        let mut record = TipRecord::from_event(&edge).unwrap();

        // A record built by hand still yields a transition without overflow
        record.created_at = u64::MAX;
        let transition = PaidTransition {
            tx_id: "tx-abc".to_string(),
            output_index: 0,
            block_height: None,
            block_time: None,
        };
        let paid = builder().paid(&record, &transition, 1_700_000_000);
        assert_eq!(paid.created_at, u64::MAX);
    }
}
