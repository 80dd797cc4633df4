use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::TipRecord;

/// Opaque handle to the sender's signing material. Only the payment backend
/// interprets it; `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct SenderKey(String);

impl SenderKey {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SenderKey(<redacted>)")
    }
}

/// One output of an aggregated settlement payment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchRecipient {
    pub wallet: String,
    pub amount: u64,
    pub recipient_pubkey: String,
    pub source_event_id: String,
    pub lash_id: String,
}

impl From<&TipRecord> for BatchRecipient {
    fn from(record: &TipRecord) -> Self {
        Self {
            wallet: record.recipient_wallet.clone(),
            amount: record.amount,
            recipient_pubkey: record.recipient_pubkey.clone(),
            source_event_id: record.source_event_id.clone(),
            lash_id: record.lash_id.clone(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("settlement batch is empty")]
    Empty,

    #[error("lash {0} appears more than once in the batch")]
    DuplicateLash(String),

    #[error("record {lash_id} belongs to sender {found}, batch sender is {expected}")]
    MixedSenders {
        lash_id: String,
        expected: String,
        found: String,
    },
}

/// Aggregation of one sender's payable tips, consumed by a single payment call
#[derive(Debug, Clone)]
pub struct SettlementBatch {
    sender_pubkey: String,
    recipients: Vec<BatchRecipient>,
    sender_key: SenderKey,
    change_address: String,
}

impl SettlementBatch {
    pub fn new(
        sender_pubkey: impl Into<String>,
        records: &[TipRecord],
        sender_key: SenderKey,
        change_address: impl Into<String>,
    ) -> Result<Self, BatchError> {
        let sender_pubkey = sender_pubkey.into();
        if records.is_empty() {
            return Err(BatchError::Empty);
        }

        let mut seen = HashSet::new();
        let mut recipients = Vec::with_capacity(records.len());
        for record in records {
            if record.sender_pubkey != sender_pubkey {
                return Err(BatchError::MixedSenders {
                    lash_id: record.lash_id.clone(),
                    expected: sender_pubkey,
                    found: record.sender_pubkey.clone(),
                });
            }
            if !seen.insert(record.lash_id.as_str()) {
                return Err(BatchError::DuplicateLash(record.lash_id.clone()));
            }
            recipients.push(BatchRecipient::from(record));
        }

        Ok(Self {
            sender_pubkey,
            recipients,
            sender_key,
            change_address: change_address.into(),
        })
    }

    pub fn sender_pubkey(&self) -> &str {
        &self.sender_pubkey
    }

    pub fn recipients(&self) -> &[BatchRecipient] {
        &self.recipients
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    pub fn total_amount(&self) -> u64 {
        self.recipients.iter().map(|r| r.amount).sum()
    }

    pub fn lash_ids(&self) -> impl Iterator<Item = &str> {
        self.recipients.iter().map(|r| r.lash_id.as_str())
    }

    /// Consume the batch into the payment backend request
    pub fn into_request(self) -> PaymentRequest {
        PaymentRequest {
            sender_key: self.sender_key,
            recipients: self
                .recipients
                .into_iter()
                .map(|r| PaymentRecipient {
                    address: r.wallet,
                    amount: r.amount,
                    recipient_pubkey: r.recipient_pubkey,
                    source_event_id: r.source_event_id,
                    lash_id: r.lash_id,
                })
                .collect(),
            change_address: self.change_address,
        }
    }
}

/// Recipient entry of a payment backend request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentRecipient {
    pub address: String,
    pub amount: u64,
    pub recipient_pubkey: String,
    pub source_event_id: String,
    pub lash_id: String,
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub sender_key: SenderKey,
    pub recipients: Vec<PaymentRecipient>,
    pub change_address: String,
}

/// Recipient the backend reports as included in the transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmedRecipient {
    pub address: String,
    pub amount: u64,
    pub recipient_pubkey: String,
    pub source_event_id: String,
    pub lash_id: String,
    /// Transaction output paying this recipient
    pub output_index: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentResponse {
    pub success: bool,
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub confirmed_recipients: Vec<ConfirmedRecipient>,
    pub block_height: Option<u64>,
    pub block_time: Option<u64>,
    pub error: Option<String>,
}
