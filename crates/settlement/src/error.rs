use lash_cache::CacheError;
use lash_types::{BatchError, SignerError};
use std::time::Duration;
use thiserror::Error;

use crate::backend::BackendError;

/// Why a settlement attempt failed. Failures are retried on the next
/// eligible cycle; nothing is rolled back.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("invalid batch: {0}")]
    Batch(#[from] BatchError),

    #[error("payment backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("payment rejected: {0}")]
    Rejected(String),

    #[error("payment submission timed out after {0:?}")]
    SubmitTimeout(Duration),

    #[error("payment succeeded without a transaction id")]
    MissingTransactionId,

    #[error("signing failed: {0}")]
    Signer(#[from] SignerError),
}

pub type Result<T> = std::result::Result<T, SettlementError>;
