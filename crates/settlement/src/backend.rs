use async_trait::async_trait;
use lash_types::{EligibilityStatus, PaymentRequest, PaymentResponse};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("payment backend unavailable: {0}")]
    Unavailable(String),

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("transaction broadcast failed: {0}")]
    BroadcastFailed(String),
}

/// Builds, signs and broadcasts the aggregated payment transaction
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    async fn submit(&self, request: PaymentRequest) -> Result<PaymentResponse, BackendError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("eligibility oracle unavailable: {0}")]
    Unavailable(String),

    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),
}

/// Reports whether a sender may settle at the current block height
#[async_trait]
pub trait EligibilityOracle: Send + Sync {
    async fn check(&self, sender: &str) -> Result<EligibilityStatus, OracleError>;
}
