use thiserror::Error;

/// Failure of a single relay node
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("relay {0} unreachable")]
    Unreachable(String),

    #[error("relay {relay} rejected event: {reason}")]
    Rejected { relay: String, reason: String },

    #[error("relay {0} timed out")]
    Timeout(String),

    #[error("relay {0} skipped, circuit open")]
    CircuitOpen(String),

    #[error("relay {relay} protocol error: {reason}")]
    Protocol { relay: String, reason: String },
}

/// Failure of the pool as a whole
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no relay node responded ({attempted} attempted)")]
    SourceUnavailable { attempted: usize },

    #[error("relay pool has no nodes configured")]
    NoNodes,
}
