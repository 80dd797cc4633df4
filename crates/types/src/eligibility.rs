use serde::{Deserialize, Serialize};

/// Snapshot of the external settlement gate
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EligibilityStatus {
    pub can_send: bool,
    /// Block of the sender's last confirmed settlement
    pub last_block: Option<u64>,
    pub current_block: Option<u64>,
    pub block_time: Option<u64>,
    pub error: Option<String>,
}

impl EligibilityStatus {
    pub fn eligible(current_block: u64) -> Self {
        Self {
            can_send: true,
            current_block: Some(current_block),
            ..Default::default()
        }
    }

    pub fn blocked(last_block: u64, current_block: u64) -> Self {
        Self {
            can_send: false,
            last_block: Some(last_block),
            current_block: Some(current_block),
            ..Default::default()
        }
    }

    /// Status used when the oracle cannot be reached. Settlement stays
    /// available because a failed attempt is retried anyway.
    pub fn optimistic(error: impl Into<String>) -> Self {
        Self {
            can_send: true,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.error.is_some()
    }
}
