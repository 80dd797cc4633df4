use async_trait::async_trait;
use thiserror::Error;

use crate::{Event, UnsignedEvent};

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signer unavailable: {0}")]
    Unavailable(String),

    #[error("event author {event} does not match signer {signer}")]
    WrongAuthor { event: String, signer: String },

    #[error("signing failed: {0}")]
    Failed(String),
}

/// Key custody boundary. Implementations hold the sender's key material and
/// produce signed events; the engine never sees the key.
#[async_trait]
pub trait EventSigner: Send + Sync {
    fn pubkey(&self) -> &str;

    async fn sign(&self, event: UnsignedEvent) -> Result<Event, SignerError>;
}
