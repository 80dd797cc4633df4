use async_trait::async_trait;
use lash_types::{Event, Filter};
use tokio::sync::mpsc;

use crate::NodeError;

/// Message delivered on a node subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event(Event),
    /// All stored events matching the filter have been sent; live events follow
    EndOfStoredEvents,
    /// The node closed the subscription
    Closed(String),
}

/// Transport boundary to one relay node.
///
/// The wire protocol lives behind this trait; the pool only relies on these
/// three operations.
#[async_trait]
pub trait RelayNode: Send + Sync {
    fn url(&self) -> &str;

    async fn query(&self, filter: &Filter) -> Result<Vec<Event>, NodeError>;

    /// Open a subscription. The node sends stored events, then
    /// `EndOfStoredEvents`, then live events until the receiver is dropped.
    async fn subscribe(&self, filter: &Filter) -> Result<mpsc::Receiver<RelayMessage>, NodeError>;

    async fn publish(&self, event: &Event) -> Result<(), NodeError>;
}
