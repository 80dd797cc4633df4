//! Event Source Adapter for LASH tip records
//!
//! A [`RelayPool`] fronts any number of independent relay nodes. Reads fan out
//! to every node and merge by event id, writes report one outcome per node, and
//! each node sits behind a circuit breaker so a dead relay is skipped instead
//! of costing a full timeout on every call.

pub mod error;
pub mod memory;
pub mod node;
pub mod pool;

pub use error::{NodeError, RelayError};
pub use memory::InMemoryRelay;
pub use node::{RelayMessage, RelayNode};
pub use pool::{NodeOutcome, PoolConfig, PublishReport, RelayPool, Subscription};
