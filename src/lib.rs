//! LASH: micro-tips recorded as replaceable relay events and settled in
//! aggregated payments.
//!
//! Each concern lives in its own crate; this facade re-exports them.
//!
//! - [`types`]: events, tip records, settlement requests
//! - [`relay`]: multi-node relay pool
//! - [`cache`]: local tip cache
//! - [`sync`]: resolution, expiration and reconciliation
//! - [`settlement`]: eligibility gate, stability detector, orchestrator
//! - [`engine`]: per-sender runtime
//! - [`config`], [`metrics`], [`resilience`]: ambient support

pub use lash_cache as cache;
pub use lash_config as config;
pub use lash_engine as engine;
pub use lash_metrics as metrics;
pub use lash_relay as relay;
pub use lash_resilience as resilience;
pub use lash_settlement as settlement;
pub use lash_sync as sync;
pub use lash_types as types;
