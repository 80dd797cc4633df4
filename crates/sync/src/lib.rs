//! Read side of the LASH engine.
//!
//! Relay events are reduced to one canonical event per tip
//! ([`resolver`]), projected into tip records, judged against the soft
//! expiration window ([`expiration`]) and merged into the local cache
//! ([`reconciler`]).

pub mod expiration;
pub mod reconciler;
pub mod resolver;

pub use expiration::{ExpirationPolicy, DEFAULT_EXPIRATION_WINDOW};
pub use reconciler::{
    PendingTotals, Reconciler, ReconcilerConfig, SyncError, SyncReport, SyncScope,
};
pub use resolver::{resolve, resolve_by_lash, supersedes, ReplaceableKey};
