//! Local cache of resolved LASH tip records.
//!
//! The cache is the read model the settlement side works from: it holds one
//! row per `lash_id` and absorbs relay results through idempotent upserts.

pub mod sqlite_store;
pub mod store;

pub use sqlite_store::SqliteStore;
pub use store::{merge_action, CacheError, CacheStore, InMemoryCache, MergeAction};
