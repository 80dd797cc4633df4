//! Per-sender LASH runtime.
//!
//! A [`SenderEngine`] owns one sender's reconciler and settlement
//! orchestrator and drives them from independent timers: periodic relay
//! sync, a live subscription, eligibility polling and the settlement tick.
//! [`EngineConfig`] maps the file-level configuration onto those parts.

pub mod config;
pub mod engine;

pub use config::{logging_options, open_cache, EngineConfig};
pub use engine::{BuilderError, EngineError, EngineHandle, SenderEngine, SenderEngineBuilder};
