//! Failure handling primitives for LASH network calls
//!
//! - `ExponentialBackoff`: retry schedule used when the eligibility oracle or a
//!   relay sync fails
//! - `CircuitBreaker`: per relay node guard so a dead node stops costing a
//!   full timeout on every query

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::ExponentialBackoff;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
