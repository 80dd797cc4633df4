pub mod eligibility;
pub mod event;
pub mod filter;
pub mod settlement;
pub mod signer;
pub mod tip;

pub use eligibility::*;
pub use event::*;
pub use filter::*;
pub use settlement::*;
pub use signer::*;
pub use tip::*;

pub const PROTOCOL_VERSION: &str = "1.0";

/// Seconds since the Unix epoch
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
