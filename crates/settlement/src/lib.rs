//! Write side of the LASH engine.
//!
//! An [`EligibilityGate`] and a [`StabilityDetector`] decide when a sender's
//! payable tips may be settled; the [`SettlementOrchestrator`] then submits a
//! single aggregated payment and republishes one paid transition per tip.

pub mod backend;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod stability;

pub use backend::{BackendError, EligibilityOracle, OracleError, PaymentBackend};
pub use error::SettlementError;
pub use gate::{EligibilityGate, GateConfig, GateReading};
pub use orchestrator::{
    OrchestratorConfig, OrchestratorState, SenderIdentity, SettlementOrchestrator,
    SettlementOutcome, SettlementReceipt, SkipReason,
};
pub use stability::{StabilityDetector, DEFAULT_QUIET_PERIOD};
