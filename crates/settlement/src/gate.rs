use lash_resilience::ExponentialBackoff;
use lash_types::EligibilityStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::EligibilityOracle;

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Fixed polling interval of the oracle
    pub poll_interval: Duration,
    /// First retry delay after a failed refresh
    pub retry_initial: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            retry_initial: Duration::from_secs(5),
        }
    }
}

/// A status together with the sequence number of the refresh that produced
/// it. Numbers increase by one per oracle call, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateReading {
    pub seq: u64,
    pub status: EligibilityStatus,
}

#[derive(Debug)]
struct GateState {
    latest: Option<GateReading>,
    refreshes: u64,
    last_refresh: Option<Instant>,
    backoff: ExponentialBackoff,
    next_poll: Duration,
}

/// Wraps the eligibility oracle with optimistic fallback, a countdown to the
/// next scheduled refresh and backoff after failures.
pub struct EligibilityGate {
    oracle: Arc<dyn EligibilityOracle>,
    config: GateConfig,
    state: Mutex<GateState>,
}

impl EligibilityGate {
    pub fn new(oracle: Arc<dyn EligibilityOracle>, config: GateConfig) -> Self {
        let backoff = ExponentialBackoff::new(config.retry_initial, config.poll_interval);
        let next_poll = config.poll_interval;
        Self {
            oracle,
            config,
            state: Mutex::new(GateState {
                latest: None,
                refreshes: 0,
                last_refresh: None,
                backoff,
                next_poll,
            }),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Query the oracle. Never fails: an oracle error yields an optimistic
    /// `can_send` status carrying the error.
    pub async fn check_eligibility(&self, sender: &str) -> EligibilityStatus {
        self.refresh(sender).await.status
    }

    /// Like [`check_eligibility`](Self::check_eligibility), also returning
    /// the refresh sequence number.
    pub async fn refresh(&self, sender: &str) -> GateReading {
        let result = self.oracle.check(sender).await;

        let mut state = self.state.lock().unwrap();
        state.refreshes += 1;
        let status = match result {
            Ok(status) => {
                debug!(
                    sender,
                    can_send = status.can_send,
                    current_block = ?status.current_block,
                    last_block = ?status.last_block,
                    "Eligibility refreshed"
                );
                state.last_refresh = Some(Instant::now());
                state.backoff.reset();
                state.next_poll = self.config.poll_interval;
                status
            }
            Err(e) => {
                warn!(sender, error = %e, "Eligibility unknown, proceeding optimistically");
                state.next_poll = state.backoff.next_delay().min(self.config.poll_interval);
                EligibilityStatus::optimistic(e.to_string())
            }
        };

        let reading = GateReading {
            seq: state.refreshes,
            status,
        };
        state.latest = Some(reading.clone());
        reading
    }

    /// Last status obtained, if any
    pub fn latest(&self) -> Option<EligibilityStatus> {
        self.latest_reading().map(|r| r.status)
    }

    pub fn latest_reading(&self) -> Option<GateReading> {
        self.state.lock().unwrap().latest.clone()
    }

    /// Delay before the poll loop should refresh again: the full interval
    /// after a success, an exponential backoff after failures.
    pub fn next_poll_delay(&self) -> Duration {
        self.state.lock().unwrap().next_poll
    }

    pub fn countdown(&self) -> Duration {
        self.countdown_at(Instant::now())
    }

    /// Time left until the next scheduled refresh. Resets to the full
    /// interval on every successful refresh; zero before the first one.
    pub fn countdown_at(&self, now: Instant) -> Duration {
        let state = self.state.lock().unwrap();
        match state.last_refresh {
            Some(at) => self
                .config
                .poll_interval
                .saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }
}
