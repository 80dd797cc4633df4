use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Observation {
    members: BTreeSet<String>,
    changed_at: Instant,
}

/// Debounces settlement: the payable set must stay unchanged for a quiet
/// period before it is considered settled enough to pay.
#[derive(Debug)]
pub struct StabilityDetector {
    quiet_period: Duration,
    last: Mutex<Option<Observation>>,
}

impl Default for StabilityDetector {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD)
    }
}

impl StabilityDetector {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            last: Mutex::new(None),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    pub fn observe<I, S>(&self, members: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.observe_at(members, Instant::now())
    }

    /// Record the current set. Returns whether it differs from the previous
    /// observation, in which case the quiet-period timer restarts.
    pub fn observe_at<I, S>(&self, members: I, now: Instant) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: BTreeSet<String> = members.into_iter().map(Into::into).collect();
        let mut last = self.last.lock().unwrap();

        match last.as_ref() {
            Some(prev) if prev.members == members => false,
            _ => {
                *last = Some(Observation {
                    members,
                    changed_at: now,
                });
                true
            }
        }
    }

    pub fn is_stable(&self) -> bool {
        self.is_stable_at(Instant::now())
    }

    /// Never observed means not stable
    pub fn is_stable_at(&self, now: Instant) -> bool {
        self.last
            .lock()
            .unwrap()
            .as_ref()
            .map(|obs| now.saturating_duration_since(obs.changed_at) >= self.quiet_period)
            .unwrap_or(false)
    }

    pub fn reset(&self) {
        *self.last.lock().unwrap() = None;
    }
}
