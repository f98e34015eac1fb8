//! Exponential backoff with jitter, and the restart policy built on it.

use std::time::Duration;
use rand::Rng;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Jitter: 0 to 10% of the delay
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// How the supervisor paces relistening a server that keeps exiting.
///
/// The first exit after a stable run is relistened immediately; each
/// further quick exit doubles the delay, up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub base: Duration,
    pub max: Duration,
    /// A serve attempt lasting at least this long resets the attempt count.
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(10),
            max: Duration::from_secs(1),
            stable_after: Duration::from_secs(5),
        }
    }
}

impl RestartPolicy {
    /// Delay before relistening after `attempt` consecutive quick exits.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, millis(self.base), millis(self.max))
    }

    /// Pace the relisten after a run that lasted `ran_for`, following
    /// `quick_exits` consecutive short runs. Returns the delay and the
    /// updated quick-exit count.
    pub fn on_exit(&self, quick_exits: u32, ran_for: Duration) -> (Duration, u32) {
        let quick_exits = if ran_for >= self.stable_after { 0 } else { quick_exits };
        (self.delay(quick_exits), quick_exits.saturating_add(1))
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
