//! Reconnect backoff policy
//!
//! Exponential backoff for bridge reconnection: 1 s doubling to a 60 s
//! cap, jittered ±20 % so a fleet of sidecars does not reconnect in
//! lockstep, and a hard cap of consecutive failures after which the
//! bridge pauses instead of retrying.

use std::time::Duration;

use rand::Rng;

/// Backoff configuration for bridge reconnection
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial: Duration,
    /// Upper bound on any single delay (before jitter)
    pub max: Duration,
    /// Jitter fraction; 0.2 means each delay is scaled by a uniform
    /// factor in `[0.8, 1.2]`
    pub jitter: f64,
    /// Consecutive failures before the bridge pauses
    pub max_failures: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: 0.2,
            max_failures: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial
            .as_millis()
            .saturating_mul(1u128 << attempt.saturating_sub(1).min(32))
            .min(self.max.as_millis()) as u64;

        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        Duration::from_millis((base as f64 * factor) as u64)
    }

    /// Whether `failures` consecutive failures exhaust the retry budget
    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_failures
    }
}
