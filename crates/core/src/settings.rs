use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Floor for the pause between attempts; a zero interval would spin against the store.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Budget for a retry or poll loop.
///
/// Both shapes sleep `interval` (at least [`MIN_RETRY_INTERVAL`]) between attempts. The first
/// attempt always runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// Stop after `max` attempts.
    Attempts { max: u32, interval: Duration },
    /// Stop once another sleep would run past `timeout` from the first attempt.
    Deadline { timeout: Duration, interval: Duration },
}

impl RetryPolicy {
    pub fn attempts(max: u32, interval: Duration) -> Self {
        RetryPolicy::Attempts { max, interval }
    }

    pub fn deadline(timeout: Duration, interval: Duration) -> Self {
        RetryPolicy::Deadline { timeout, interval }
    }

    pub fn interval(&self) -> Duration {
        match self {
            RetryPolicy::Attempts { interval, .. } | RetryPolicy::Deadline { interval, .. } => (*interval).max(MIN_RETRY_INTERVAL),
        }
    }

    /// Delay before the next attempt, or `None` when the budget is spent.
    ///
    /// `attempts` counts the attempts made so far; `elapsed` is measured from the first one.
    pub fn next_delay(&self, attempts: u32, elapsed: Duration) -> Option<Duration> {
        let interval = self.interval();
        match *self {
            RetryPolicy::Attempts { max, .. } => (attempts < max).then_some(interval),
            RetryPolicy::Deadline { timeout, .. } => (elapsed.saturating_add(interval) <= timeout).then_some(interval),
        }
    }
}

/// Retry and polling knobs, threaded explicitly into each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub retry_interval: Duration,
    pub retry_timeout: Duration,
    /// Longer budget for convergence waits (replica readiness, deletion).
    pub readiness_timeout: Duration,
    pub max_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            retry_timeout: DEFAULT_RETRY_TIMEOUT,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

impl Settings {
    /// Defaults overridden by `CONVERGE_*` environment variables; unparsable values and a zero
    /// retry interval are ignored.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            retry_interval: env_u64("CONVERGE_RETRY_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(d.retry_interval),
            retry_timeout: env_u64("CONVERGE_RETRY_TIMEOUT_MS").map(Duration::from_millis).unwrap_or(d.retry_timeout),
            readiness_timeout: env_u64("CONVERGE_READINESS_TIMEOUT_SECS").map(Duration::from_secs).unwrap_or(d.readiness_timeout),
            max_attempts: env_u64("CONVERGE_MAX_ATTEMPTS")
                .map(|n| n.clamp(1, u32::MAX as u64) as u32)
                .unwrap_or(d.max_attempts),
        }
    }

    /// Count-bounded retries.
    pub fn attempts(&self) -> RetryPolicy {
        RetryPolicy::attempts(self.max_attempts, self.retry_interval)
    }

    /// Wall-clock bounded retries.
    pub fn deadline(&self) -> RetryPolicy {
        RetryPolicy::deadline(self.retry_timeout, self.retry_interval)
    }

    /// Convergence polling budget.
    pub fn readiness(&self) -> RetryPolicy {
        RetryPolicy::deadline(self.readiness_timeout, self.retry_interval)
    }
}
