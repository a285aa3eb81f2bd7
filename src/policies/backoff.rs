//! # Backoff schedule for deferred redelivery.
//!
//! [`RetryPolicy`] maps a message's attempt count to the delay before its next
//! redelivery. It is parameterized by:
//! - [`RetryPolicy::schedule`] ordered delays in milliseconds, the last one repeats;
//! - [`RetryPolicy::jitter_stddev`] standard deviation of the normal jitter (`0` = off);
//! - [`RetryPolicy::limit`] maximum redeliveries (`0` = unlimited).
//!
//! The attempt count is never stored; it comes from the message's own `x-death`
//! history on every evaluation, so the policy is stateless and survives process
//! restarts and redelivery to a different consumer.
//!
//! # Example
//! ```rust
//! use backoffq::{Backoff, DeathRecord, RetryPolicy};
//!
//! let policy = RetryPolicy::new(vec![1000, 2000, 3000], 0, 10).unwrap();
//! let cause = Backoff::new("busy");
//!
//! assert_eq!(policy.next_delay(&[], "backoff", &cause), Ok(1000));
//!
//! let history = [DeathRecord::new("backoff", 5)];
//! assert_eq!(policy.next_delay(&history, "backoff", &cause), Ok(3000));
//!
//! let history = [DeathRecord::new("backoff", 10)];
//! let err = policy.next_delay(&history, "backoff", &cause).unwrap_err();
//! assert_eq!(err.to_string(), "Backoff aborted after '10' retries (~27 seconds)");
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{Backoff, Expired, PolicyError};
use crate::message::{DeathRecord, attempt_count};
use crate::policies::jitter::{GaussianJitter, JitterSource};

/// Default delays in milliseconds.
pub const DEFAULT_SCHEDULE: [u64; 9] = [1000, 2000, 3000, 5000, 8000, 13000, 21000, 34000, 55000];

/// Default jitter standard deviation in milliseconds.
pub const DEFAULT_JITTER_STDDEV: u64 = 100;

/// Default retry limit.
pub const DEFAULT_LIMIT: u32 = 20;

/// Retry backoff policy.
///
/// Immutable once built; cheap to clone (the schedule and jitter source are shared).
#[derive(Clone)]
pub struct RetryPolicy {
    schedule: Arc<[u64]>,
    jitter_stddev: u64,
    limit: u32,
    jitter: Arc<dyn JitterSource>,
}

impl Default for RetryPolicy {
    /// Returns a policy with:
    /// - `schedule = 1s, 2s, 3s, 5s, 8s, 13s, 21s, 34s, 55s`;
    /// - `jitter_stddev = 100ms`;
    /// - `limit = 20`.
    fn default() -> Self {
        Self {
            schedule: Arc::from(DEFAULT_SCHEDULE.as_slice()),
            jitter_stddev: DEFAULT_JITTER_STDDEV,
            limit: DEFAULT_LIMIT,
            jitter: Arc::new(GaussianJitter),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("schedule", &self.schedule)
            .field("jitter_stddev", &self.jitter_stddev)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Builds a policy, rejecting an empty schedule or a zero delay.
    pub fn new(
        schedule: impl Into<Vec<u64>>,
        jitter_stddev: u64,
        limit: u32,
    ) -> Result<Self, PolicyError> {
        let schedule = schedule.into();
        if schedule.is_empty() {
            return Err(PolicyError::EmptySchedule);
        }
        if let Some(index) = schedule.iter().position(|&d| d == 0) {
            return Err(PolicyError::ZeroDelay { index });
        }
        Ok(Self {
            schedule: Arc::from(schedule),
            jitter_stddev,
            limit,
            jitter: Arc::new(GaussianJitter),
        })
    }

    /// Returns the policy with a different randomness source.
    pub fn with_jitter_source(mut self, source: Arc<dyn JitterSource>) -> Self {
        self.jitter = source;
        self
    }

    /// Configured delays in milliseconds.
    pub fn schedule(&self) -> &[u64] {
        &self.schedule
    }

    /// Jitter standard deviation in milliseconds (`0` = off).
    pub fn jitter_stddev(&self) -> u64 {
        self.jitter_stddev
    }

    /// Retry limit (`0` = unlimited).
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Delay for the given 0-based attempt; past the end the last entry repeats.
    pub fn schedule_item(&self, index: u64) -> u64 {
        let last = self.schedule[self.schedule.len() - 1];
        usize::try_from(index)
            .ok()
            .and_then(|i| self.schedule.get(i).copied())
            .unwrap_or(last)
    }

    /// Sum of the first `limit` scheduled delays in milliseconds, jitter excluded.
    ///
    /// With `limit = 0` this is `0`.
    pub fn max_delay(&self) -> u64 {
        let limit = self.limit as usize;
        let listed = limit.min(self.schedule.len());
        let head: u64 = self.schedule[..listed].iter().fold(0, |acc, d| acc.saturating_add(*d));
        let repeats = (limit - listed) as u64;
        head.saturating_add(repeats.saturating_mul(self.schedule_item(u64::MAX)))
    }

    /// Computes the delay before the next redelivery.
    ///
    /// The attempt count is the `count` of the first `history` entry written by
    /// `delay_exchange` (0 if none). Once it reaches a non-zero limit, returns
    /// [`Expired`] holding `cause`.
    ///
    /// With jitter enabled, the delay is a normal sample around the scheduled
    /// value, truncated toward zero. It is not clamped: a stddev comparable to
    /// the scheduled delay can yield a zero or negative value, which the delay
    /// exchange treats as "deliver now".
    pub fn next_delay(
        &self,
        history: &[DeathRecord],
        delay_exchange: &str,
        cause: &Backoff,
    ) -> Result<i64, Expired> {
        let attempts = attempt_count(history, delay_exchange);

        if self.limit > 0 && attempts >= u64::from(self.limit) {
            return Err(Expired {
                limit: self.limit,
                approx_secs: (self.max_delay() as f64 / 1000.0).round() as u64,
                cause: cause.clone(),
            });
        }

        let base = self.schedule_item(attempts);
        if self.jitter_stddev == 0 {
            return Ok(i64::try_from(base).unwrap_or(i64::MAX));
        }
        let sample = self.jitter.gauss(base as f64, self.jitter_stddev as f64);
        Ok(sample.trunc() as i64)
    }
}
