//! # Retry configuration.
//!
//! Provides [`RetryConfig`], the serializable settings a consumer is built from.
//!
//! Config is used in two ways:
//! 1. **Policy creation**: [`RetryConfig::policy`] validates the schedule into a [`RetryPolicy`]
//! 2. **Topology**: [`RetryConfig::topology`] names the delay exchange and queue
//!
//! ## Sentinel values
//! - `limit = 0` → unlimited retries
//! - `jitter_stddev_ms = 0` → no jitter
//!
//! # Example
//! ```
//! use backoffq::RetryConfig;
//!
//! let cfg: RetryConfig = serde_json::from_str(r#"{ "schedule": [500, 1500], "limit": 4 }"#).unwrap();
//! assert_eq!(cfg.retry_limit(), Some(4));
//! assert_eq!(cfg.delay_exchange, "backoff");
//!
//! let policy = cfg.policy().unwrap();
//! assert_eq!(policy.max_delay(), 500 + 1500 * 3);
//! ```

use serde::{Deserialize, Serialize};

use crate::broker::{DEFAULT_DELAY_EXCHANGE, DelayTopology};
use crate::error::PolicyError;
use crate::events::DEFAULT_BUS_CAPACITY;
use crate::policies::{DEFAULT_JITTER_STDDEV, DEFAULT_LIMIT, DEFAULT_SCHEDULE, RetryPolicy};

/// Retry settings for a consumer.
///
/// ## Field semantics
/// - `schedule`: delays in milliseconds; past the end the last entry repeats
/// - `jitter_stddev_ms`: standard deviation of the gaussian jitter (`0` = off)
/// - `limit`: redeliveries before giving up (`0` = unlimited)
/// - `delay_exchange`: name of the delay exchange and its parking queue
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
///
/// Missing fields take their defaults when deserializing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub schedule: Vec<u64>,
    pub jitter_stddev_ms: u64,
    pub limit: u32,
    pub delay_exchange: String,
    pub bus_capacity: usize,
}

impl RetryConfig {
    /// Returns the retry limit as an `Option`.
    ///
    /// - `None` → unlimited
    /// - `Some(n)` → give up after `n` redeliveries
    #[inline]
    pub fn retry_limit(&self) -> Option<u32> {
        if self.limit == 0 { None } else { Some(self.limit) }
    }

    /// Returns the jitter standard deviation as an `Option`.
    #[inline]
    pub fn jitter(&self) -> Option<u64> {
        if self.jitter_stddev_ms == 0 {
            None
        } else {
            Some(self.jitter_stddev_ms)
        }
    }

    /// Builds the validated retry policy.
    pub fn policy(&self) -> Result<RetryPolicy, PolicyError> {
        RetryPolicy::new(self.schedule.clone(), self.jitter_stddev_ms, self.limit)
    }

    /// Builds the delay topology for `delay_exchange`.
    pub fn topology(&self) -> DelayTopology {
        DelayTopology::new(&self.delay_exchange)
    }
}

impl Default for RetryConfig {
    /// Default configuration:
    ///
    /// - `schedule = 1s, 2s, 3s, 5s, 8s, 13s, 21s, 34s, 55s`
    /// - `jitter_stddev_ms = 100`
    /// - `limit = 20`
    /// - `delay_exchange = "backoff"`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            schedule: DEFAULT_SCHEDULE.to_vec(),
            jitter_stddev_ms: DEFAULT_JITTER_STDDEV,
            limit: DEFAULT_LIMIT,
            delay_exchange: DEFAULT_DELAY_EXCHANGE.to_owned(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_defaults() {
        let cfg = RetryConfig::default();
        let policy = cfg.policy().unwrap();
        let default = RetryPolicy::default();

        assert_eq!(policy.schedule(), default.schedule());
        assert_eq!(policy.jitter_stddev(), default.jitter_stddev());
        assert_eq!(policy.limit(), default.limit());
        assert_eq!(cfg.topology().exchange_name(), "backoff");
        assert_eq!(cfg.bus_capacity, DEFAULT_BUS_CAPACITY);
    }

    #[test]
    fn sentinels() {
        let cfg = RetryConfig {
            limit: 0,
            jitter_stddev_ms: 0,
            ..RetryConfig::default()
        };
        assert_eq!(cfg.retry_limit(), None);
        assert_eq!(cfg.jitter(), None);
        assert_eq!(RetryConfig::default().jitter(), Some(100));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: RetryConfig =
            serde_json::from_str(r#"{ "delay_exchange": "retry-later", "jitter_stddev_ms": 0 }"#)
                .unwrap();
        assert_eq!(cfg.schedule, DEFAULT_SCHEDULE.to_vec());
        assert_eq!(cfg.limit, 20);
        assert_eq!(cfg.topology().exchange_name(), "retry-later");
        assert_eq!(cfg.topology().queue().name, "retry-later");
    }

    #[test]
    fn invalid_schedule_is_rejected() {
        let empty = RetryConfig {
            schedule: Vec::new(),
            ..RetryConfig::default()
        };
        assert_eq!(empty.policy().unwrap_err(), PolicyError::EmptySchedule);

        let zero: RetryConfig = serde_json::from_str(r#"{ "schedule": [1000, 0] }"#).unwrap();
        assert_eq!(zero.policy().unwrap_err(), PolicyError::ZeroDelay { index: 1 });
    }
}
