//! Retry policies.
//!
//! This module groups the knobs that control **how long** a failed message waits
//! before it is redelivered and **when** it stops being retried.
//!
//! ## Contents
//! - [`RetryPolicy`] schedule / jitter / limit, and the `next_delay` computation
//! - [`JitterSource`] injectable randomness ([`GaussianJitter`], [`FixedJitter`])
//!
//! ## Quick wiring
//! ```text
//! RetryConsumer { policy: RetryPolicy, publisher: RetryPublisher }
//!      └─► RetryPublisher::schedule_retry(message, failure, policy, target)
//!           └─► policy.next_delay(message.death_history(), delay_exchange, failure)
//! ```
//!
//! ## Defaults
//! - `schedule = 1000, 2000, 3000, 5000, 8000, 13000, 21000, 34000, 55000` ms
//! - `jitter_stddev = 100` ms
//! - `limit = 20`

mod backoff;
mod jitter;

pub use backoff::{DEFAULT_JITTER_STDDEV, DEFAULT_LIMIT, DEFAULT_SCHEDULE, RetryPolicy};
pub use jitter::{FixedJitter, GaussianJitter, JitterSource};
