//! Error types used by the retry core, handlers and broker adapters.
//!
//! The retry signal itself is modelled as two small types:
//!
//! - [`Backoff`]: raised by a handler to ask for a later redelivery.
//! - [`Expired`]: raised by the policy once the retry budget is spent; it keeps
//!   the triggering [`Backoff`] as its [`source`](std::error::Error::source).
//!
//! Around them sit the enums that flow through the crate:
//!
//! - [`HandlerError`]: outcome of a failed handler invocation.
//! - [`RetryError`]: failure of [`RetryPublisher::schedule_retry`](crate::RetryPublisher::schedule_retry).
//! - [`BrokerError`]: failures reported by the broker client.
//! - [`PolicyError`]: invalid retry configuration.
//!
//! Enums provide `as_label` helpers for logs/metrics.

use thiserror::Error;

/// # Request for a deferred redelivery.
///
/// Returned by handlers (wrapped in [`HandlerError::Backoff`]) when a failure is
/// transient and the message should come back later.
///
/// # Example
/// ```
/// use backoffq::{Backoff, HandlerError};
///
/// let err: HandlerError = Backoff::new("upstream returned 503").into();
/// assert!(err.is_backoff());
/// assert_eq!(err.to_string(), "backoff requested: upstream returned 503");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("backoff requested: {reason}")]
pub struct Backoff {
    /// Why the handler asked for a retry.
    pub reason: String,
}

impl Backoff {
    /// Creates a new retry request with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// # Retry budget exhausted.
///
/// Produced by [`RetryPolicy::next_delay`](crate::RetryPolicy::next_delay) when the
/// message has already been redelivered `limit` times through the delay exchange.
/// The original [`Backoff`] is kept as the error source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Backoff aborted after '{limit}' retries (~{approx_secs} seconds)")]
pub struct Expired {
    /// Configured retry limit.
    pub limit: u32,
    /// Sum of the first `limit` scheduled delays, rounded to whole seconds.
    pub approx_secs: u64,
    /// The failure that triggered the final retry request.
    #[source]
    pub cause: Backoff,
}

impl Expired {
    /// Returns the original retry request.
    pub fn cause(&self) -> &Backoff {
        &self.cause
    }

    /// Consumes the error and returns the original retry request.
    pub fn into_cause(self) -> Backoff {
        self.cause
    }
}

/// # Errors produced by message handlers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Transient failure; redeliver the message later.
    #[error(transparent)]
    Backoff(#[from] Backoff),

    /// Failure that should not be retried.
    #[error("handler failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },
}

impl HandlerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Backoff(_) => "handler_backoff",
            HandlerError::Fail { .. } => "handler_failed",
        }
    }

    /// Indicates whether the handler asked for a deferred retry.
    pub fn is_backoff(&self) -> bool {
        matches!(self, HandlerError::Backoff(_))
    }
}

/// # Errors reported by the broker client.
///
/// None of these are handled by the retry core; they propagate to the caller.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// No channel could be acquired.
    #[error("broker connection unavailable: {reason}")]
    Connection {
        /// Details from the client.
        reason: String,
    },

    /// Exchange or queue declaration was rejected.
    #[error("declare of '{name}' failed: {reason}")]
    Declare {
        /// Exchange or queue name.
        name: String,
        /// Details from the broker.
        reason: String,
    },

    /// Publish was rejected.
    #[error("publish to exchange '{exchange}' failed: {reason}")]
    Publish {
        /// Target exchange (`""` for the default exchange).
        exchange: String,
        /// Details from the broker.
        reason: String,
    },

    /// Ack or nack could not be delivered.
    #[error("acknowledgement of delivery {delivery_tag} failed: {reason}")]
    Ack {
        /// Delivery tag being acknowledged.
        delivery_tag: u64,
        /// Details from the broker.
        reason: String,
    },
}

impl BrokerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::Connection { .. } => "broker_connection",
            BrokerError::Declare { .. } => "broker_declare",
            BrokerError::Publish { .. } => "broker_publish",
            BrokerError::Ack { .. } => "broker_ack",
        }
    }
}

/// # Errors returned while scheduling a redelivery.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Retry budget exhausted; the caller should fail the message terminally.
    #[error(transparent)]
    Expired(#[from] Expired),

    /// The broker rejected part of the publish round-trip.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl RetryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use backoffq::{BrokerError, RetryError};
    ///
    /// let err: RetryError = BrokerError::Connection { reason: "refused".into() }.into();
    /// assert_eq!(err.as_label(), "broker_connection");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RetryError::Expired(_) => "retry_expired",
            RetryError::Broker(e) => e.as_label(),
        }
    }
}

/// # Invalid retry configuration.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The schedule has no entries.
    #[error("backoff schedule must not be empty")]
    EmptySchedule,

    /// A schedule entry is zero.
    #[error("backoff schedule entry {index} must be a positive delay")]
    ZeroDelay {
        /// Position of the offending entry.
        index: usize,
    },
}

impl PolicyError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PolicyError::EmptySchedule => "policy_empty_schedule",
            PolicyError::ZeroDelay { .. } => "policy_zero_delay",
        }
    }
}
