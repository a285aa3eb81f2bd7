//! # Runtime events emitted by consumers.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Lifecycle events**: consumer start/stop
//! - **Handling events**: one per processed delivery (completed, retry scheduled,
//!   exhausted, failed, publish or ack failure)
//! - **Subscriber events**: overflow and panics inside subscribers
//!
//! The [`Event`] struct carries additional metadata such as timestamps, queue
//! name, reasons, delays and attempt counts.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use backoffq::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RetryScheduled)
//!     .with_queue("orders")
//!     .with_reason("backoff requested: busy")
//!     .with_attempt(3)
//!     .with_delay_ms(5000);
//!
//! assert_eq!(ev.kind, EventKind::RetryScheduled);
//! assert_eq!(ev.queue.as_deref(), Some("orders"));
//! assert_eq!(ev.delay_ms, Some(5000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `handler`: subscriber name
    /// - `reason`: panic info
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `handler`: subscriber name
    /// - `reason`: `"full"` or `"closed"`
    SubscriberOverflow,

    // === Consumer lifecycle ===
    /// Consumer started pulling deliveries.
    ///
    /// Sets: `queue`, `handler`
    ConsumerStarted,

    /// Consumer stopped (cancelled or delivery stream closed).
    ///
    /// Sets: `queue`, `handler`
    ConsumerStopped,

    // === Handling ===
    /// Handler succeeded; delivery acknowledged.
    ///
    /// Sets: `queue`, `handler`, `call_id`
    HandlerCompleted,

    /// Handler asked for a retry and the redelivery was published.
    ///
    /// Sets:
    /// - `queue`, `handler`, `call_id`
    /// - `attempt`: previous redeliveries through the delay exchange
    /// - `delay_ms`: scheduled delay
    /// - `reason`: the retry request
    RetryScheduled,

    /// Retry budget exhausted; the message failed with its original error.
    ///
    /// Sets:
    /// - `queue`, `handler`, `call_id`
    /// - `limit`: configured retry limit
    /// - `reason`: the expiry message
    RetryExhausted,

    /// Handler failed with a non-retryable error.
    ///
    /// Sets: `queue`, `handler`, `call_id`, `reason`
    HandlerFailed,

    /// Scheduling the redelivery failed at the broker; delivery was nacked with requeue.
    ///
    /// Sets: `queue`, `handler`, `call_id`, `reason`
    PublishFailed,

    /// Acknowledging a processed delivery failed; the broker may redeliver it.
    ///
    /// Sets: `queue`, `handler`, `call_id`, `reason`
    AckFailed,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Queue the consumer reads from.
    pub queue: Option<Arc<str>>,
    /// Handler (or subscriber) name.
    pub handler: Option<Arc<str>>,
    /// Call id of the worker that handled the delivery.
    pub call_id: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Previous redeliveries through the delay exchange.
    pub attempt: Option<u64>,
    /// Scheduled redelivery delay in milliseconds (may be negative under heavy jitter).
    pub delay_ms: Option<i64>,
    /// Retry limit that was hit.
    pub limit: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            queue: None,
            handler: None,
            call_id: None,
            reason: None,
            attempt: None,
            delay_ms: None,
            limit: None,
        }
    }

    #[inline]
    pub fn with_queue(mut self, queue: impl Into<Arc<str>>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    #[inline]
    pub fn with_handler(mut self, handler: impl Into<Arc<str>>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    #[inline]
    pub fn with_call_id(mut self, call_id: impl Into<Arc<str>>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_attempt(mut self, attempt: u64) -> Self {
        self.attempt = Some(attempt);
        self
    }

    #[inline]
    pub fn with_delay_ms(mut self, delay_ms: i64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    #[inline]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_handler(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_handler(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
