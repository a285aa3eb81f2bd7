//! # LogWriter: events to `tracing`
//!
//! A subscriber that forwards every [`Event`] to `tracing` as a structured record.
//! Install any `tracing` subscriber (e.g. `tracing_subscriber::fmt`) to see them.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  backoffq::log: consumer started queue="orders" handler="charge"
//! WARN  backoffq::log: retry scheduled queue="orders" attempt=0 delay_ms=1000 reason="backoff requested: busy"
//! ERROR backoffq::log: retries exhausted queue="orders" limit=10 reason="Backoff aborted after '10' retries (~27 seconds)"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let queue = e.queue.as_deref().unwrap_or("-");
        let handler = e.handler.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::ConsumerStarted => {
                info!(target: "backoffq::log", queue, handler, "consumer started");
            }
            EventKind::ConsumerStopped => {
                info!(target: "backoffq::log", queue, handler, "consumer stopped");
            }
            EventKind::HandlerCompleted => {
                debug!(target: "backoffq::log", queue, handler, call_id = ?e.call_id, "handled");
            }
            EventKind::RetryScheduled => {
                warn!(
                    target: "backoffq::log",
                    queue,
                    attempt = ?e.attempt,
                    delay_ms = ?e.delay_ms,
                    reason,
                    "retry scheduled"
                );
            }
            EventKind::RetryExhausted => {
                error!(target: "backoffq::log", queue, limit = ?e.limit, reason, "retries exhausted");
            }
            EventKind::HandlerFailed => {
                error!(target: "backoffq::log", queue, handler, reason, "handler failed");
            }
            EventKind::PublishFailed => {
                error!(target: "backoffq::log", queue, reason, "redelivery publish failed");
            }
            EventKind::AckFailed => {
                error!(target: "backoffq::log", queue, call_id = ?e.call_id, reason, "ack failed");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "backoffq::log", subscriber = handler, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                error!(target: "backoffq::log", subscriber = handler, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
