//! # RetryPublisher: schedules a redelivery through the delay exchange.
//!
//! Given a failed message, its retry request and the queue it came from, the
//! publisher asks the [`RetryPolicy`] for the next delay and republishes an
//! equivalent message to the delay exchange:
//!
//! ```text
//! schedule_retry(message, failure, policy, target)
//!   ├─► policy.next_delay(message.death_history(), "backoff", failure)
//!   │       └─ Expired ──► RetryError::Expired (nothing published)
//!   ├─► pool.acquire()
//!   ├─► declare delay exchange + zero-capacity queue (idempotent)
//!   └─► publish(exchange="backoff", routing_key=target,
//!               body=message.body, properties=message.properties + x-delay)
//! ```
//!
//! ## Rules
//! - Exactly one publish per successful call.
//! - Nothing is stored: the next evaluation reads the broker-incremented `x-death` count.
//! - The channel is held for one call only.
//! - Broker failures are returned as [`RetryError::Broker`], never retried here.

use std::sync::Arc;

use tracing::debug;

use crate::broker::{ChannelPool, DelayTopology, Publication};
use crate::error::{Backoff, RetryError};
use crate::message::{Message, X_DELAY, attempt_count};
use crate::policies::RetryPolicy;

/// Outcome of a successfully scheduled redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    /// Delay handed to the delay exchange, in milliseconds.
    pub delay_ms: i64,
    /// Previous redeliveries through the delay exchange (0 on the first retry).
    pub attempt: u64,
}

/// Republishes failed messages into the delay mechanism.
#[derive(Clone)]
pub struct RetryPublisher {
    pool: Arc<dyn ChannelPool>,
    topology: DelayTopology,
}

impl RetryPublisher {
    /// Creates a publisher over the shared pool with the default `backoff` topology.
    pub fn new(pool: Arc<dyn ChannelPool>) -> Self {
        Self {
            pool,
            topology: DelayTopology::default(),
        }
    }

    /// Returns the publisher with a different delay topology.
    pub fn with_topology(mut self, topology: DelayTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Name of the delay exchange (also the `x-death` entry counted by the policy).
    pub fn exchange_name(&self) -> &str {
        self.topology.exchange_name()
    }

    pub fn topology(&self) -> &DelayTopology {
        &self.topology
    }

    /// Schedules redelivery of `message` to `target` after the policy's next delay.
    ///
    /// Returns [`RetryError::Expired`] without touching the broker when the retry
    /// budget is spent; the caller should then fail the message with `failure`.
    pub async fn schedule_retry(
        &self,
        message: &Message,
        failure: &Backoff,
        policy: &RetryPolicy,
        target: &str,
    ) -> Result<Scheduled, RetryError> {
        let history = message.death_history();
        let exchange = self.topology.exchange_name();
        let delay_ms = policy.next_delay(&history, exchange, failure)?;
        let attempt = attempt_count(&history, exchange);

        let channel = self.pool.acquire().await?;
        channel.declare_exchange(self.topology.exchange()).await?;
        channel.declare_queue(self.topology.queue()).await?;

        channel
            .publish(Publication {
                exchange: exchange.to_owned(),
                routing_key: target.to_owned(),
                body: message.body.clone(),
                properties: message.properties.with_header(X_DELAY, delay_ms),
            })
            .await?;

        debug!(queue = %target, delay_ms, attempt, "redelivery scheduled");
        Ok(Scheduled { delay_ms, attempt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Channel, MemoryBroker, QueueSpec};
    use crate::error::BrokerError;
    use crate::message::{DeathRecord, HeaderValue, Headers, X_DEATH};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(vec![1000, 2000, 3000], 0, 10).unwrap()
    }

    fn message_with_count(count: u64) -> Message {
        let mut message = Message::new(b"order #7".to_vec()).with_header("tenant", "acme");
        message.properties.content_type = Some("application/json".into());
        message.properties.correlation_id = Some("corr-1".into());
        message.routing_key = "orders".into();
        if count > 0 {
            message = message.with_header(
                X_DEATH,
                HeaderValue::List(vec![DeathRecord::new("backoff", count).to_table()]),
            );
        }
        message
    }

    #[tokio::test]
    async fn publishes_copy_with_delay_header() {
        let broker = MemoryBroker::new();
        let publisher = RetryPublisher::new(Arc::new(broker.clone()));
        let message = message_with_count(1);

        let scheduled = publisher
            .schedule_retry(&message, &Backoff::new("busy"), &policy(), "orders")
            .await
            .unwrap();
        assert_eq!(scheduled, Scheduled { delay_ms: 2000, attempt: 1 });

        let published = broker.published();
        assert_eq!(published.len(), 1);
        let publication = &published[0];
        assert_eq!(publication.exchange, "backoff");
        assert_eq!(publication.routing_key, "orders");
        assert_eq!(publication.body, message.body);
        assert_eq!(publication.properties.content_type, message.properties.content_type);
        assert_eq!(publication.properties.correlation_id, message.properties.correlation_id);

        let mut expected: Headers = message.properties.headers.clone();
        expected.insert(X_DELAY.into(), HeaderValue::Int(2000));
        assert_eq!(publication.properties.headers, expected);
        // the original is left untouched
        assert!(!message.headers().contains_key(X_DELAY));
    }

    #[tokio::test]
    async fn declares_topology_every_time() {
        let broker = MemoryBroker::new();
        let publisher = RetryPublisher::new(Arc::new(broker.clone()));
        let message = message_with_count(0);

        for _ in 0..2 {
            publisher
                .schedule_retry(&message, &Backoff::new("busy"), &policy(), "orders")
                .await
                .unwrap();
        }
        assert_eq!(broker.declarations(), 4);
        assert_eq!(broker.exchange("backoff").as_ref(), Some(publisher.topology().exchange()));
        assert_eq!(broker.queue("backoff").as_ref(), Some(publisher.topology().queue()));
        assert_eq!(broker.published().len(), 2);
    }

    #[tokio::test]
    async fn expired_skips_the_broker() {
        let broker = MemoryBroker::new();
        broker.set_offline(true);
        let publisher = RetryPublisher::new(Arc::new(broker.clone()));

        let err = publisher
            .schedule_retry(&message_with_count(10), &Backoff::new("busy"), &policy(), "orders")
            .await
            .unwrap_err();
        let expired = match err {
            RetryError::Expired(expired) => expired,
            other => panic!("expected expiry, got {other:?}"),
        };
        assert_eq!(expired.cause(), &Backoff::new("busy"));
        assert_eq!(broker.declarations(), 0);
    }

    #[tokio::test]
    async fn broker_failures_propagate() {
        let broker = MemoryBroker::new();
        broker.set_offline(true);
        let publisher = RetryPublisher::new(Arc::new(broker.clone()));

        let err = publisher
            .schedule_retry(&message_with_count(0), &Backoff::new("busy"), &policy(), "orders")
            .await
            .unwrap_err();
        assert!(matches!(err, RetryError::Broker(BrokerError::Connection { .. })));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn custom_topology_counts_its_own_exchange() {
        let broker = MemoryBroker::new();
        broker.declare_queue(&QueueSpec::new("orders")).await.unwrap();
        let publisher = RetryPublisher::new(Arc::new(broker.clone()))
            .with_topology(DelayTopology::new("retry-later"));

        // an entry from the default "backoff" exchange is foreign here
        let scheduled = publisher
            .schedule_retry(&message_with_count(2), &Backoff::new("busy"), &policy(), "orders")
            .await
            .unwrap();
        assert_eq!(scheduled, Scheduled { delay_ms: 1000, attempt: 0 });
        assert_eq!(broker.published()[0].exchange, "retry-later");
    }
}
