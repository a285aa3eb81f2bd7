//! # Broker client seam.
//!
//! The retry core never owns connections. It talks to the broker through:
//! - [`ChannelPool`]: shared pool, acquired per publish and released on drop;
//! - [`Channel`]: idempotent declarations and publish;
//! - [`Acker`] + [`Delivery`]: acknowledgement of consumed messages.
//!
//! [`Delivery::ack`] and [`Delivery::nack`] consume the delivery, so a message
//! cannot be acknowledged twice.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::topology::{ExchangeSpec, QueueSpec};
use crate::error::BrokerError;
use crate::message::{Message, Properties};

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    /// Target exchange (`""` = default exchange).
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: Properties,
}

/// One broker channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declares an exchange; repeating an identical declaration is a no-op.
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError>;

    /// Declares a queue and its binding; repeating an identical declaration is a no-op.
    async fn declare_queue(&self, queue: &QueueSpec) -> Result<(), BrokerError>;

    /// Publishes one message.
    async fn publish(&self, publication: Publication) -> Result<(), BrokerError>;
}

/// Shared pool of broker channels.
///
/// `acquire` may wait for a free channel; any bound on that wait belongs to
/// the pool implementation.
#[async_trait]
pub trait ChannelPool: Send + Sync + 'static {
    async fn acquire(&self) -> Result<Box<dyn Channel>, BrokerError>;
}

/// Acknowledges consumed messages by delivery tag.
#[async_trait]
pub trait Acker: Send + Sync + 'static {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Negative acknowledgement; with `requeue` the broker redelivers the message.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;
}

/// A consumed message together with its acknowledgement handle.
pub struct Delivery {
    pub delivery_tag: u64,
    pub message: Message,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, message: Message, acker: Arc<dyn Acker>) -> Self {
        Self {
            delivery_tag,
            message,
            acker,
        }
    }

    /// Acknowledges the delivery.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack(self.delivery_tag).await
    }

    /// Rejects the delivery, optionally asking the broker to requeue it.
    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(self.delivery_tag, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
