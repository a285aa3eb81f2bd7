use std::sync::Arc;

use crate::{
    config::RetryConfig,
    consumer::{handler::HandlerRef, runtime::RetryConsumer},
    error::PolicyError,
    events::{Bus, DEFAULT_BUS_CAPACITY},
    policies::RetryPolicy,
    publisher::RetryPublisher,
    subscribers::Subscribe,
};

/// Builder for constructing a [`RetryConsumer`].
pub struct RetryConsumerBuilder {
    queue: String,
    handler: HandlerRef,
    publisher: RetryPublisher,
    policy: RetryPolicy,
    bus_capacity: usize,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl RetryConsumerBuilder {
    /// Creates a builder for `handler` consuming `queue`, redelivering through `publisher`.
    ///
    /// The retry policy starts as [`RetryPolicy::default`].
    pub fn new(queue: impl Into<String>, handler: HandlerRef, publisher: RetryPublisher) -> Self {
        Self {
            queue: queue.into(),
            handler,
            publisher,
            policy: RetryPolicy::default(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            subscribers: Vec::new(),
        }
    }

    /// Sets the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Applies policy, delay exchange and bus capacity from `config`.
    pub fn with_config(mut self, config: &RetryConfig) -> Result<Self, PolicyError> {
        self.policy = config.policy()?;
        self.publisher = self.publisher.with_topology(config.topology());
        self.bus_capacity = config.bus_capacity;
        Ok(self)
    }

    /// Sets the event bus capacity (minimum 1).
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive consumer events through dedicated workers with
    /// bounded queues while [`RetryConsumer::run`] is active.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    pub fn build(self) -> RetryConsumer {
        RetryConsumer {
            queue: self.queue,
            handler: self.handler,
            policy: self.policy,
            publisher: self.publisher,
            bus: Bus::new(self.bus_capacity),
            subscribers: self.subscribers,
        }
    }
}

impl RetryConsumer {
    /// Starts a [`RetryConsumerBuilder`].
    pub fn builder(
        queue: impl Into<String>,
        handler: HandlerRef,
        publisher: RetryPublisher,
    ) -> RetryConsumerBuilder {
        RetryConsumerBuilder::new(queue, handler, publisher)
    }
}
