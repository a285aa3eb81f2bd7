//! # In-process broker.
//!
//! [`MemoryBroker`] implements [`ChannelPool`], [`Channel`] and [`Acker`] over
//! plain in-memory state, emulating the broker features the retry protocol
//! relies on:
//!
//! - default, direct, topic (`*`/`#`) and fanout routing;
//! - `x-delayed-message` exchanges, held back with a `tokio::time::sleep` timer
//!   for the `x-delay` header value;
//! - zero-capacity queues (`x-max-length = 0`) that dead-letter every message
//!   to `x-dead-letter-exchange`, recording `x-death` the way RabbitMQ does;
//! - dead-lettering of messages nacked without requeue;
//! - ack/nack bookkeeping and an offline switch for connection failures.
//!
//! It backs the crate's tests and demos, and doubles as the timer-based
//! substitute for brokers without the delayed-message capability.
//!
//! ## Example
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), backoffq::BrokerError> {
//! use backoffq::{Channel, MemoryBroker, Message, Publication, QueueSpec};
//! use futures::StreamExt;
//!
//! let broker = MemoryBroker::new();
//! broker.declare_queue(&QueueSpec::new("orders")).await?;
//! let mut deliveries = broker.consume("orders")?;
//!
//! broker
//!     .publish(Publication {
//!         exchange: String::new(),
//!         routing_key: "orders".into(),
//!         body: b"hello".to_vec(),
//!         properties: Default::default(),
//!     })
//!     .await?;
//!
//! let delivery = deliveries.next().await.expect("delivered");
//! assert_eq!(delivery.message.body, b"hello");
//! delivery.ack().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::broker::channel::{Acker, Channel, ChannelPool, Delivery, Publication};
use crate::broker::topology::{ExchangeKind, ExchangeSpec, QueueSpec};
use crate::error::BrokerError;
use crate::message::{Message, X_DELAY, record_death};

/// Guards against dead-letter cycles between queues.
const MAX_DEAD_LETTER_HOPS: usize = 16;

/// In-memory broker. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    offline: AtomicBool,
}

struct QueueState {
    spec: QueueSpec,
    tx: mpsc::UnboundedSender<(u64, Message)>,
    rx: Option<mpsc::UnboundedReceiver<(u64, Message)>>,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    next_tag: u64,
    declarations: usize,
    published: Vec<Publication>,
    unacked: HashMap<u64, (String, Message)>,
    acked: Vec<u64>,
    nacked: Vec<u64>,
    unroutable: Vec<Message>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline, [`ChannelPool::acquire`] fails with [`BrokerError::Connection`].
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Starts consuming `queue`. Each queue accepts a single consumer.
    pub fn consume(&self, queue: &str) -> Result<BoxStream<'static, Delivery>, BrokerError> {
        let rx = {
            let mut state = self.state();
            let q = state.queues.get_mut(queue).ok_or_else(|| BrokerError::Declare {
                name: queue.to_owned(),
                reason: "queue not declared".into(),
            })?;
            q.rx.take().ok_or_else(|| BrokerError::Declare {
                name: queue.to_owned(),
                reason: "queue already has a consumer".into(),
            })?
        };
        let acker: Arc<dyn Acker> = Arc::new(self.clone());

        Ok(futures::stream::unfold((rx, acker), |(mut rx, acker)| async move {
            let (tag, message) = rx.recv().await?;
            let delivery = Delivery::new(tag, message, Arc::clone(&acker));
            Some((delivery, (rx, acker)))
        })
        .boxed())
    }

    /// Every publication accepted so far, in order.
    pub fn published(&self) -> Vec<Publication> {
        self.state().published.clone()
    }

    /// Delivery tags acknowledged so far.
    pub fn acked(&self) -> Vec<u64> {
        self.state().acked.clone()
    }

    /// Delivery tags rejected so far.
    pub fn nacked(&self) -> Vec<u64> {
        self.state().nacked.clone()
    }

    /// Number of delivered but unacknowledged messages.
    pub fn unacked(&self) -> usize {
        self.state().unacked.len()
    }

    /// Messages that matched no queue.
    pub fn unroutable(&self) -> Vec<Message> {
        self.state().unroutable.clone()
    }

    /// Number of declare calls received (including repeats).
    pub fn declarations(&self) -> usize {
        self.state().declarations
    }

    /// Declared exchange, if any.
    pub fn exchange(&self, name: &str) -> Option<ExchangeSpec> {
        self.state().exchanges.get(name).cloned()
    }

    /// Declared queue, if any.
    pub fn queue(&self, name: &str) -> Option<QueueSpec> {
        self.state().queues.get(name).map(|q| q.spec.clone())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn release_delayed(&self, exchange: String, message: Message, delay_ms: u64) {
        let broker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            broker.state().route(&exchange, message, 0);
        });
    }
}

impl State {
    /// Routes `message` through `exchange` right away (delays are not applied here).
    fn route(&mut self, exchange: &str, message: Message, hops: usize) {
        if exchange.is_empty() {
            let queue = message.routing_key.clone();
            if self.queues.contains_key(&queue) {
                self.enqueue(&queue, message, hops);
            } else {
                debug!(queue = %queue, "unroutable message on default exchange");
                self.unroutable.push(message);
            }
            return;
        }

        let Some(kind) = self.exchanges.get(exchange).map(ExchangeSpec::routing_kind) else {
            debug!(exchange = %exchange, "exchange vanished before routing");
            self.unroutable.push(message);
            return;
        };
        let targets: Vec<String> = self
            .queues
            .values()
            .filter(|q| q.spec.exchange.as_deref() == Some(exchange))
            .filter(|q| binding_matches(kind, &q.spec.routing_key, &message.routing_key))
            .map(|q| q.spec.name.clone())
            .collect();

        if targets.is_empty() {
            debug!(exchange = %exchange, routing_key = %message.routing_key, "unroutable message");
            self.unroutable.push(message);
            return;
        }
        for queue in targets {
            self.enqueue(&queue, message.clone(), hops);
        }
    }

    fn enqueue(&mut self, queue: &str, message: Message, hops: usize) {
        let Some(q) = self.queues.get(queue) else {
            self.unroutable.push(message);
            return;
        };
        if q.spec.max_length() == Some(0) {
            self.dead_letter(queue, message, "maxlen", hops);
            return;
        }

        self.next_tag += 1;
        let tag = self.next_tag;
        if q.tx.send((tag, message.clone())).is_ok() {
            self.unacked.insert(tag, (queue.to_owned(), message));
        } else {
            debug!(queue = %queue, "consumer gone; message unroutable");
            self.unroutable.push(message);
        }
    }

    fn dead_letter(&mut self, queue: &str, mut message: Message, reason: &str, hops: usize) {
        let dlx = self
            .queues
            .get(queue)
            .and_then(|q| q.spec.dead_letter_exchange())
            .map(str::to_owned);
        let Some(dlx) = dlx else {
            debug!(queue = %queue, reason, "message dropped without dead-letter exchange");
            return;
        };
        if hops >= MAX_DEAD_LETTER_HOPS {
            debug!(queue = %queue, "dead-letter cycle detected; dropping message");
            return;
        }

        let routing_key = message.routing_key.clone();
        record_death(
            &mut message.properties.headers,
            &message.exchange,
            queue,
            reason,
            &routing_key,
        );
        message.exchange = dlx.clone();
        message.redelivered = false;
        self.route(&dlx, message, hops + 1);
    }
}

fn binding_matches(kind: ExchangeKind, pattern: &str, key: &str) -> bool {
    match kind {
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => topic_matches(pattern, key),
        ExchangeKind::Direct | ExchangeKind::DelayedMessage => pattern == key,
    }
}

/// AMQP topic matching: `*` matches one word, `#` zero or more.
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn walk(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|skip| walk(rest, &key[skip..])),
            Some((&"*", rest)) => !key.is_empty() && walk(rest, &key[1..]),
            Some((word, rest)) => key.first() == Some(word) && walk(rest, &key[1..]),
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = if key.is_empty() {
        Vec::new()
    } else {
        key.split('.').collect()
    };
    walk(&pattern, &key)
}

#[async_trait]
impl Channel for MemoryBroker {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.declarations += 1;
        match state.exchanges.get(&exchange.name) {
            Some(existing) if existing != exchange => Err(BrokerError::Declare {
                name: exchange.name.clone(),
                reason: "inequivalent exchange declaration".into(),
            }),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.name.clone(), exchange.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.declarations += 1;
        if let Some(exchange) = &queue.exchange {
            if !state.exchanges.contains_key(exchange) {
                return Err(BrokerError::Declare {
                    name: queue.name.clone(),
                    reason: format!("no exchange '{exchange}' to bind to"),
                });
            }
        }
        match state.queues.get(&queue.name) {
            Some(existing) if existing.spec != *queue => Err(BrokerError::Declare {
                name: queue.name.clone(),
                reason: "inequivalent queue declaration".into(),
            }),
            Some(_) => Ok(()),
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                state.queues.insert(
                    queue.name.clone(),
                    QueueState {
                        spec: queue.clone(),
                        tx,
                        rx: Some(rx),
                    },
                );
                Ok(())
            }
        }
    }

    async fn publish(&self, publication: Publication) -> Result<(), BrokerError> {
        let message = Message {
            body: publication.body.clone(),
            properties: publication.properties.clone(),
            exchange: publication.exchange.clone(),
            routing_key: publication.routing_key.clone(),
            redelivered: false,
        };

        let delay_ms = {
            let mut state = self.state();
            let kind = if publication.exchange.is_empty() {
                None
            } else {
                let spec = state.exchanges.get(&publication.exchange).ok_or_else(|| {
                    BrokerError::Publish {
                        exchange: publication.exchange.clone(),
                        reason: "no such exchange".into(),
                    }
                })?;
                Some(spec.kind)
            };
            state.published.push(publication.clone());

            if kind == Some(ExchangeKind::DelayedMessage) {
                let delay = message
                    .headers()
                    .get(X_DELAY)
                    .and_then(|v| v.as_int())
                    .unwrap_or(0);
                Some(u64::try_from(delay).unwrap_or(0))
            } else {
                state.route(&publication.exchange, message.clone(), 0);
                None
            }
        };

        if let Some(delay_ms) = delay_ms {
            self.release_delayed(publication.exchange, message, delay_ms);
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelPool for MemoryBroker {
    async fn acquire(&self) -> Result<Box<dyn Channel>, BrokerError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection {
                reason: "broker offline".into(),
            });
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl Acker for MemoryBroker {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let mut state = self.state();
        if state.unacked.remove(&delivery_tag).is_none() {
            return Err(BrokerError::Ack {
                delivery_tag,
                reason: "unknown delivery tag".into(),
            });
        }
        state.acked.push(delivery_tag);
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.state();
        let Some((queue, mut message)) = state.unacked.remove(&delivery_tag) else {
            return Err(BrokerError::Ack {
                delivery_tag,
                reason: "unknown delivery tag".into(),
            });
        };
        state.nacked.push(delivery_tag);

        if requeue {
            message.redelivered = true;
            state.enqueue(&queue, message, 0);
        } else {
            state.dead_letter(&queue, message, "rejected", 0);
        }
        Ok(())
    }
}
