//! # backoffq
//!
//! **backoffq** adds deferred, bounded retries to message-queue consumers.
//!
//! A handler that hits a transient failure returns a [`Backoff`]. Instead of
//! requeueing the message immediately, the consumer republishes a copy to a
//! delayed-message exchange; the broker holds it for the scheduled delay and
//! dead-letters it back to the original queue. The broker's `x-death` history
//! counts the round-trips, so the retry budget survives restarts and needs no
//! local state.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!      ┌────────────────┐
//!      │ queue "orders" │◄──────────────────────────────────────────────┐
//!      └───────┬────────┘                                               │
//!              ▼ Delivery                                               │
//! ┌──────────────────────────────────────────────────────────────┐      │
//! │  RetryConsumer                                               │      │
//! │  - Handler (application code)                                │      │
//! │  - RetryPolicy (schedule / jitter / limit)                   │      │
//! │  - RetryPublisher (delay topology + ChannelPool)             │      │
//! │  - Bus (broadcast events) ──► SubscriberSet ──► LogWriter…   │      │
//! └───────┬──────────────────────────────────┬───────────────────┘      │
//!         │ Ok / Fail / Expired              │ Backoff                  │
//!         ▼                                  ▼                          │
//!       ack()              publish(exchange="backoff", x-delay=ms)      │
//!                                            │                          │
//!                                            ▼                          │
//!                       [x-delayed-message exchange "backoff"]          │
//!                                            │ after x-delay ms         │
//!                                            ▼                          │
//!                       [queue "backoff" (x-max-length = 0)]            │
//!                                            │ dead-letter, x-death +1  │
//!                                            └──────────────────────────┘
//! ```
//!
//! ### Retry budget
//! ```text
//! attempts = count of the first x-death entry whose exchange is "backoff" (0 if none)
//!
//! attempts >= limit (limit > 0) ─► Expired("Backoff aborted after '{limit}' retries (~{s} seconds)")
//! otherwise                     ─► delay = schedule[min(attempts, len - 1)] (+ gaussian jitter)
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                                 |
//! |-------------------|--------------------------------------------------------------|----------------------------------------------------|
//! | **Policies**      | Delay schedule, jitter and retry limit.                      | [`RetryPolicy`], [`JitterSource`]                  |
//! | **Publishing**    | Republish into the delay exchange.                           | [`RetryPublisher`], [`DelayTopology`]              |
//! | **Consuming**     | Run handlers, hook outcomes, ack exactly once.               | [`RetryConsumer`], [`Handler`], [`HandlerFn`]      |
//! | **Broker seam**   | What the retry core needs from an AMQP client.               | [`ChannelPool`], [`Channel`], [`Acker`]            |
//! | **In-memory**     | Broker emulation for tests, demos and brokers without delays.| [`MemoryBroker`]                                   |
//! | **Subscriber API**| Observe retries and failures.                                | [`Subscribe`], [`Event`]                           |
//! | **Errors**        | Typed retry signals and broker failures.                     | [`Backoff`], [`Expired`], [`RetryError`]           |
//! | **Configuration** | Serializable settings.                                       | [`RetryConfig`]                                    |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use backoffq::{
//!     Backoff, Channel, HandlerError, HandlerFn, HandlerRef, MemoryBroker, Message, Processed,
//!     Publication, QueueSpec, RetryConsumer, RetryPolicy, RetryPublisher, WorkerContext,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = MemoryBroker::new();
//!     broker.declare_queue(&QueueSpec::new("orders")).await?;
//!     let mut deliveries = broker.consume("orders")?;
//!
//!     // Fails until the message has been through the delay exchange once
//!     let charge: HandlerRef = HandlerFn::arc("charge", |msg: Message, _ctx: WorkerContext| async move {
//!         if msg.death_history().is_empty() {
//!             return Err(Backoff::new("payment gateway busy").into());
//!         }
//!         Ok::<_, HandlerError>(())
//!     });
//!
//!     let consumer = RetryConsumer::builder("orders", charge, RetryPublisher::new(Arc::new(broker.clone())))
//!         .with_policy(RetryPolicy::new(vec![10, 20], 0, 5)?)
//!         .build();
//!
//!     broker
//!         .publish(Publication {
//!             exchange: String::new(),
//!             routing_key: "orders".into(),
//!             body: b"order #1".to_vec(),
//!             properties: Default::default(),
//!         })
//!         .await?;
//!
//!     let first = deliveries.next().await.ok_or("queue closed")?;
//!     assert!(matches!(consumer.process(first).await?, Processed::Retrying(_)));
//!
//!     let second = deliveries.next().await.ok_or("queue closed")?;
//!     assert_eq!(consumer.process(second).await?, Processed::Completed);
//!     Ok(())
//! }
//! ```
mod broker;
mod config;
mod consumer;
mod error;
mod events;
mod message;
mod policies;
mod publisher;
mod subscribers;

// ---- Public re-exports ----

pub use broker::{
    Acker, Channel, ChannelPool, DEFAULT_DELAY_EXCHANGE, DelayTopology, Delivery, ExchangeKind,
    ExchangeSpec, MemoryBroker, Publication, QueueSpec,
};
pub use config::RetryConfig;
pub use consumer::{
    Handler, HandlerFn, HandlerRef, Processed, RetryConsumer, RetryConsumerBuilder, WorkerContext,
};
pub use error::{Backoff, BrokerError, Expired, HandlerError, PolicyError, RetryError};
pub use events::{Bus, DEFAULT_BUS_CAPACITY, Event, EventKind};
pub use message::{
    BACKOFF_CALL_SUFFIX, CALL_ID_STACK, DeathRecord, HeaderValue, Headers, Message, Properties,
    X_DEATH, X_DELAY, attempt_count, death_history, record_death, string_list,
};
pub use policies::{
    DEFAULT_JITTER_STDDEV, DEFAULT_LIMIT, DEFAULT_SCHEDULE, FixedJitter, GaussianJitter,
    JitterSource, RetryPolicy,
};
pub use publisher::{RetryPublisher, Scheduled};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
