//! # RetryConsumer: runs a handler over a queue with deferred retries.
//!
//! For every delivery the consumer runs its [`Handler`](crate::Handler), then
//! hands the outcome to [`RetryConsumer::handle_result`], the hook that turns
//! retry requests into scheduled redeliveries.
//!
//! ## Flow
//! ```text
//! Delivery ──► WorkerContext::new ──► handler.handle(message, ctx)
//!                                        │
//!   handle_result(message, ctx, outcome) ◄┘
//!     ├─ Ok                 ─► HandlerCompleted            ─► Completed
//!     ├─ Err(Fail)          ─► HandlerFailed               ─► Failed(error)
//!     └─ Err(Backoff(b))    ─► ctx.mark_backoff(message)
//!                              publisher.schedule_retry(message, b, policy, queue)
//!                                ├─ Ok(s)              ─► RetryScheduled ─► Retrying(s)
//!                                ├─ Err(Expired)       ─► RetryExhausted ─► Failed(Backoff(b))
//!                                └─ Err(Broker(e))     ─► PublishFailed  ─► Err(e)
//!
//! process(): Ok(_) ─► delivery.ack()      Err(e) ─► delivery.nack(requeue = true)
//!            ack fails ─► AckFailed ─► Err(Ack) (the delivery stays with the broker)
//! ```
//!
//! ## Rules
//! - Every delivery is acknowledged exactly once (`ack`/`nack` consume the delivery).
//! - Exhausted retries are reported with the **original** `Backoff`, not the expiry.
//! - Broker failures are returned to the caller; the delivery goes back to the broker.
//! - Deliveries are processed sequentially within one consumer.

use futures::{Stream, StreamExt};
use tokio::select;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use std::sync::Arc;

use crate::broker::Delivery;
use crate::consumer::context::WorkerContext;
use crate::consumer::handler::HandlerRef;
use crate::error::{BrokerError, HandlerError, RetryError};
use crate::events::{Bus, Event, EventKind};
use crate::message::Message;
use crate::policies::RetryPolicy;
use crate::publisher::{RetryPublisher, Scheduled};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Result of processing one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Handler succeeded.
    Completed,
    /// Handler asked for a retry; the redelivery is scheduled.
    Retrying(Scheduled),
    /// Terminal failure. After exhausted retries this holds the original `Backoff`.
    Failed(HandlerError),
}

/// Consumer that redelivers failed messages through the delay exchange.
pub struct RetryConsumer {
    pub(crate) queue: String,
    pub(crate) handler: HandlerRef,
    pub(crate) policy: RetryPolicy,
    pub(crate) publisher: RetryPublisher,
    pub(crate) bus: Bus,
    pub(crate) subscribers: Vec<Arc<dyn Subscribe>>,
}

impl RetryConsumer {
    /// Queue this consumer reads from; also the redelivery target.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Event bus; subscribe to observe events outside the subscriber set.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Handles one delivery and acknowledges it exactly once.
    ///
    /// On a broker failure while scheduling a retry, the delivery is nacked with
    /// requeue and the error is returned. A failed ack is reported as `AckFailed`
    /// and returned; the delivery is then left to the broker.
    pub async fn process(&self, mut delivery: Delivery) -> Result<Processed, BrokerError> {
        let ctx = WorkerContext::new(&self.queue, self.handler.name(), &delivery.message);
        let outcome = self.handler.handle(&delivery.message, &ctx).await;

        match self.handle_result(&mut delivery.message, &ctx, outcome).await {
            Ok(processed) => {
                let tag = delivery.delivery_tag;
                if let Err(ack_err) = delivery.ack().await {
                    warn!(delivery_tag = tag, error = %ack_err, "ack failed; broker may redeliver");
                    self.bus.publish(
                        self.event(EventKind::AckFailed, &ctx)
                            .with_reason(ack_err.to_string()),
                    );
                    return Err(ack_err);
                }
                Ok(processed)
            }
            Err(err) => {
                let tag = delivery.delivery_tag;
                if let Err(nack_err) = delivery.nack(true).await {
                    warn!(delivery_tag = tag, error = %nack_err, "nack after publish failure failed");
                }
                Err(err)
            }
        }
    }

    /// Outcome hook run after the handler and before acknowledgement.
    ///
    /// On a retry request, writes the `.backoff` call-id stack into `message` and
    /// schedules the redelivery to this consumer's queue.
    pub async fn handle_result(
        &self,
        message: &mut Message,
        ctx: &WorkerContext,
        outcome: Result<(), HandlerError>,
    ) -> Result<Processed, BrokerError> {
        let failure = match outcome {
            Ok(()) => {
                self.bus.publish(self.event(EventKind::HandlerCompleted, ctx));
                return Ok(Processed::Completed);
            }
            Err(HandlerError::Backoff(failure)) => failure,
            Err(other) => {
                self.bus.publish(
                    self.event(EventKind::HandlerFailed, ctx)
                        .with_reason(other.to_string()),
                );
                return Ok(Processed::Failed(other));
            }
        };

        ctx.mark_backoff(message);
        match self
            .publisher
            .schedule_retry(message, &failure, &self.policy, &self.queue)
            .await
        {
            Ok(scheduled) => {
                self.bus.publish(
                    self.event(EventKind::RetryScheduled, ctx)
                        .with_attempt(scheduled.attempt)
                        .with_delay_ms(scheduled.delay_ms)
                        .with_reason(failure.to_string()),
                );
                Ok(Processed::Retrying(scheduled))
            }
            Err(RetryError::Expired(expired)) => {
                self.bus.publish(
                    self.event(EventKind::RetryExhausted, ctx)
                        .with_limit(expired.limit)
                        .with_reason(expired.to_string()),
                );
                Ok(Processed::Failed(HandlerError::Backoff(expired.into_cause())))
            }
            Err(RetryError::Broker(err)) => {
                self.bus.publish(
                    self.event(EventKind::PublishFailed, ctx)
                        .with_reason(err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// Processes deliveries until the stream ends or `token` is cancelled.
    ///
    /// Events published during the run are fanned out to the configured
    /// subscribers; the subscriber queues are drained before this returns.
    pub async fn run<S>(&self, mut deliveries: S, token: CancellationToken)
    where
        S: Stream<Item = Delivery> + Send + Unpin,
    {
        let stop = CancellationToken::new();
        let listener = self.subscriber_listener(stop.clone());
        self.bus.publish(self.lifecycle_event(EventKind::ConsumerStarted));

        loop {
            let delivery = select! {
                biased;
                _ = token.cancelled() => break,
                next = deliveries.next() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            match self.process(delivery).await {
                Ok(_) => {}
                Err(err @ BrokerError::Ack { .. }) => {
                    warn!(queue = %self.queue, error = %err, "delivery left unacknowledged");
                }
                Err(err) => {
                    warn!(queue = %self.queue, error = %err, "delivery returned to broker");
                }
            }
        }

        self.bus.publish(self.lifecycle_event(EventKind::ConsumerStopped));
        stop.cancel();
        if let Err(err) = listener.await {
            warn!(queue = %self.queue, error = %err, "event listener task failed");
        }
    }

    /// Forwards bus events to a fresh subscriber set until `stop`, then drains and shuts it down.
    fn subscriber_listener(&self, stop: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let set = SubscriberSet::new(self.subscribers.clone(), self.bus.clone());

        tokio::spawn(async move {
            loop {
                select! {
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => break,
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(ev) => set.emit(&ev),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            set.shutdown().await;
        })
    }

    fn event(&self, kind: EventKind, ctx: &WorkerContext) -> Event {
        self.lifecycle_event(kind).with_call_id(ctx.call_id())
    }

    fn lifecycle_event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_queue(self.queue.as_str())
            .with_handler(self.handler.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Channel, MemoryBroker, Publication, QueueSpec};
    use crate::consumer::handler::HandlerFn;
    use crate::error::Backoff;
    use crate::message::{CALL_ID_STACK, Properties, string_list};

    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn to_orders(body: &[u8]) -> Publication {
        Publication {
            exchange: String::new(),
            routing_key: "orders".into(),
            body: body.to_vec(),
            properties: Properties::default(),
        }
    }

    async fn broker_with_orders() -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker.declare_queue(&QueueSpec::new("orders")).await.unwrap();
        broker
    }

    fn always_backoff(calls: Arc<AtomicUsize>) -> HandlerRef {
        HandlerFn::arc("charge", move |_msg: Message, _ctx: WorkerContext| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), HandlerError>(Backoff::new("busy").into())
            }
        })
    }

    fn consumer(broker: &MemoryBroker, handler: HandlerRef, limit: u32) -> RetryConsumer {
        RetryConsumer::builder(
            "orders",
            handler,
            RetryPublisher::new(Arc::new(broker.clone())),
        )
        .with_policy(RetryPolicy::new(vec![1000, 2000], 0, limit).unwrap())
        .build()
    }

    #[derive(Default)]
    struct Recorder {
        kinds: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            self.kinds.lock().unwrap().push(event.kind);
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[derive(Default)]
    struct AlwaysPanics {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Subscribe for AlwaysPanics {
        async fn on_event(&self, _event: &Event) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("subscriber bug");
        }

        fn name(&self) -> &'static str {
            "always-panics"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_subscriber_does_not_receive_its_own_panics() {
        let broker = broker_with_orders().await;
        let panicky = Arc::new(AlwaysPanics::default());
        let consumer = RetryConsumer::builder(
            "orders",
            always_backoff(Arc::new(AtomicUsize::new(0))),
            RetryPublisher::new(Arc::new(broker.clone())),
        )
        .with_subscribers(vec![Arc::clone(&panicky) as Arc<dyn Subscribe>])
        .build();
        let mut bus = consumer.bus().subscribe();

        let token = CancellationToken::new();
        let stop = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            stop.cancel();
        });
        consumer
            .run(futures::stream::pending::<Delivery>(), token)
            .await;

        // started + stopped only
        assert_eq!(panicky.calls.load(Ordering::SeqCst), 2);
        let mut panics = 0;
        while let Ok(event) = bus.try_recv() {
            if event.kind == EventKind::SubscriberPanicked {
                panics += 1;
            }
        }
        assert_eq!(panics, 2);
    }

    #[tokio::test]
    async fn ack_failure_is_reported_without_nack() {
        let broker = broker_with_orders().await;
        let handler = HandlerFn::arc("charge", |_msg: Message, _ctx: WorkerContext| async move {
            Ok::<_, HandlerError>(())
        });
        let consumer = consumer(&broker, handler, 3);
        let mut bus = consumer.bus().subscribe();

        // tag unknown to the broker, so the ack is rejected
        let delivery = Delivery::new(999, Message::new(b"x".to_vec()), Arc::new(broker.clone()));
        let err = consumer.process(delivery).await.unwrap_err();

        assert!(matches!(err, BrokerError::Ack { delivery_tag: 999, .. }));
        assert!(broker.nacked().is_empty());
        assert_eq!(bus.recv().await.unwrap().kind, EventKind::HandlerCompleted);
        let event = bus.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::AckFailed);
        assert!(event.call_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_exhausted_then_reports_original_failure() {
        let broker = broker_with_orders().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let consumer = consumer(&broker, always_backoff(Arc::clone(&calls)), 3);
        let mut deliveries = broker.consume("orders").unwrap();
        broker.publish(to_orders(b"job")).await.unwrap();

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            let delivery = deliveries.next().await.unwrap();
            outcomes.push(consumer.process(delivery).await.unwrap());
        }

        assert_eq!(
            outcomes,
            vec![
                Processed::Retrying(Scheduled { delay_ms: 1000, attempt: 0 }),
                Processed::Retrying(Scheduled { delay_ms: 2000, attempt: 1 }),
                Processed::Retrying(Scheduled { delay_ms: 2000, attempt: 2 }),
                Processed::Failed(HandlerError::Backoff(Backoff::new("busy"))),
            ]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(broker.acked().len(), 4);
        assert!(broker.nacked().is_empty());
        assert_eq!(broker.unacked(), 0);
        // exhaustion does not publish
        assert_eq!(broker.published().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn redelivery_carries_backoff_call_stack() {
        let broker = broker_with_orders().await;
        let consumer = consumer(&broker, always_backoff(Arc::new(AtomicUsize::new(0))), 5);
        let mut deliveries = broker.consume("orders").unwrap();
        broker.publish(to_orders(b"job")).await.unwrap();

        let first = deliveries.next().await.unwrap();
        consumer.process(first).await.unwrap();

        let second = deliveries.next().await.unwrap();
        let stack = string_list(second.message.headers(), CALL_ID_STACK);
        assert_eq!(stack.len(), 1);
        assert!(stack[0].starts_with("orders.charge."));
        assert!(stack[0].ends_with(".backoff"));
        assert_eq!(second.message.death_history()[0].count, 1);
        assert_eq!(second.message.body, b"job");
    }

    #[tokio::test]
    async fn success_and_terminal_failure_are_acked() {
        let broker = broker_with_orders().await;
        let handler = HandlerFn::arc("charge", |msg: Message, _ctx: WorkerContext| async move {
            if msg.body == b"bad" {
                return Err(HandlerError::Fail {
                    error: "malformed order".into(),
                });
            }
            Ok(())
        });
        let consumer = consumer(&broker, handler, 3);
        let mut deliveries = broker.consume("orders").unwrap();
        broker.publish(to_orders(b"good")).await.unwrap();
        broker.publish(to_orders(b"bad")).await.unwrap();

        let ok = consumer.process(deliveries.next().await.unwrap()).await.unwrap();
        let failed = consumer.process(deliveries.next().await.unwrap()).await.unwrap();

        assert_eq!(ok, Processed::Completed);
        assert!(matches!(failed, Processed::Failed(HandlerError::Fail { .. })));
        assert_eq!(broker.acked().len(), 2);
        assert_eq!(broker.published().len(), 2);
    }

    #[tokio::test]
    async fn publish_failure_requeues_delivery() {
        let broker = broker_with_orders().await;
        let consumer = consumer(&broker, always_backoff(Arc::new(AtomicUsize::new(0))), 3);
        let mut bus = consumer.bus().subscribe();
        let mut deliveries = broker.consume("orders").unwrap();
        broker.publish(to_orders(b"job")).await.unwrap();

        broker.set_offline(true);
        let err = consumer
            .process(deliveries.next().await.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Connection { .. }));
        assert!(broker.acked().is_empty());
        assert_eq!(broker.nacked().len(), 1);

        let event = bus.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::PublishFailed);
        assert_eq!(event.queue.as_deref(), Some("orders"));

        // requeued for another attempt once the broker is back
        broker.set_offline(false);
        let again = deliveries.next().await.unwrap();
        assert!(again.message.redelivered);
        assert!(matches!(
            consumer.process(again).await,
            Ok(Processed::Retrying(_))
        ));
    }

    #[tokio::test]
    async fn handle_result_leaves_success_untouched() {
        let broker = broker_with_orders().await;
        let consumer = consumer(&broker, always_backoff(Arc::new(AtomicUsize::new(0))), 3);
        let mut message = Message::new(b"x".to_vec());
        let ctx = WorkerContext::with_call_id("orders.charge.1", Vec::new());

        let processed = consumer.handle_result(&mut message, &ctx, Ok(())).await.unwrap();
        assert_eq!(processed, Processed::Completed);
        assert!(!message.headers().contains_key(CALL_ID_STACK));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn run_emits_lifecycle_events_to_subscribers() {
        let broker = broker_with_orders().await;
        let token = CancellationToken::new();
        let stop = token.clone();
        let handler = HandlerFn::arc("charge", move |_msg: Message, _ctx: WorkerContext| {
            let stop = stop.clone();
            async move {
                stop.cancel();
                Ok::<_, HandlerError>(())
            }
        });
        let recorder = Arc::new(Recorder::default());
        let consumer = RetryConsumer::builder(
            "orders",
            handler,
            RetryPublisher::new(Arc::new(broker.clone())),
        )
        .with_subscribers(vec![Arc::clone(&recorder) as Arc<dyn Subscribe>])
        .build();

        let deliveries = broker.consume("orders").unwrap();
        broker.publish(to_orders(b"job")).await.unwrap();
        consumer.run(deliveries, token).await;

        assert_eq!(
            *recorder.kinds.lock().unwrap(),
            vec![
                EventKind::ConsumerStarted,
                EventKind::HandlerCompleted,
                EventKind::ConsumerStopped,
            ]
        );
        assert_eq!(broker.acked().len(), 1);
    }

    #[tokio::test]
    async fn run_stops_when_stream_ends() {
        let broker = broker_with_orders().await;
        let consumer = consumer(&broker, always_backoff(Arc::new(AtomicUsize::new(0))), 3);
        let deliveries = futures::stream::empty::<Delivery>();
        consumer.run(deliveries, CancellationToken::new()).await;
        assert!(broker.published().is_empty());
    }
}
