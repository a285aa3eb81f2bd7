//! # Demo: flaky_consumer
//!
//! Runs a [`RetryConsumer`] over an in-memory broker with a handler that hits a
//! flaky payment gateway.
//!
//! - `order-1` fails twice with a [`Backoff`], then succeeds on its third delivery.
//! - `order-2` never succeeds and is failed once the retry limit is reached.
//!
//! Events are printed by the built-in [`LogWriter`] subscriber.
//!
//! ## Flow
//! ```text
//! orders ─► charge(order-1) ─► Backoff ─► RetryScheduled{attempt=0, delay≈200ms}
//!        ─► charge(order-1) ─► Backoff ─► RetryScheduled{attempt=1, delay≈400ms}
//!        ─► charge(order-1) ─► Ok      ─► HandlerCompleted
//!
//! orders ─► charge(order-2) ─► Backoff ─► RetryScheduled ... (3 times)
//!        ─► charge(order-2) ─► Backoff ─► RetryExhausted ─► failed with the original Backoff
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=debug cargo run --example flaky_consumer --features logging
//! ```

use std::sync::Arc;

use backoffq::{
    Backoff, Channel, EventKind, HandlerError, HandlerFn, HandlerRef, LogWriter, MemoryBroker,
    Message, Publication, QueueSpec, RetryConfig, RetryConsumer, RetryPublisher, Subscribe,
    WorkerContext,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 1. Broker with the consumer's queue
    let broker = MemoryBroker::new();
    broker.declare_queue(&QueueSpec::new("orders")).await?;
    let deliveries = broker.consume("orders")?;

    // 2. Retry settings: short delays so the demo finishes quickly
    let cfg = RetryConfig {
        schedule: vec![200, 400],
        jitter_stddev_ms: 50,
        limit: 3,
        ..RetryConfig::default()
    };

    // 3. Handler: order-1 recovers after two delays, order-2 never does
    let charge: HandlerRef = HandlerFn::arc("charge", |msg: Message, ctx: WorkerContext| async move {
        let retries = msg.death_history().first().map_or(0, |d| d.count);
        println!("[charge] {} call={} retries={retries}", String::from_utf8_lossy(&msg.body), ctx.call_id());

        if msg.body == b"order-1" && retries >= 2 {
            return Ok(());
        }
        Err::<(), HandlerError>(Backoff::new("payment gateway busy").into())
    });

    // 4. Consumer with a LogWriter subscriber
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new()) as Arc<dyn Subscribe>];
    let consumer = RetryConsumer::builder("orders", charge, RetryPublisher::new(Arc::new(broker.clone())))
        .with_config(&cfg)?
        .with_subscribers(subs)
        .build();

    // 5. Stop once both orders reached a terminal outcome
    let token = CancellationToken::new();
    let mut events = consumer.bus().subscribe();
    let stop = token.clone();
    tokio::spawn(async move {
        let mut finished = 0;
        while let Ok(ev) = events.recv().await {
            if matches!(ev.kind, EventKind::HandlerCompleted | EventKind::RetryExhausted) {
                finished += 1;
                if finished == 2 {
                    stop.cancel();
                    break;
                }
            }
        }
    });

    for order in ["order-1", "order-2"] {
        broker
            .publish(Publication {
                exchange: String::new(),
                routing_key: "orders".into(),
                body: order.as_bytes().to_vec(),
                properties: Default::default(),
            })
            .await?;
    }

    // 6. Run until stopped
    consumer.run(deliveries, token).await;

    println!("[main] acked={} unacked={}", broker.acked().len(), broker.unacked());
    Ok(())
}
