//! Smoke test for the full telemetry stack.
//!
//! Requires an OTLP collector on localhost:4317:
//! ```sh
//! docker compose up -d
//! ```
//!
//! Run with:
//! ```sh
//! cargo test --test telemetry_smoke_test -- --ignored --nocapture
//! ```

use nats_tracing::consumer::{AckPolicy, Consumer, ConsumerOptions, LoggingHandler};
use nats_tracing::mq::{Broker, ConsumerSpec, MemoryBroker, StreamSpec, Subscription};
use nats_tracing::publisher::Publisher;
use nats_tracing::telemetry::{Telemetry, TelemetryConfig};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn smoke_publish_consume_and_shutdown() {
    let telemetry = Telemetry::start(TelemetryConfig::new(
        "nats-tracing-smoke-test",
        "http://localhost:4317",
    ))
    .expect("failed to start telemetry");

    assert!(
        Telemetry::start(TelemetryConfig::new("again", "http://localhost:4317")).is_err(),
        "second start must be rejected"
    );

    let broker = MemoryBroker::new();
    broker
        .ensure_stream(&StreamSpec {
            name: "download".into(),
            subjects: vec!["events.>".into()],
            duplicate_window: Duration::from_secs(120),
        })
        .await
        .unwrap();
    let consumer_spec = ConsumerSpec {
        stream: "download".into(),
        durable_name: "download-worker".into(),
        filter_subject: None,
        ack_wait: Duration::from_secs(30),
    };
    broker.ensure_consumer(&consumer_spec).await.unwrap();

    let publisher = Publisher::new(
        Arc::new(broker.clone()),
        telemetry.propagator(),
        "events.download",
    );
    for _ in 0..3 {
        publisher.publish("hello from sender").await.unwrap();
    }

    let consumer = Consumer::new(
        LoggingHandler,
        telemetry.propagator(),
        ConsumerOptions {
            ack_policy: AckPolicy::Always,
            max_in_flight: 4,
        },
    );
    let mut sub = broker.subscribe(&consumer_spec).await.unwrap();
    for _ in 0..3 {
        let delivery = sub.next().await.unwrap().unwrap();
        consumer.process(delivery).await;
    }

    let scraped = telemetry.local_metrics().render().unwrap();
    println!("{scraped}");
    assert!(scraped.contains("nats_tracing_messaging_published_total"));
    assert!(scraped.contains("nats_tracing_messaging_settled_total"));

    telemetry
        .shutdown(Duration::from_secs(10))
        .await
        .expect("telemetry shutdown");
}
