//! Shared helpers: an in-memory span exporter bound to a thread-local
//! subscriber, and a provisioned in-memory broker.

#![allow(dead_code)]

use nats_tracing::mq::{Broker, ConsumerSpec, MemoryBroker, StreamSpec};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use std::future::Future;
use std::time::Duration;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt as _;

pub struct SpanCapture {
    exporter: InMemorySpanExporter,
    provider: SdkTracerProvider,
    _guard: DefaultGuard,
}

impl SpanCapture {
    /// Install a subscriber for the current thread. Use with current-thread
    /// runtimes so spawned tasks report to it as well.
    pub fn install() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let tracer = provider.tracer("test");
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(tracer));
        let guard = tracing::subscriber::set_default(subscriber);
        Self {
            exporter,
            provider,
            _guard: guard,
        }
    }

    pub fn spans(&self) -> Vec<SpanData> {
        let _ = self.provider.force_flush();
        self.exporter.get_finished_spans().unwrap()
    }

    pub fn span(&self, name: &str) -> SpanData {
        self.spans()
            .into_iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no span named {name}"))
    }

    pub fn spans_named(&self, name: &str) -> Vec<SpanData> {
        self.spans().into_iter().filter(|s| s.name == name).collect()
    }
}

pub fn stream_spec() -> StreamSpec {
    StreamSpec {
        name: "download".into(),
        subjects: vec!["events.>".into()],
        duplicate_window: Duration::from_secs(120),
    }
}

pub fn consumer_spec() -> ConsumerSpec {
    ConsumerSpec {
        stream: "download".into(),
        durable_name: "download-worker".into(),
        filter_subject: None,
        ack_wait: Duration::from_secs(30),
    }
}

pub async fn provisioned_broker() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.ensure_stream(&stream_spec()).await.unwrap();
    broker.ensure_consumer(&consumer_spec()).await.unwrap();
    broker
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
