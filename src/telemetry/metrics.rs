//! Metric instrument factories for nats-tracing.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"nats-tracing"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for nats-tracing instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("nats-tracing")
}

/// Counter: publish attempts.
/// Labels: `result` ("ok" | "duplicate" | "error").
pub fn messages_published() -> Counter<u64> {
    meter()
        .u64_counter("messaging.published")
        .with_description("Number of publish attempts")
        .build()
}

/// Counter: deliveries pulled from the subscription.
pub fn messages_received() -> Counter<u64> {
    meter()
        .u64_counter("messaging.received")
        .with_description("Number of deliveries received")
        .build()
}

/// Counter: delivery settlements.
/// Labels: `disposition` ("ack" | "nak"), `result` ("ok" | "error").
pub fn messages_settled() -> Counter<u64> {
    meter()
        .u64_counter("messaging.settled")
        .with_description("Number of deliveries acknowledged or negatively acknowledged")
        .build()
}

/// Counter: handler invocations that returned an error or panicked.
pub fn handler_failures() -> Counter<u64> {
    meter()
        .u64_counter("messaging.handler.failures")
        .with_description("Number of failed handler invocations")
        .build()
}

/// Histogram: handler duration in milliseconds.
pub fn handler_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("messaging.handler.duration_ms")
        .with_description("Handler duration in milliseconds")
        .with_unit("ms")
        .build()
}
