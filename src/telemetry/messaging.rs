//! Messaging span helpers.
//!
//! Span names and fields for the publish and receive sides of the queue. The
//! `messaging.*` fields follow the OpenTelemetry messaging conventions.

use tracing::Span;

/// One iteration of the publisher's tick loop.
pub fn start_tick_span() -> Span {
    tracing::info_span!("tick", "messaging.system" = "nats")
}

/// Publishing one work item. Created inside the tick span, so it nests there.
pub fn start_publish_span(subject: &str, message_id: &str) -> Span {
    tracing::info_span!(
        "publish",
        "otel.kind" = "producer",
        "messaging.system" = "nats",
        "messaging.operation.type" = "publish",
        "messaging.destination.name" = subject,
        "messaging.message.id" = message_id,
        "messaging.publish.sequence" = tracing::field::Empty,
    )
}

/// Receiving one delivery. The caller re-parents it onto the extracted context
/// before the span is entered.
pub fn start_receive_span(subject: &str) -> Span {
    tracing::info_span!(
        "received message",
        "otel.kind" = "consumer",
        "messaging.system" = "nats",
        "messaging.operation.type" = "process",
        "messaging.destination.name" = subject,
        "messaging.disposition" = tracing::field::Empty,
    )
}

/// Record how a delivery was settled (`ack` or `nak`).
pub fn record_disposition(span: &Span, disposition: &str) {
    span.record("messaging.disposition", disposition);
}

/// Record the stream sequence the broker assigned on publish.
///
/// Recorded as `i64` so exporters see an integer attribute.
pub fn record_sequence(span: &Span, sequence: u64) {
    span.record("messaging.publish.sequence", i64::try_from(sequence).unwrap_or(i64::MAX));
}
