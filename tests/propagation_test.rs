//! Trace context and baggage through message headers.

mod common;

use nats_tracing::model::Headers;
use nats_tracing::telemetry::Propagator;
use nats_tracing::telemetry::propagation::has_trace_context;
use opentelemetry::baggage::BaggageExt;
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::{Context, KeyValue};
use tracing_opentelemetry::OpenTelemetrySpanExt;

const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
const SPAN_ID: &str = "00f067aa0ba902b7";

fn sampled_context() -> Context {
    let span_context = SpanContext::new(
        TraceId::from_hex(TRACE_ID).unwrap(),
        SpanId::from_hex(SPAN_ID).unwrap(),
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    Context::new().with_remote_span_context(span_context)
}

#[test]
fn injected_context_extracts_to_same_identity() {
    let propagator = Propagator::new();
    let mut headers = Headers::new();
    propagator.inject(&sampled_context(), &mut headers);

    assert_eq!(
        headers.get("traceparent").map(String::as_str),
        Some(format!("00-{TRACE_ID}-{SPAN_ID}-01").as_str())
    );

    let extracted = propagator.extract(&headers);
    let span = extracted.span();
    let sc = span.span_context();
    assert!(sc.is_valid());
    assert!(sc.is_remote());
    assert!(sc.is_sampled());
    assert_eq!(sc.trace_id().to_string(), TRACE_ID);
    assert_eq!(sc.span_id().to_string(), SPAN_ID);
}

#[test]
fn inject_keeps_unrelated_headers() {
    let propagator = Propagator::new();
    let mut headers = Headers::new();
    headers.insert("content-type".into(), "text/plain".into());
    headers.insert("Nats-Msg-Id".into(), "kalobuna".into());

    propagator.inject(&sampled_context(), &mut headers);

    assert_eq!(headers["content-type"], "text/plain");
    assert_eq!(headers["Nats-Msg-Id"], "kalobuna");
    assert!(has_trace_context(&headers));
}

#[test]
fn inject_replaces_stale_propagation_headers() {
    let propagator = Propagator::new();
    let mut headers = Headers::new();
    headers.insert("baggage".into(), "tenant=stale".into());
    headers.insert(
        "traceparent".into(),
        "00-11111111111111111111111111111111-2222222222222222-01".into(),
    );

    propagator.inject(&sampled_context(), &mut headers);

    assert!(!headers.contains_key("baggage"));
    assert!(headers["traceparent"].contains(TRACE_ID));
}

#[test]
fn missing_or_malformed_headers_yield_an_invalid_parent() {
    let propagator = Propagator::new();

    let empty = propagator.extract(&Headers::new());
    assert!(!empty.span().span_context().is_valid());

    let mut garbled = Headers::new();
    garbled.insert("traceparent".into(), "not-a-traceparent".into());
    let garbled = propagator.extract(&garbled);
    assert!(!garbled.span().span_context().is_valid());

    let mut zeros = Headers::new();
    zeros.insert(
        "traceparent".into(),
        "00-00000000000000000000000000000000-0000000000000000-01".into(),
    );
    assert!(!propagator.extract(&zeros).span().span_context().is_valid());
}

#[test]
fn reinjecting_an_extracted_context_is_bit_identical() {
    let propagator = Propagator::new();
    let mut first = Headers::new();
    propagator.inject(&sampled_context(), &mut first);

    let mut second = Headers::new();
    propagator.inject(&propagator.extract(&first), &mut second);

    assert_eq!(first.get("traceparent"), second.get("traceparent"));
}

#[test]
fn baggage_travels_with_trace_identity() {
    let propagator = Propagator::new();
    let cx = sampled_context().with_baggage(vec![KeyValue::new("tenant", "acme")]);
    let mut headers = Headers::new();
    propagator.inject(&cx, &mut headers);

    assert!(headers["baggage"].contains("tenant=acme"));

    let extracted = propagator.extract(&headers);
    assert_eq!(
        extracted.baggage().get("tenant").map(|v| v.to_string()),
        Some("acme".to_string())
    );
    assert_eq!(extracted.span().span_context().trace_id().to_string(), TRACE_ID);
}

#[test]
fn case_variant_header_names_are_understood() {
    let propagator = Propagator::new();
    let mut headers = Headers::new();
    headers.insert("Traceparent".into(), format!("00-{TRACE_ID}-{SPAN_ID}-01"));

    let extracted = propagator.extract(&headers);
    assert_eq!(extracted.span().span_context().trace_id().to_string(), TRACE_ID);
}

#[test]
fn inject_current_uses_the_active_tracing_span() {
    let capture = common::SpanCapture::install();
    let propagator = Propagator::new();
    let mut headers = Headers::new();

    let span = tracing::info_span!("outer");
    let expected = span.context().span().span_context().clone();
    span.in_scope(|| propagator.inject_current(&mut headers));
    drop(span);

    let extracted = propagator.extract(&headers);
    let extracted_span = extracted.span();
    let sc = extracted_span.span_context();
    assert_eq!(sc.trace_id(), expected.trace_id());
    assert_eq!(sc.span_id(), expected.span_id());
    assert_eq!(capture.spans_named("outer").len(), 1);
}
