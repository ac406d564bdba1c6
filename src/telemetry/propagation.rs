//! Trace context propagation through message headers.
//!
//! Trace identity travels as W3C Trace Context (`traceparent`, `tracestate`)
//! and user baggage as W3C Baggage (`baggage`). The two propagators write
//! disjoint keys and are combined into one composite, so their order does not
//! matter.
//!
//! Propagation is best-effort: extraction never fails, a missing or garbled
//! header simply yields an empty context and the next span becomes a root.

use crate::model::Headers;
use opentelemetry::Context;
use opentelemetry::propagation::{
    Extractor, Injector, TextMapCompositePropagator, TextMapPropagator,
};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use std::sync::Arc;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Wrapper to implement `Injector` for the message header map.
struct HeaderInjector<'a>(&'a mut Headers);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

/// Wrapper to implement `Extractor` for the message header map.
///
/// Exact key match first, then ASCII case-insensitive: other clients may
/// canonicalise header names (`Traceparent`).
struct HeaderExtractor<'a>(&'a Headers);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .or_else(|| {
                self.0
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(|s| s.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Codec between an OpenTelemetry [`Context`] and message headers.
///
/// Cheap to clone; handed explicitly to the publisher and consumer.
#[derive(Clone)]
pub struct Propagator {
    inner: Arc<TextMapCompositePropagator>,
}

impl std::fmt::Debug for Propagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Propagator")
            .field("fields", &self.fields())
            .finish()
    }
}

impl Default for Propagator {
    fn default() -> Self {
        Self::new()
    }
}

impl Propagator {
    /// W3C trace context composed with W3C baggage.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(composite()),
        }
    }

    /// Header keys owned by this propagator.
    pub fn fields(&self) -> Vec<String> {
        self.inner.fields().map(str::to_string).collect()
    }

    /// Write `cx` into `headers`.
    ///
    /// Every propagation key is cleared first so a stale `baggage` or
    /// `tracestate` from an earlier hop cannot survive; other keys are untouched.
    pub fn inject(&self, cx: &Context, headers: &mut Headers) {
        for field in self.inner.fields() {
            headers.remove(field);
        }
        self.inner.inject_context(cx, &mut HeaderInjector(headers));
    }

    /// Inject the context of the current `tracing` span.
    pub fn inject_current(&self, headers: &mut Headers) {
        let cx = tracing::Span::current().context();
        self.inject(&cx, headers);
    }

    /// Read a context back out of `headers`. Never fails.
    pub fn extract(&self, headers: &Headers) -> Context {
        self.inner
            .extract_with_context(&Context::new(), &HeaderExtractor(headers))
    }
}

/// The composite propagator, also installed as the process-wide default.
pub(crate) fn composite() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ])
}

/// Check if headers contain trace identity.
pub fn has_trace_context(headers: &Headers) -> bool {
    HeaderExtractor(headers).get("traceparent").is_some()
}
