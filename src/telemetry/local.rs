//! Pull-based metric scrape for in-process inspection.
//!
//! The OpenTelemetry Prometheus exporter is registered as a second reader on
//! the `SdkMeterProvider`; it feeds a private `prometheus::Registry` that is
//! gathered and text-encoded on demand.

use crate::error::{Error, Result};
use opentelemetry_prometheus::PrometheusExporter;
use prometheus::{Encoder, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct LocalMetrics {
    registry: Registry,
}

impl LocalMetrics {
    /// Build the scrape handle and the reader to install on the meter provider.
    ///
    /// Metric names are prefixed with `namespace` (empty for bare names).
    pub fn new(namespace: &str) -> Result<(Self, PrometheusExporter)> {
        let registry = Registry::new();
        let mut builder = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .without_scope_info()
            .without_target_info()
            .without_units();
        if !namespace.is_empty() {
            builder = builder.with_namespace(namespace);
        }
        let exporter = builder
            .build()
            .map_err(|e| Error::Telemetry(format!("failed to create prometheus reader: {e}")))?;
        Ok((Self { registry }, exporter))
    }

    /// Current state of every instrument in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| Error::Telemetry(format!("failed to encode metrics: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Telemetry(format!("metrics output was not valid UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::KeyValue;
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::SdkMeterProvider;

    fn provider(namespace: &str) -> (LocalMetrics, SdkMeterProvider) {
        let (local, reader) = LocalMetrics::new(namespace).unwrap();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        (local, provider)
    }

    #[test]
    fn renders_counters_and_histograms() {
        let (local, provider) = provider("nats_tracing");
        let meter = provider.meter("local-test");

        let counter = meter.u64_counter("messaging.received").build();
        counter.add(2, &[KeyValue::new("result", "ok")]);
        counter.add(1, &[KeyValue::new("result", "ok")]);

        let histogram = meter.f64_histogram("messaging.handler.duration_ms").build();
        histogram.record(4.0, &[]);
        histogram.record(6.0, &[]);

        let text = local.render().unwrap();
        assert!(
            text.contains("nats_tracing_messaging_received_total{result=\"ok\"} 3"),
            "{text}"
        );
        assert!(
            text.contains("nats_tracing_messaging_handler_duration_ms_count 2"),
            "{text}"
        );
        assert!(
            text.contains("nats_tracing_messaging_handler_duration_ms_sum 10"),
            "{text}"
        );
    }

    #[test]
    fn label_values_are_escaped() {
        let (local, provider) = provider("nats_tracing");
        let counter = provider
            .meter("local-test")
            .u64_counter("messaging.received")
            .build();
        counter.add(1, &[KeyValue::new("subject", "a\"b\nc")]);

        let text = local.render().unwrap();
        assert!(
            text.contains(r#"nats_tracing_messaging_received_total{subject="a\"b\nc"} 1"#),
            "{text}"
        );
        assert!(!text.lines().any(|line| line.starts_with("c\"")), "{text}");
    }

    #[test]
    fn empty_namespace_keeps_bare_names() {
        let (local, provider) = provider("");
        provider
            .meter("local-test")
            .u64_counter("messaging.settled")
            .build()
            .add(1, &[]);

        let text = local.render().unwrap();
        assert!(text.contains("\nmessaging_settled_total 1"), "{text}");
    }
}
