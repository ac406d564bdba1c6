//! OpenTelemetry initialization and lifecycle.
//!
//! Sets up tracer, meter and logger providers bound to one service resource,
//! installs them (and the composite propagator) as process-wide defaults, and
//! wires tracing-subscriber with OTel layers. Telemetry is a hard startup
//! dependency: any construction failure is returned, there is no degraded mode.
//!
//! Providers are installed exactly once per process. Shutdown goes through the
//! [`ShutdownRegistry`] returned by [`Telemetry::start`].

pub mod local;
pub mod messaging;
pub mod metrics;
pub mod propagation;
pub mod shutdown;

pub use local::LocalMetrics;
pub use propagation::Propagator;
pub use shutdown::{DEFAULT_SHUTDOWN_TIMEOUT, ShutdownContext, ShutdownRegistry};

use crate::error::{Error, Result};
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource as semres;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Delay between span batch exports.
pub const TRACE_BATCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Interval of the periodic OTLP metric export.
pub const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(2);

static RESOURCE: OnceLock<Resource> = OnceLock::new();
static STARTED: AtomicBool = AtomicBool::new(false);

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// OTLP gRPC collector endpoint (e.g. "http://otel-collector:4317").
    pub endpoint: String,
    /// The service name reported in telemetry signals.
    pub service_name: String,
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub log_level: String,
    /// Prefix for metric names in the local scrape output.
    pub metrics_namespace: String,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            service_name: service_name.into(),
            log_level: "info".to_string(),
            metrics_namespace: "nats_tracing".to_string(),
        }
    }
}

/// Running telemetry: the propagator handed to components, the local metric
/// reader, and the shutdown callbacks of every provider.
#[derive(Debug)]
pub struct Telemetry {
    propagator: Propagator,
    local_metrics: LocalMetrics,
    registry: ShutdownRegistry,
}

impl Telemetry {
    /// Initialize tracing, metrics and logs via OTLP.
    ///
    /// # Errors
    ///
    /// Returns an error if telemetry was already started in this process, if
    /// any OTLP exporter fails to build, or if the tracing subscriber cannot be
    /// installed.
    pub fn start(config: TelemetryConfig) -> Result<Self> {
        use opentelemetry::trace::TracerProvider as _;
        use opentelemetry_otlp::WithExportConfig as _;
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::layer::SubscriberExt as _;
        use tracing_subscriber::util::SubscriberInitExt as _;

        if STARTED.swap(true, Ordering::SeqCst) {
            return Err(Error::Telemetry(
                "telemetry already initialized in this process".to_string(),
            ));
        }

        let resource = resource(&config.service_name).clone();

        // --- Traces ---
        let span_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.endpoint)
            .build()
            .map_err(|e| Error::Telemetry(format!("failed to create OTLP span exporter: {e}")))?;

        let batch = opentelemetry_sdk::trace::BatchSpanProcessor::builder(span_exporter)
            .with_batch_config(
                opentelemetry_sdk::trace::BatchConfigBuilder::default()
                    .with_scheduled_delay(TRACE_BATCH_TIMEOUT)
                    .build(),
            )
            .build();

        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_span_processor(batch)
            .with_resource(resource.clone())
            .build();

        let tracer = tracer_provider.tracer("nats-tracing");
        let otel_trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        // --- Metrics ---
        let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(&config.endpoint)
            .build()
            .map_err(|e| Error::Telemetry(format!("failed to create OTLP metric exporter: {e}")))?;

        let periodic = opentelemetry_sdk::metrics::PeriodicReader::builder(metric_exporter)
            .with_interval(METRIC_EXPORT_INTERVAL)
            .build();
        let (local_metrics, local_reader) = LocalMetrics::new(&config.metrics_namespace)?;

        let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(periodic)
            .with_reader(local_reader)
            .with_resource(resource.clone())
            .build();

        // --- Logs ---
        let log_exporter = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(&config.endpoint)
            .build()
            .map_err(|e| Error::Telemetry(format!("failed to create OTLP log exporter: {e}")))?;

        let logger_provider = opentelemetry_sdk::logs::SdkLoggerProvider::builder()
            .with_batch_exporter(log_exporter)
            .with_resource(resource)
            .build();

        let otel_log_layer = opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(
            &logger_provider,
        );

        // --- Subscriber ---
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_level))
            .map_err(|e| Error::Telemetry(format!("bad log filter: {e}")))?;

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .with(otel_trace_layer)
            .with(otel_log_layer)
            .try_init()
            .map_err(|e| Error::Telemetry(format!("failed to init tracing subscriber: {e}")))?;

        // --- Globals ---
        opentelemetry::global::set_text_map_propagator(propagation::composite());
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        opentelemetry::global::set_meter_provider(meter_provider.clone());

        let mut registry = ShutdownRegistry::new();
        registry.register_blocking("tracer-provider", move |remaining| {
            tracer_provider
                .shutdown_with_timeout(remaining)
                .map_err(|e| Error::Shutdown {
                    name: "tracer-provider".to_string(),
                    reason: e.to_string(),
                })
        });
        registry.register_blocking("meter-provider", move |remaining| {
            meter_provider
                .shutdown_with_timeout(remaining)
                .map_err(|e| Error::Shutdown {
                    name: "meter-provider".to_string(),
                    reason: e.to_string(),
                })
        });
        registry.register_blocking("logger-provider", move |remaining| {
            logger_provider
                .shutdown_with_timeout(remaining)
                .map_err(|e| Error::Shutdown {
                    name: "logger-provider".to_string(),
                    reason: e.to_string(),
                })
        });

        tracing::info!(
            service = %config.service_name,
            endpoint = %config.endpoint,
            "telemetry started"
        );

        Ok(Self {
            propagator: Propagator::new(),
            local_metrics,
            registry,
        })
    }

    /// The header codec to hand to publishers and consumers.
    pub fn propagator(&self) -> Propagator {
        self.propagator.clone()
    }

    /// In-process scrape handle for the meter provider.
    pub fn local_metrics(&self) -> &LocalMetrics {
        &self.local_metrics
    }

    /// Flush and stop every provider concurrently within `timeout`.
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        self.registry.shutdown(timeout).await
    }
}

/// The service resource, built once per process.
///
/// Service name plus attributes derived from the environment
/// (`OTEL_RESOURCE_ATTRIBUTES`), the process, and the host. Later calls return
/// the first resource regardless of `service_name`.
pub fn resource(service_name: &str) -> &'static Resource {
    RESOURCE.get_or_init(|| {
        Resource::builder()
            .with_service_name(service_name.to_string())
            .with_attributes(process_and_host_attributes())
            .build()
    })
}

fn process_and_host_attributes() -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new(semres::PROCESS_PID, i64::from(std::process::id())),
        KeyValue::new(semres::OS_TYPE, std::env::consts::OS),
        KeyValue::new(semres::HOST_ARCH, std::env::consts::ARCH),
    ];
    if let Some(exe) = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
    {
        attrs.push(KeyValue::new(semres::PROCESS_EXECUTABLE_NAME, exe));
    }
    if let Some(host) = host_name() {
        attrs.push(KeyValue::new(semres::HOST_NAME, host));
    }
    attrs
}

fn host_name() -> Option<String> {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().trim().to_string())
        .filter(|h| !h.is_empty())
}
