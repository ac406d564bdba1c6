//! Process roles: wire config, telemetry and the broker into a publisher or a
//! consumer, run until cancelled, then shut everything down in order.
//!
//! Telemetry starts first and stops last so that every span produced by the
//! role is exported.

use crate::config::Config;
use crate::consumer::{Consumer, ConsumerOptions, LoggingHandler};
use crate::error::Result;
use crate::mq::{Broker, NatsBroker};
use crate::publisher::Publisher;
use crate::telemetry::{DEFAULT_SHUTDOWN_TIMEOUT, Telemetry, TelemetryConfig};
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const PUBLISHER_SERVICE: &str = "publisher";
pub const CONSUMER_SERVICE: &str = "consumer";

fn telemetry_config(config: &Config, service_name: &str) -> TelemetryConfig {
    TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: service_name.to_string(),
        log_level: config.log_level.clone(),
        metrics_namespace: config.messaging.metrics_namespace.clone(),
    }
}

async fn stop_telemetry(telemetry: Telemetry) {
    info!("shutting down telemetry");
    if let Err(e) = telemetry.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await {
        error!(error = %e, "telemetry shutdown incomplete");
    }
}

/// Publish a work item every tick until `cancel` fires.
pub async fn run_publisher(config: Config, cancel: CancellationToken) -> Result<()> {
    let telemetry = Telemetry::start(telemetry_config(&config, PUBLISHER_SERVICE))?;

    let result = async {
        let broker = Arc::new(
            NatsBroker::connect(&config.nats_url, config.nats_token.as_ref()).await?,
        );
        broker.ensure_stream(&config.messaging.stream_spec()).await?;

        let publisher = Publisher::new(
            Arc::clone(&broker),
            telemetry.propagator(),
            config.messaging.subject_prefix.clone(),
        );
        publisher
            .run(
                config.messaging.publish_interval(),
                Bytes::from(config.messaging.payload.clone()),
                cancel,
            )
            .await;

        broker.close().await
    }
    .await;

    if let Err(e) = &result {
        error!(error = %e, "publisher failed");
    }
    stop_telemetry(telemetry).await;
    result
}

/// Process deliveries with the logging handler until `cancel` fires.
pub async fn run_consumer(config: Config, cancel: CancellationToken) -> Result<()> {
    let telemetry = Telemetry::start(telemetry_config(&config, CONSUMER_SERVICE))?;

    let result = async {
        let broker = NatsBroker::connect(&config.nats_url, config.nats_token.as_ref()).await?;
        let consumer_spec = config.messaging.consumer_spec();
        broker.ensure_stream(&config.messaging.stream_spec()).await?;
        broker.ensure_consumer(&consumer_spec).await?;

        let subscription = broker.subscribe(&consumer_spec).await?;
        let consumer = Consumer::new(
            LoggingHandler,
            telemetry.propagator(),
            ConsumerOptions {
                ack_policy: config.messaging.ack_policy,
                max_in_flight: config.messaging.max_in_flight,
            },
        );
        let outcome = consumer.run(subscription, cancel).await;

        broker.close().await?;
        outcome
    }
    .await;

    if let Err(e) = &result {
        error!(error = %e, "consumer failed");
    }
    stop_telemetry(telemetry).await;
    result
}
