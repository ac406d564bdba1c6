//! Publisher: turns ticks into traced, deduplicated work items.
//!
//! Each publish runs under its own `publish` span. The span context is written
//! into the message headers before submission so the consumer can continue
//! the same trace.

use crate::error::{Error, Result};
use crate::model::{Headers, PublishAck, WorkItem, new_idempotency_key};
use crate::mq::Broker;
use crate::telemetry::messaging::{record_sequence, start_publish_span, start_tick_span};
use crate::telemetry::{Propagator, metrics};
use bytes::Bytes;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Publishes work items under one subject prefix.
pub struct Publisher<B> {
    broker: Arc<B>,
    propagator: Propagator,
    subject_prefix: String,
}

impl<B> Clone for Publisher<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            propagator: self.propagator.clone(),
            subject_prefix: self.subject_prefix.clone(),
        }
    }
}

impl<B: Broker> Publisher<B> {
    pub fn new(broker: Arc<B>, propagator: Propagator, subject_prefix: impl Into<String>) -> Self {
        Self {
            broker,
            propagator,
            subject_prefix: subject_prefix.into(),
        }
    }

    /// Subject for an item keyed `key`: `<prefix>.<key>`.
    pub fn subject_for(&self, key: &str) -> String {
        format!("{}.{}", self.subject_prefix, key)
    }

    /// Publish `payload` as a new work item with a fresh idempotency key.
    pub async fn publish(&self, payload: impl Into<Bytes>) -> Result<PublishAck> {
        let key = new_idempotency_key();
        self.publish_with_key(&key, payload).await
    }

    /// Publish with a caller-chosen idempotency key.
    ///
    /// Reusing a key inside the broker's duplicate window retries the same
    /// attempt: the broker stores it once and reports `duplicate`. Failures are
    /// returned as-is, nothing is retried here.
    pub async fn publish_with_key(
        &self,
        key: &str,
        payload: impl Into<Bytes>,
    ) -> Result<PublishAck> {
        let subject = self.subject_for(key);
        let span = start_publish_span(&subject, key);

        let mut headers = Headers::new();
        self.propagator.inject(&span.context(), &mut headers);

        let item = WorkItem::new(subject.clone(), key)
            .payload(payload)
            .headers(headers);

        let result = async {
            let pending = self.broker.publish_async(item).await?;
            pending.await
        }
        .instrument(span.clone())
        .await;

        let _guard = span.enter();
        match result {
            Ok(ack) => {
                record_sequence(&span, ack.sequence);
                if ack.duplicate {
                    metrics::messages_published().add(1, &[KeyValue::new("result", "duplicate")]);
                    info!(
                        subject = %subject,
                        sequence = ack.sequence,
                        "duplicate publish ignored by broker"
                    );
                } else {
                    metrics::messages_published().add(1, &[KeyValue::new("result", "ok")]);
                    info!(
                        subject = %subject,
                        stream = %ack.stream,
                        sequence = ack.sequence,
                        "published message"
                    );
                }
                Ok(ack)
            }
            Err(e) => {
                metrics::messages_published().add(1, &[KeyValue::new("result", "error")]);
                error!(subject = %subject, error = %e, "failed to publish message");
                Err(match e {
                    Error::Publish { .. } => e,
                    other => Error::Publish {
                        subject,
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Publish `payload` every `interval` until `cancel` fires.
    ///
    /// The first tick fires one `interval` after the call. Each tick runs
    /// under a `tick` span that parents the publish. A failed publish is logged
    /// and the loop keeps going. Cancellation is observed between ticks, so an
    /// in-flight publish completes first.
    pub async fn run(&self, interval: Duration, payload: Bytes, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            prefix = %self.subject_prefix,
            interval_ms = interval.as_millis() as u64,
            "publisher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let tick = start_tick_span();
            async {
                debug!("tick");
                if let Err(e) = self.publish(payload.clone()).await {
                    warn!(error = %e, "tick publish failed, continuing");
                }
            }
            .instrument(tick)
            .await;
        }

        info!("publisher stopped");
    }
}
