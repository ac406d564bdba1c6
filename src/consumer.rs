//! Consumer: pulls deliveries, resumes their trace, runs the handler, settles.
//!
//! Every delivery runs in its own task (bounded by `max_in_flight`). The
//! acknowledgment is sent strictly after the handler future has completed.
//! On cancellation the loop stops pulling, lets in-flight handlers finish, and
//! only then releases the subscription.

use crate::error::{Error, Result};
use crate::model::Message;
use crate::mq::{Delivery, Subscription};
use crate::telemetry::messaging::{record_disposition, start_receive_span};
use crate::telemetry::{Propagator, metrics};
use async_trait::async_trait;
use futures::FutureExt;
use opentelemetry::{Context, KeyValue};
use serde::Deserialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// When a delivery is acknowledged relative to the handler outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Ack once the handler returns, whatever it returned. Failed items are
    /// not retried.
    #[default]
    Always,
    /// Ack on success, nak on error or panic so the broker redelivers.
    OnSuccess,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nak,
}

impl Disposition {
    fn as_str(self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Nak => "nak",
        }
    }
}

/// Processes one delivered message.
///
/// Invoked concurrently for different messages; implementations must not
/// rely on unsynchronised shared state.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// `cx` is the context of the `received message` span, already parented
    /// on the publisher's trace.
    async fn handle(&self, cx: &Context, message: &Message) -> Result<()>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, cx: &Context, message: &Message) -> Result<()> {
        (**self).handle(cx, message).await
    }
}

/// Logs the subject and payload inside a `handle message` span.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl Handler for LoggingHandler {
    async fn handle(&self, _cx: &Context, message: &Message) -> Result<()> {
        let span = tracing::info_span!(
            "handle message",
            "messaging.destination.name" = %message.subject
        );
        async {
            info!(
                subject = %message.subject,
                data = %message.payload_text(),
                "message received"
            );
        }
        .instrument(span)
        .await;
        Ok(())
    }
}

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub ack_policy: AckPolicy,
    pub max_in_flight: usize,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            ack_policy: AckPolicy::Always,
            max_in_flight: 16,
        }
    }
}

/// Delivery loop around one [`Handler`].
pub struct Consumer<H> {
    handler: Arc<H>,
    propagator: Propagator,
    options: ConsumerOptions,
}

impl<H> Clone for Consumer<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            propagator: self.propagator.clone(),
            options: self.options.clone(),
        }
    }
}

impl<H: Handler> Consumer<H> {
    pub fn new(handler: H, propagator: Propagator, options: ConsumerOptions) -> Self {
        Self {
            handler: Arc::new(handler),
            propagator,
            options,
        }
    }

    /// Pull and process deliveries until `cancel` fires.
    ///
    /// Returns an error if the broker closes the subscription on its own.
    pub async fn run<S: Subscription>(
        &self,
        mut subscription: S,
        cancel: CancellationToken,
    ) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.options.max_in_flight.max(1)));
        let mut in_flight = JoinSet::new();

        info!(
            max_in_flight = self.options.max_in_flight,
            ack_policy = ?self.options.ack_policy,
            "consumer started"
        );

        let outcome = loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => break Err(Error::Other(e.to_string())),
                },
            };

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                next = subscription.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let consumer = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        consumer.process(delivery).await
                    });
                }
                Some(Err(e)) => warn!(error = %e, "failed to receive delivery"),
                None => {
                    break Err(Error::Subscription(
                        "subscription closed by broker".to_string(),
                    ));
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "delivery task aborted");
                }
            }
        };

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "draining in-flight deliveries");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "delivery task aborted");
            }
        }

        info!("stopping consumer subscription");
        subscription.stop().await?;
        outcome
    }

    /// Process one delivery: extract, handle, then settle.
    ///
    /// Returns `None` if the ack or nak could not be sent. That failure is only
    /// logged; the broker redelivers the item after its ack wait.
    pub async fn process<D: Delivery>(&self, delivery: D) -> Option<Disposition> {
        let message = delivery.message();
        metrics::messages_received().add(1, &[]);

        let parent = self.propagator.extract(&message.headers);
        let span = start_receive_span(&message.subject);
        if let Err(e) = span.set_parent(parent) {
            warn!(
                error = %e,
                subject = %message.subject,
                "failed to attach extracted trace context"
            );
        }
        let cx = span.context();

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.handler.handle(&cx, message))
            .catch_unwind()
            .instrument(span.clone())
            .await;
        metrics::handler_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        let handled = match outcome {
            Ok(result) => result,
            Err(panic) => Err(Error::Handler(panic_message(panic.as_ref()))),
        };

        let disposition = match (&handled, self.options.ack_policy) {
            (Ok(()), _) | (Err(_), AckPolicy::Always) => Disposition::Ack,
            (Err(_), AckPolicy::OnSuccess) => Disposition::Nak,
        };

        async {
            if let Err(e) = &handled {
                metrics::handler_failures().add(1, &[]);
                warn!(error = %e, disposition = disposition.as_str(), "handler failed");
            }

            debug!(disposition = disposition.as_str(), "settling message");
            let settled = match disposition {
                Disposition::Ack => delivery.ack().await,
                Disposition::Nak => delivery.nak().await,
            };
            record_disposition(&tracing::Span::current(), disposition.as_str());

            match settled {
                Ok(()) => {
                    metrics::messages_settled().add(
                        1,
                        &[
                            KeyValue::new("disposition", disposition.as_str()),
                            KeyValue::new("result", "ok"),
                        ],
                    );
                    debug!(disposition = disposition.as_str(), "message settled");
                    Some(disposition)
                }
                Err(e) => {
                    metrics::messages_settled().add(
                        1,
                        &[
                            KeyValue::new("disposition", disposition.as_str()),
                            KeyValue::new("result", "error"),
                        ],
                    );
                    error!(error = %e, "failed to settle message, broker will redeliver");
                    None
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_policy_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: AckPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"on_success\"").unwrap();
        assert_eq!(w.policy, AckPolicy::OnSuccess);
        let w: Wrapper = toml::from_str("policy = \"always\"").unwrap();
        assert_eq!(w.policy, AckPolicy::Always);
    }

    #[test]
    fn panic_payloads_are_described() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked: boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked: bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked");
    }
}
