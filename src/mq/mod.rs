//! Broker abstraction: stream/consumer provisioning, async publish, and
//! explicit-ack subscriptions.
//!
//! The broker is an opaque durable service. [`nats::NatsBroker`] talks to NATS
//! JetStream; [`memory::MemoryBroker`] keeps the same contract in-process.

pub mod memory;
pub mod nats;

use crate::error::Result;
use crate::model::{Message, PublishAck, WorkItem};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

pub use memory::MemoryBroker;
pub use nats::NatsBroker;

/// A durable, work-queue-retention stream bound to wildcard subjects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub name: String,
    /// Subject filters, e.g. `events.>`.
    pub subjects: Vec<String>,
    /// How long the broker remembers idempotency keys.
    pub duplicate_window: Duration,
}

/// A durable consumer with explicit acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSpec {
    pub stream: String,
    pub durable_name: String,
    pub filter_subject: Option<String>,
    /// Redelivery delay for deliveries that are never settled.
    pub ack_wait: Duration,
}

/// Broker acceptance of a publish, awaited separately from submission.
///
/// Dropping it abandons the confirmation, not the publish.
pub struct PendingAck {
    inner: BoxFuture<'static, Result<PublishAck>>,
}

impl PendingAck {
    pub fn new(fut: impl Future<Output = Result<PublishAck>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(fut),
        }
    }

    /// An already-resolved confirmation.
    pub fn ready(result: Result<PublishAck>) -> Self {
        Self::new(std::future::ready(result))
    }
}

impl Future for PendingAck {
    type Output = Result<PublishAck>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for PendingAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PendingAck")
    }
}

/// One delivered message awaiting settlement.
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    fn message(&self) -> &Message;

    /// Confirm processing; the broker removes the item.
    async fn ack(&self) -> Result<()>;

    /// Reject processing; the broker redelivers the item.
    async fn nak(&self) -> Result<()>;
}

/// Stream of deliveries from one durable consumer.
#[async_trait]
pub trait Subscription: Send + 'static {
    type Delivery: Delivery;

    /// Next delivery. `None` means the broker closed the subscription.
    async fn next(&mut self) -> Option<Result<Self::Delivery>>;

    /// Release the subscription.
    async fn stop(self) -> Result<()>;
}

/// Operations the publisher and consumer need from a broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Subscription: Subscription;

    /// Create or update a stream. Safe to repeat with identical config.
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<()>;

    /// Create or update a durable consumer. Safe to repeat with identical config.
    async fn ensure_consumer(&self, spec: &ConsumerSpec) -> Result<()>;

    /// Submit a publish; the returned future resolves once the item is stored.
    async fn publish_async(&self, item: WorkItem) -> Result<PendingAck>;

    async fn subscribe(&self, spec: &ConsumerSpec) -> Result<Self::Subscription>;
}

/// NATS subject matching: `*` matches one token, a trailing `>` one or more.
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return filter_tokens.next().is_none(),
            (Some("*"), Some(s)) if !s.is_empty() => {}
            (Some(f), Some(s)) if f == s && !s.is_empty() => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_wildcard_matches_one_or_more_tokens() {
        assert!(subject_matches("events.>", "events.download.abc"));
        assert!(subject_matches("events.>", "events.x"));
        assert!(!subject_matches("events.>", "events"));
        assert!(!subject_matches("events.>", "other.download"));
    }

    #[test]
    fn single_wildcard_matches_exactly_one_token() {
        assert!(subject_matches("events.*.abc", "events.download.abc"));
        assert!(!subject_matches("events.*", "events.download.abc"));
        assert!(!subject_matches("events.*", "events."));
    }

    #[test]
    fn literal_subjects_match_exactly() {
        assert!(subject_matches("events.download", "events.download"));
        assert!(!subject_matches("events.download", "events.download.abc"));
    }

    #[tokio::test]
    async fn pending_ack_resolves_to_inner_result() {
        let ack = PublishAck {
            stream: "download".into(),
            sequence: 7,
            duplicate: false,
        };
        let pending = PendingAck::ready(Ok(ack.clone()));
        assert_eq!(pending.await.unwrap(), ack);
    }
}
