//! In-process broker with work-queue semantics.
//!
//! Each stored item is delivered to exactly one subscriber and removed once
//! acked. Naked or expired deliveries go back to the head of the queue.
//! Idempotency keys are remembered per stream for the broker's lifetime, so a
//! republished attempt is reported as a duplicate and stored once.
//!
//! Counters (`acked`, `nacked`, `redeliveries`, ...) let callers observe
//! settlement without reaching into the queue.

use super::{
    Broker, ConsumerSpec, Delivery, PendingAck, StreamSpec, Subscription, subject_matches,
};
use crate::error::{Error, Result};
use crate::model::{Message, PublishAck, WorkItem};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Clone)]
struct Stored {
    sequence: u64,
    stream: String,
    message: Message,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    streams: BTreeMap<String, StreamSpec>,
    consumers: BTreeMap<(String, String), ConsumerSpec>,
    next_sequence: u64,
    seen_keys: HashMap<(String, String), u64>,
    queues: HashMap<String, VecDeque<Stored>>,
    unacked: HashMap<u64, Stored>,
    accepted: u64,
    duplicates: u64,
    acked: Vec<u64>,
    nacked: Vec<u64>,
    redeliveries: u64,
    failing_settlements: u32,
    closed: bool,
}

/// Shared in-memory broker. Clones refer to the same queues.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    ready: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items accepted for storage (duplicates excluded).
    pub async fn accepted(&self) -> u64 {
        self.state.lock().await.accepted
    }

    /// Publishes dropped because their idempotency key was already seen.
    pub async fn duplicates(&self) -> u64 {
        self.state.lock().await.duplicates
    }

    /// Sequences acked so far, in ack order.
    pub async fn acked(&self) -> Vec<u64> {
        self.state.lock().await.acked.clone()
    }

    /// Sequences naked so far, in nak order.
    pub async fn nacked(&self) -> Vec<u64> {
        self.state.lock().await.nacked.clone()
    }

    /// Deliveries of an item that had been delivered before.
    pub async fn redeliveries(&self) -> u64 {
        self.state.lock().await.redeliveries
    }

    /// Items waiting for delivery on `stream`.
    pub async fn pending(&self, stream: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(stream)
            .map_or(0, VecDeque::len)
    }

    /// Deliveries handed out but not yet settled.
    pub async fn unacked(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    /// Whether a delivery of `subject` is handed out and still unsettled.
    pub async fn awaiting_settlement(&self, subject: &str) -> bool {
        self.state
            .lock()
            .await
            .unacked
            .values()
            .any(|stored| stored.message.subject == subject)
    }

    /// Make the next `count` ack/nak calls fail without settling.
    pub async fn fail_next_settlements(&self, count: u32) {
        self.state.lock().await.failing_settlements = count;
    }

    /// Requeue every unsettled delivery, as if its ack wait elapsed.
    pub async fn expire_unacked(&self) -> usize {
        let mut state = self.state.lock().await;
        let mut expired: Vec<Stored> = state.unacked.drain().map(|(_, s)| s).collect();
        expired.sort_by_key(|s| std::cmp::Reverse(s.sequence));
        let count = expired.len();
        for stored in expired {
            state
                .queues
                .entry(stored.stream.clone())
                .or_default()
                .push_front(stored);
        }
        drop(state);
        self.ready.notify_waiters();
        count
    }

    /// Close every subscription; `next` returns `None` from now on.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.ready.notify_waiters();
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Subscription = MemorySubscription;

    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        let overlaps = state.streams.values().any(|other| {
            other.name != spec.name
                && other
                    .subjects
                    .iter()
                    .any(|s| spec.subjects.iter().any(|t| s == t))
        });
        if overlaps {
            return Err(Error::Provisioning {
                what: format!("stream {}", spec.name),
                reason: "subjects overlap with an existing stream".to_string(),
            });
        }
        state.streams.insert(spec.name.clone(), spec.clone());
        state.queues.entry(spec.name.clone()).or_default();
        Ok(())
    }

    async fn ensure_consumer(&self, spec: &ConsumerSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.streams.contains_key(&spec.stream) {
            return Err(Error::Provisioning {
                what: format!("consumer {}", spec.durable_name),
                reason: format!("stream {} not found", spec.stream),
            });
        }
        state.consumers.insert(
            (spec.stream.clone(), spec.durable_name.clone()),
            spec.clone(),
        );
        Ok(())
    }

    async fn publish_async(&self, item: WorkItem) -> Result<PendingAck> {
        let mut state = self.state.lock().await;
        let stream = state
            .streams
            .values()
            .find(|s| s.subjects.iter().any(|f| subject_matches(f, &item.subject)))
            .map(|s| s.name.clone())
            .ok_or_else(|| Error::Publish {
                subject: item.subject.clone(),
                reason: "no stream matches subject".to_string(),
            })?;

        let key = (stream.clone(), item.idempotency_key.clone());
        if let Some(&sequence) = state.seen_keys.get(&key) {
            state.duplicates += 1;
            return Ok(PendingAck::ready(Ok(PublishAck {
                stream,
                sequence,
                duplicate: true,
            })));
        }

        state.next_sequence += 1;
        state.accepted += 1;
        let sequence = state.next_sequence;
        state.seen_keys.insert(key, sequence);
        let stored = Stored {
            sequence,
            stream: stream.clone(),
            message: item.to_message(),
            deliveries: 0,
        };
        state.queues.entry(stream.clone()).or_default().push_back(stored);
        drop(state);
        self.ready.notify_waiters();

        Ok(PendingAck::ready(Ok(PublishAck {
            stream,
            sequence,
            duplicate: false,
        })))
    }

    async fn subscribe(&self, spec: &ConsumerSpec) -> Result<MemorySubscription> {
        let state = self.state.lock().await;
        if !state
            .consumers
            .contains_key(&(spec.stream.clone(), spec.durable_name.clone()))
        {
            return Err(Error::Subscription(format!(
                "consumer {} not found on stream {}",
                spec.durable_name, spec.stream
            )));
        }
        Ok(MemorySubscription {
            broker: self.clone(),
            stream: spec.stream.clone(),
            filter: spec.filter_subject.clone(),
        })
    }
}

/// Pull subscription on one stream of a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemorySubscription {
    broker: MemoryBroker,
    stream: String,
    filter: Option<String>,
}

impl MemorySubscription {
    async fn try_next(&self) -> Option<Option<Result<MemoryDelivery>>> {
        let mut state = self.broker.state.lock().await;
        if state.closed {
            return Some(None);
        }
        let queue = state.queues.get_mut(&self.stream)?;
        let position = queue.iter().position(|s| {
            self.filter
                .as_deref()
                .is_none_or(|f| subject_matches(f, &s.message.subject))
        })?;
        let mut stored = queue.remove(position)?;
        stored.deliveries += 1;
        if stored.deliveries > 1 {
            state.redeliveries += 1;
        }
        let delivery = MemoryDelivery {
            broker: self.broker.clone(),
            sequence: stored.sequence,
            message: stored.message.clone(),
        };
        state.unacked.insert(stored.sequence, stored);
        Some(Some(Ok(delivery)))
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    type Delivery = MemoryDelivery;

    async fn next(&mut self) -> Option<Result<MemoryDelivery>> {
        loop {
            let notified = self.broker.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(next) = self.try_next().await {
                return next;
            }
            notified.await;
        }
    }

    async fn stop(self) -> Result<()> {
        Ok(())
    }
}

/// A delivery from a [`MemoryBroker`], settled by sequence number.
#[derive(Debug)]
pub struct MemoryDelivery {
    broker: MemoryBroker,
    sequence: u64,
    message: Message,
}

impl MemoryDelivery {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    async fn settle(&self, ack: bool) -> Result<()> {
        let mut state = self.broker.state.lock().await;
        if state.failing_settlements > 0 {
            state.failing_settlements -= 1;
            return Err(Error::Ack(format!(
                "injected failure settling sequence {}",
                self.sequence
            )));
        }
        let Some(stored) = state.unacked.remove(&self.sequence) else {
            return Err(Error::Ack(format!(
                "sequence {} is not awaiting settlement",
                self.sequence
            )));
        };
        if ack {
            state.acked.push(self.sequence);
        } else {
            state.nacked.push(self.sequence);
            state
                .queues
                .entry(stored.stream.clone())
                .or_default()
                .push_front(stored);
            drop(state);
            self.broker.ready.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn message(&self) -> &Message {
        &self.message
    }

    async fn ack(&self) -> Result<()> {
        self.settle(true).await
    }

    async fn nak(&self) -> Result<()> {
        self.settle(false).await
    }
}
