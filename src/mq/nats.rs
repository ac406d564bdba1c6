//! NATS JetStream broker.
//!
//! Connection, stream/consumer provisioning, deduplicated async publish, and
//! pull subscriptions with explicit acks. Reconnection is left to the client.

use super::{Broker, ConsumerSpec, Delivery, PendingAck, StreamSpec, Subscription};
use crate::config::secrets::{ExposeSecret, SecretString};
use crate::error::{Error, Result};
use crate::model::{Headers, Message, PublishAck, WorkItem};
use async_nats::jetstream::{self, AckKind, consumer::pull, context::Publish, stream};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

/// Client name reported to the server.
const CLIENT_NAME: &str = "nats-tracing";

/// Connected JetStream context.
#[derive(Clone)]
pub struct NatsBroker {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl std::fmt::Debug for NatsBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBroker").finish_non_exhaustive()
    }
}

impl NatsBroker {
    /// Connect to the server at `url`. No retry: a failure here is fatal.
    pub async fn connect(url: &str, token: Option<&SecretString>) -> Result<Self> {
        let mut options = async_nats::ConnectOptions::new().name(CLIENT_NAME);
        if let Some(token) = token {
            options = options.token(token.expose_secret().to_string());
        }

        let client = options.connect(url).await.map_err(|e| Error::Connect {
            address: url.to_string(),
            reason: e.to_string(),
        })?;
        info!(url, "connected to nats");

        let jetstream = jetstream::new(client.clone());
        Ok(Self { client, jetstream })
    }

    /// Flush buffered publishes before the connection is dropped.
    pub async fn close(&self) -> Result<()> {
        debug!("flushing nats connection");
        self.client
            .flush()
            .await
            .map_err(|e| Error::Other(format!("failed to flush nats connection: {e}")))?;
        info!("closed nats connection");
        Ok(())
    }

    async fn stream(&self, name: &str) -> Result<jetstream::stream::Stream> {
        self.jetstream
            .get_stream(name)
            .await
            .map_err(|e| Error::Provisioning {
                what: format!("stream {name}"),
                reason: e.to_string(),
            })
    }
}

fn stream_config(spec: &StreamSpec) -> stream::Config {
    stream::Config {
        name: spec.name.clone(),
        subjects: spec.subjects.clone(),
        retention: stream::RetentionPolicy::WorkQueue,
        duplicate_window: spec.duplicate_window,
        ..Default::default()
    }
}

fn consumer_config(spec: &ConsumerSpec) -> pull::Config {
    pull::Config {
        durable_name: Some(spec.durable_name.clone()),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        ack_wait: spec.ack_wait,
        filter_subject: spec.filter_subject.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn to_header_map(headers: &Headers) -> async_nats::HeaderMap {
    let mut map = async_nats::HeaderMap::new();
    for (key, value) in headers {
        map.insert(key.as_str(), value.as_str());
    }
    map
}

fn from_header_map(map: Option<&async_nats::HeaderMap>) -> Headers {
    let mut headers = Headers::new();
    if let Some(map) = map {
        for (name, values) in map.iter() {
            if let Some(value) = values.first() {
                headers.insert(name.to_string(), value.to_string());
            }
        }
    }
    headers
}

#[async_trait]
impl Broker for NatsBroker {
    type Subscription = NatsSubscription;

    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<()> {
        let config = stream_config(spec);
        let provisioning = |e: String| Error::Provisioning {
            what: format!("stream {}", spec.name),
            reason: e,
        };

        self.jetstream
            .get_or_create_stream(config.clone())
            .await
            .map_err(|e| provisioning(e.to_string()))?;
        self.jetstream
            .update_stream(&config)
            .await
            .map_err(|e| provisioning(e.to_string()))?;

        info!(stream = %spec.name, subjects = ?spec.subjects, "stream ready");
        Ok(())
    }

    async fn ensure_consumer(&self, spec: &ConsumerSpec) -> Result<()> {
        let stream = self.stream(&spec.stream).await?;
        stream
            .create_consumer(consumer_config(spec))
            .await
            .map_err(|e| Error::Provisioning {
                what: format!("consumer {}", spec.durable_name),
                reason: e.to_string(),
            })?;

        info!(stream = %spec.stream, consumer = %spec.durable_name, "consumer ready");
        Ok(())
    }

    async fn publish_async(&self, item: WorkItem) -> Result<PendingAck> {
        let subject = item.subject.clone();
        let publish = Publish::build()
            .payload(item.payload)
            .headers(to_header_map(&item.headers))
            .message_id(item.idempotency_key.as_str());

        let ack = self
            .jetstream
            .send_publish(item.subject, publish)
            .await
            .map_err(|e| Error::Publish {
                subject: subject.clone(),
                reason: e.to_string(),
            })?;

        Ok(PendingAck::new(async move {
            let ack = ack.await.map_err(|e| Error::Publish {
                subject,
                reason: e.to_string(),
            })?;
            Ok(PublishAck {
                stream: ack.stream,
                sequence: ack.sequence,
                duplicate: ack.duplicate,
            })
        }))
    }

    async fn subscribe(&self, spec: &ConsumerSpec) -> Result<NatsSubscription> {
        let stream = self.stream(&spec.stream).await?;
        let consumer: jetstream::consumer::Consumer<pull::Config> = stream
            .get_consumer(&spec.durable_name)
            .await
            .map_err(|e| Error::Subscription(e.to_string()))?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Subscription(e.to_string()))?;
        Ok(NatsSubscription { messages })
    }
}

/// Pull-consumer message stream.
pub struct NatsSubscription {
    messages: pull::Stream,
}

#[async_trait]
impl Subscription for NatsSubscription {
    type Delivery = NatsDelivery;

    async fn next(&mut self) -> Option<Result<NatsDelivery>> {
        let next = self.messages.next().await?;
        Some(
            next.map(NatsDelivery::new)
                .map_err(|e| Error::Subscription(e.to_string())),
        )
    }

    async fn stop(self) -> Result<()> {
        debug!("stopping consumer subscription");
        drop(self.messages);
        Ok(())
    }
}

/// A JetStream message plus its header-converted view.
pub struct NatsDelivery {
    inner: jetstream::Message,
    message: Message,
}

impl NatsDelivery {
    fn new(inner: jetstream::Message) -> Self {
        let message = Message {
            subject: inner.message.subject.to_string(),
            headers: from_header_map(inner.message.headers.as_ref()),
            payload: inner.message.payload.clone(),
        };
        Self { inner, message }
    }
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn message(&self) -> &Message {
        &self.message
    }

    async fn ack(&self) -> Result<()> {
        self.inner
            .ack()
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }

    async fn nak(&self) -> Result<()> {
        self.inner
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }
}
