//! Kafka/Redpanda transport for the IAM event bus.
//!
//! Implements [`MessageProducer`] and [`MessageConsumer`] from
//! `iam-events-core` on top of rdkafka, so the event service runs against any
//! Kafka-compatible broker (Redpanda, Apache Kafka, managed offerings).
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - A message's offset is committed when the subscriber polls the stream for
//!   the next message, i.e. after the previous message has been dispatched
//! - `disconnect` synchronously commits the offset of the last message handed
//!   out, so a clean shutdown does not replay it
//! - If the process crashes before either commit, the message is redelivered
//! - Handlers must therefore tolerate duplicates
//!
//! # Connection
//!
//! `connect` on the producer creates the client and fetches cluster metadata,
//! so an unreachable broker fails at startup instead of on the first send.
//! TLS is enabled through [`TlsConfig`](iam_events_core::config::TlsConfig).
//!
//! # Example
//!
//! ```no_run
//! use iam_events_core::config::KafkaConfig;
//! use iam_events_core::transport::MessageProducer;
//! use iam_events_redpanda::{RedpandaConsumer, RedpandaProducer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = KafkaConfig::default();
//! let producer = RedpandaProducer::new(config.clone());
//! producer.connect().await?;
//!
//! let health = producer.health_check().await?;
//! println!("{} brokers, {} topics", health.brokers, health.topics);
//!
//! let consumer = RedpandaConsumer::new(config).with_offset_reset("earliest");
//! # Ok(())
//! # }
//! ```

use iam_events_core::config::KafkaConfig;
use iam_events_core::transport::{
    InboundMessage, InboundStream, MessageConsumer, MessageProducer, OutboundMessage,
    TransportError, TransportFuture,
};
use rdkafka::ClientConfig;
use rdkafka::Offset;
use rdkafka::TopicPartitionList;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Default time to wait for broker acknowledgements and metadata.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Base client configuration shared by producer and consumer.
///
/// Sets the bootstrap servers and, when TLS is enabled, the SSL protocol and
/// certificate locations.
#[must_use]
pub fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.brokers);

    let tls = &config.tls;
    if tls.enabled {
        client.set("security.protocol", "ssl");
        if let Some(ca) = &tls.ca_path {
            client.set("ssl.ca.location", ca);
        }
        if let Some(cert) = &tls.cert_path {
            client.set("ssl.certificate.location", cert);
        }
        if let Some(key) = &tls.key_path {
            client.set("ssl.key.location", key);
        }
    }
    client
}

/// Cluster view reported by [`RedpandaProducer::health_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterHealth {
    /// Brokers in the cluster metadata
    pub brokers: usize,
    /// Topics visible to this client
    pub topics: usize,
}

/// Producer half of the transport.
pub struct RedpandaProducer {
    config: KafkaConfig,
    timeout: Duration,
    producer: RwLock<Option<FutureProducer>>,
}

impl std::fmt::Debug for RedpandaProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaProducer")
            .field("brokers", &self.config.brokers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedpandaProducer {
    /// Create an unconnected producer.
    #[must_use]
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            timeout: DEFAULT_TIMEOUT,
            producer: RwLock::new(None),
        }
    }

    /// Override the acknowledgement and metadata timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn producer_config(&self) -> ClientConfig {
        let mut client = client_config(&self.config);
        let message_timeout = self.timeout.as_millis().to_string();
        client
            .set("message.timeout.ms", message_timeout)
            .set("acks", "all")
            .set("compression.type", "none");
        client
    }

    async fn connected(&self) -> Result<FutureProducer, TransportError> {
        self.producer
            .read()
            .await
            .clone()
            .ok_or_else(|| TransportError::NotConnected("producer".to_string()))
    }

    /// Fetch cluster metadata and report broker and topic counts.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] before `connect`, or
    /// [`TransportError::ConnectionFailed`] if metadata cannot be fetched.
    pub async fn health_check(&self) -> Result<ClusterHealth, TransportError> {
        let producer = self.connected().await?;
        fetch_health(producer, self.timeout).await
    }
}

async fn fetch_health(
    producer: FutureProducer,
    timeout: Duration,
) -> Result<ClusterHealth, TransportError> {
    // fetch_metadata blocks the calling thread
    let metadata = tokio::task::spawn_blocking(move || {
        producer
            .client()
            .fetch_metadata(None, timeout)
            .map(|metadata| ClusterHealth {
                brokers: metadata.brokers().len(),
                topics: metadata.topics().len(),
            })
    })
    .await
    .map_err(|e| TransportError::ConnectionFailed(format!("metadata task failed: {e}")))?;

    metadata.map_err(|e| TransportError::ConnectionFailed(format!("Failed to fetch metadata: {e}")))
}

fn record_headers(headers: &BTreeMap<String, String>) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |owned, (key, value)| {
            owned.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            })
        })
}

impl MessageProducer for RedpandaProducer {
    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let producer: FutureProducer = self.producer_config().create().map_err(|e| {
                TransportError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

            let health = fetch_health(producer.clone(), self.timeout).await?;
            tracing::info!(
                brokers = %self.config.brokers,
                broker_count = health.brokers,
                topic_count = health.topics,
                tls = self.config.tls.enabled,
                "Kafka producer connected"
            );

            *self.producer.write().await = Some(producer);
            Ok(())
        })
    }

    fn send(&self, topic: &str, messages: Vec<OutboundMessage>) -> TransportFuture<'_, ()> {
        let topic = topic.to_string();
        Box::pin(async move {
            let producer = self.connected().await?;

            for message in &messages {
                let record = FutureRecord::to(&topic)
                    .key(message.key.as_str())
                    .payload(message.value.as_str())
                    .headers(record_headers(&message.headers));

                match producer.send(record, Timeout::After(self.timeout)).await {
                    Ok((partition, offset)) => {
                        tracing::debug!(
                            topic = %topic,
                            partition = partition,
                            offset = offset,
                            key = %message.key,
                            "Message published"
                        );
                    },
                    Err((kafka_error, _)) => {
                        return Err(TransportError::PublishFailed {
                            topic,
                            reason: kafka_error.to_string(),
                        });
                    },
                }
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let Some(producer) = self.producer.write().await.take() else {
                return Ok(());
            };
            let timeout = self.timeout;
            let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout))
                .await
                .map_err(|e| TransportError::ConnectionFailed(format!("flush task failed: {e}")))?;

            flushed.map_err(|e| TransportError::PublishFailed {
                topic: String::new(),
                reason: format!("Failed to flush pending messages: {e}"),
            })
        })
    }
}

/// Consumer half of the transport.
///
/// Joins the configured consumer group with auto-commit disabled; offsets are
/// committed by the subscription stream itself, and on `disconnect` for the
/// last message handed out.
pub struct RedpandaConsumer {
    config: KafkaConfig,
    offset_reset: String,
    consumer: RwLock<Option<Arc<StreamConsumer>>>,
    pending: PendingOffset,
}

impl std::fmt::Debug for RedpandaConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaConsumer")
            .field("brokers", &self.config.brokers)
            .field("group_id", &self.config.group_id)
            .field("offset_reset", &self.offset_reset)
            .finish_non_exhaustive()
    }
}

impl RedpandaConsumer {
    /// Create an unconnected consumer that starts from the latest offset
    /// when its group has none committed.
    #[must_use]
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            offset_reset: "latest".to_string(),
            consumer: RwLock::new(None),
            pending: PendingOffset::default(),
        }
    }

    /// Where to start when the group has no committed offset
    /// (`earliest` or `latest`).
    #[must_use]
    pub fn with_offset_reset(mut self, offset_reset: impl Into<String>) -> Self {
        self.offset_reset = offset_reset.into();
        self
    }

    fn consumer_config(&self) -> ClientConfig {
        let mut client = client_config(&self.config);
        client
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.offset_reset)
            .set("session.timeout.ms", self.config.session_timeout_ms.to_string())
            .set("heartbeat.interval.ms", self.config.heartbeat_interval_ms.to_string())
            .set("enable.partition.eof", "false");
        client
    }
}

/// Normalize Kafka headers to UTF-8 strings; headers without a value are dropped.
fn header_map<'a>(
    headers: impl Iterator<Item = (&'a str, Option<&'a [u8]>)>,
) -> BTreeMap<String, String> {
    headers
        .filter_map(|(key, value)| {
            value.map(|value| (key.to_string(), String::from_utf8_lossy(value).into_owned()))
        })
        .collect()
}

fn to_inbound<M: Message>(message: &M) -> InboundMessage {
    let headers = message
        .headers()
        .map(|headers| header_map(headers.iter().map(|header| (header.key, header.value))))
        .unwrap_or_default();

    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        headers,
    }
}

/// Partition position of a message handed out by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    topic: String,
    partition: i32,
    offset: i64,
}

impl Position {
    fn of(message: &InboundMessage) -> Self {
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
        }
    }

    /// Offsets to commit once this message is processed: the next one to read.
    fn commit_list(&self) -> KafkaResult<TopicPartitionList> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &self.topic,
            self.partition,
            Offset::Offset(self.offset + 1),
        )?;
        Ok(offsets)
    }
}

/// Position of the message yielded last and not yet committed.
///
/// Shared between the subscription stream and `disconnect`; whoever takes it
/// commits it, so an offset is never committed twice.
#[derive(Debug, Clone, Default)]
struct PendingOffset(Arc<Mutex<Option<Position>>>);

impl PendingOffset {
    async fn set(&self, position: Position) {
        *self.0.lock().await = Some(position);
    }

    async fn take(&self) -> Option<Position> {
        self.0.lock().await.take()
    }
}

fn commit(consumer: &StreamConsumer, position: &Position, mode: CommitMode) {
    let committed = position
        .commit_list()
        .and_then(|offsets| consumer.commit(&offsets, mode));

    if let Err(e) = committed {
        tracing::warn!(
            topic = %position.topic,
            partition = position.partition,
            offset = position.offset,
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

impl MessageConsumer for RedpandaConsumer {
    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let consumer: StreamConsumer = self.consumer_config().create().map_err(|e| {
                TransportError::ConnectionFailed(format!("Failed to create consumer: {e}"))
            })?;

            tracing::info!(
                brokers = %self.config.brokers,
                group_id = %self.config.group_id,
                auto_offset_reset = %self.offset_reset,
                manual_commit = true,
                "Kafka consumer connected"
            );

            *self.consumer.write().await = Some(Arc::new(consumer));
            Ok(())
        })
    }

    fn subscribe(&self, topics: &[String]) -> TransportFuture<'_, InboundStream> {
        let topics = topics.to_vec();
        Box::pin(async move {
            let consumer = self
                .consumer
                .read()
                .await
                .clone()
                .ok_or_else(|| TransportError::NotConnected("consumer".to_string()))?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer.subscribe(&topic_refs).map_err(|e| TransportError::SubscriptionFailed {
                topics: topics.clone(),
                reason: e.to_string(),
            })?;

            tracing::info!(topics = ?topics, "Subscribed to topics");

            let pending = self.pending.clone();
            let stream = async_stream::stream! {
                loop {
                    let received = consumer.recv().await.map(|message| to_inbound(&message));
                    match received {
                        Ok(message) => {
                            pending.set(Position::of(&message)).await;
                            yield Ok(message);
                            // Resumed on the next poll: the previous message has been dispatched
                            if let Some(position) = pending.take().await {
                                commit(&consumer, &position, CommitMode::Async);
                            }
                        },
                        Err(e) => yield Err(TransportError::ReceiveFailed(e.to_string())),
                    }
                }
                // Pins the generator output to `()` under edition-2024 never-type fallback
                #[allow(unreachable_code)]
                ()
            };
            Ok(Box::pin(stream) as InboundStream)
        })
    }

    fn disconnect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if let Some(consumer) = self.consumer.write().await.take() {
                if let Some(position) = self.pending.take().await {
                    commit(&consumer, &position, CommitMode::Sync);
                    tracing::debug!(
                        topic = %position.topic,
                        partition = position.partition,
                        offset = position.offset,
                        "Committed last processed offset on disconnect"
                    );
                }
                consumer.unsubscribe();
                tracing::info!(group_id = %self.config.group_id, "Kafka consumer disconnected");
            }
            Ok(())
        })
    }
}
