//! Broker transport abstraction.
//!
//! The dispatch and publish paths only talk to these traits, so they run the
//! same way on Kafka/Redpanda (see `iam-events-redpanda`) and on the
//! in-memory broker used in tests.
//!
//! # Message shapes
//!
//! Inbound messages arrive as `{ key, value, headers }` where `value` is UTF-8
//! JSON and `headers.eventKey` names the event kind. Outbound sends take a
//! topic plus a batch of `{ key, value, headers }` messages.
//!
//! # Dyn Compatibility
//!
//! Like the handler trait, these traits return `Pin<Box<dyn Future>>` so they
//! can be held as `Arc<dyn MessageProducer>` / `Arc<dyn MessageConsumer>`.

use crate::envelope::TransportEnvelope;
use futures::Stream;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by a broker transport.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to send to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to receive a message
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Operation requires a connection that is not established
    #[error("Not connected: {0}")]
    NotConnected(String),
}

/// A message as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InboundMessage {
    /// Source topic
    pub topic: String,
    /// Source partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Raw key, if any
    pub key: Option<Vec<u8>>,
    /// Raw value, if any
    pub value: Option<Vec<u8>>,
    /// Headers, normalized to UTF-8 strings
    pub headers: BTreeMap<String, String>,
}

impl InboundMessage {
    /// View this message as an envelope for decoding.
    ///
    /// A missing key becomes an empty string and a missing value an empty
    /// body (which decoding rejects as `EmptyBody`).
    #[must_use]
    pub fn to_envelope(&self) -> TransportEnvelope {
        TransportEnvelope {
            key: self
                .key
                .as_deref()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .unwrap_or_default(),
            headers: self.headers.clone(),
            body: self.value.clone().unwrap_or_default(),
        }
    }
}

/// A message to be sent to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Message key
    pub key: String,
    /// JSON value
    pub value: String,
    /// Headers
    pub headers: BTreeMap<String, String>,
}

impl From<TransportEnvelope> for OutboundMessage {
    fn from(envelope: TransportEnvelope) -> Self {
        Self {
            key: envelope.key,
            value: String::from_utf8_lossy(&envelope.body).into_owned(),
            headers: envelope.headers,
        }
    }
}

/// Stream of inbound messages from a subscription.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<InboundMessage, TransportError>> + Send>>;

/// Boxed transport future.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// The broker's send primitive.
pub trait MessageProducer: Send + Sync {
    /// Establish the producer connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if the broker is unreachable.
    fn connect(&self) -> TransportFuture<'_, ()>;

    /// Send a batch of messages to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PublishFailed`] if any message is not acknowledged.
    fn send(&self, topic: &str, messages: Vec<OutboundMessage>) -> TransportFuture<'_, ()>;

    /// Flush and close the producer.
    ///
    /// # Errors
    ///
    /// Returns an error if pending messages could not be flushed.
    fn disconnect(&self) -> TransportFuture<'_, ()>;
}

/// The broker's consume primitive.
pub trait MessageConsumer: Send + Sync {
    /// Establish the consumer connection (join the consumer group).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if the client cannot be created.
    fn connect(&self) -> TransportFuture<'_, ()>;

    /// Subscribe to `topics` and receive their messages as a stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SubscriptionFailed`] if subscribing fails.
    fn subscribe(&self, topics: &[String]) -> TransportFuture<'_, InboundStream>;

    /// Leave the consumer group and release the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the client could not be shut down cleanly.
    fn disconnect(&self) -> TransportFuture<'_, ()>;
}
