//! In-memory broker transport.
//!
//! - [`InMemoryProducer`]: records every send; can be told to fail
//! - [`InMemoryConsumer`]: yields messages pushed through [`InMemoryConsumer::deliver`]
//!
//! Both implement the core transport traits, so the dispatcher and the event
//! service run against them exactly as they run against Kafka.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use iam_events_core::transport::{
    InboundMessage, InboundStream, MessageConsumer, MessageProducer, OutboundMessage,
    TransportError, TransportFuture,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One message accepted by [`InMemoryProducer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Destination topic
    pub topic: String,
    /// The message as sent
    pub message: OutboundMessage,
}

/// Producer that keeps sent messages in memory.
#[derive(Debug, Default)]
pub struct InMemoryProducer {
    sent: Mutex<Vec<SentMessage>>,
    send_attempts: AtomicUsize,
    fail_sends: AtomicBool,
    fail_connect: AtomicBool,
    connected: AtomicBool,
}

impl InMemoryProducer {
    /// Healthy producer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail (or succeed again).
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make `connect` fail.
    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Messages accepted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages accepted for `topic`.
    #[must_use]
    pub fn sent_to(&self, topic: &str) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|sent| sent.topic == topic)
            .map(|sent| sent.message.clone())
            .collect()
    }

    /// Number of `send` calls, including failed ones.
    #[must_use]
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    /// Whether `connect` succeeded and `disconnect` has not been called since.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl MessageProducer for InMemoryProducer {
    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionFailed("broker unreachable".to_string()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn send(&self, topic: &str, messages: Vec<OutboundMessage>) -> TransportFuture<'_, ()> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.send_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::PublishFailed {
                    topic,
                    reason: "broker unreachable".to_string(),
                });
            }
            let mut sent = self.sent.lock().unwrap();
            sent.extend(messages.into_iter().map(|message| SentMessage {
                topic: topic.clone(),
                message,
            }));
            Ok(())
        })
    }

    fn disconnect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Consumer fed through a channel.
#[derive(Debug)]
pub struct InMemoryConsumer {
    sender: mpsc::UnboundedSender<Result<InboundMessage, TransportError>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Result<InboundMessage, TransportError>>>>,
    subscribed: Mutex<Vec<String>>,
    fail_connect: AtomicBool,
    connected: AtomicBool,
}

impl Default for InMemoryConsumer {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            subscribed: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }
}

impl InMemoryConsumer {
    /// Consumer with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for the subscription stream.
    pub fn deliver(&self, message: InboundMessage) {
        let _ = self.sender.send(Ok(message));
    }

    /// Queue a receive error for the subscription stream.
    pub fn deliver_error(&self, error: TransportError) {
        let _ = self.sender.send(Err(error));
    }

    /// Make `connect` fail.
    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Topics passed to `subscribe`.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().clone()
    }

    /// Whether `connect` succeeded and `disconnect` has not been called since.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl MessageConsumer for InMemoryConsumer {
    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionFailed(
                    "group coordinator unavailable".to_string(),
                ));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn subscribe(&self, topics: &[String]) -> TransportFuture<'_, InboundStream> {
        let topics = topics.to_vec();
        Box::pin(async move {
            if !self.is_connected() {
                return Err(TransportError::NotConnected("consumer".to_string()));
            }
            let Some(mut receiver) = self.receiver.lock().unwrap().take() else {
                return Err(TransportError::SubscriptionFailed {
                    topics,
                    reason: "already subscribed".to_string(),
                });
            };
            self.subscribed.lock().unwrap().extend(topics);

            let stream = async_stream::stream! {
                while let Some(item) = receiver.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as InboundStream)
        })
    }

    fn disconnect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Shared handles for wiring an event service in tests.
#[must_use]
pub fn in_memory_broker() -> (Arc<InMemoryProducer>, Arc<InMemoryConsumer>) {
    (Arc::new(InMemoryProducer::new()), Arc::new(InMemoryConsumer::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn consumer_streams_delivered_messages() {
        let consumer = InMemoryConsumer::new();
        consumer.connect().await.unwrap();
        let mut stream = consumer.subscribe(&["iam.person".to_string()]).await.unwrap();

        consumer.deliver(InboundMessage {
            topic: "iam.person".to_string(),
            offset: 7,
            ..InboundMessage::default()
        });

        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.offset, 7);
        assert_eq!(consumer.subscribed_topics(), vec!["iam.person".to_string()]);
    }

    #[tokio::test]
    async fn subscribe_requires_connection() {
        let consumer = InMemoryConsumer::new();
        let result = consumer.subscribe(&["t".to_string()]).await;
        assert!(matches!(result, Err(TransportError::NotConnected(_))));
    }

    #[tokio::test]
    async fn failing_producer_counts_attempts() {
        let producer = InMemoryProducer::new();
        producer.fail_sends(true);

        let result = producer.send("t", Vec::new()).await;

        assert!(result.is_err());
        assert_eq!(producer.send_attempts(), 1);
        assert!(producer.sent().is_empty());
    }
}
