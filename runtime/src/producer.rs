//! Producer gateway: the primary publish path and the dead-letter path.
//!
//! Both paths are fault-isolated from the caller: a missing route, a disabled
//! bus or a broker outage is logged and reported as a [`PublishStatus`], never
//! raised. The underlying send is still awaited so its failure is captured.

use crate::metrics::{EVENTS_DEAD_LETTERED, PUBLISH_ERRORS, counter};
use crate::routing::{Route, RoutingTable};
use iam_events_core::envelope::{ERROR_HEADER, TransportEnvelope, encode};
use iam_events_core::event::{DomainEvent, EventKind};
use iam_events_core::transport::{MessageProducer, OutboundMessage};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// What happened to a publish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    /// The broker acknowledged the message
    Sent,
    /// The message bus is disabled; nothing was sent
    Disabled,
    /// No route exists for the event kind; nothing was sent
    Unrouted,
    /// Encoding or sending failed
    Failed,
}

impl PublishStatus {
    /// Whether the broker acknowledged the message.
    #[must_use]
    pub const fn is_sent(self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// Publishes domain events according to a [`RoutingTable`].
pub struct ProducerGateway {
    producer: Arc<dyn MessageProducer>,
    routes: RoutingTable,
    enabled: bool,
}

impl ProducerGateway {
    /// Create a gateway over `producer`.
    #[must_use]
    pub fn new(producer: Arc<dyn MessageProducer>, routes: RoutingTable, enabled: bool) -> Self {
        Self {
            producer,
            routes,
            enabled,
        }
    }

    /// Whether the message bus is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The routing table in use.
    #[must_use]
    pub const fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Publish `event` to its primary topic.
    pub async fn publish(&self, event: &DomainEvent) -> PublishStatus {
        let Some(route) = self.resolve(event.kind(), event.event_id(), "publish") else {
            return self.skipped(event.kind());
        };
        let Some(envelope) = Self::envelope_for(event, route) else {
            return PublishStatus::Failed;
        };
        self.send(event.kind(), &route.topic, envelope).await
    }

    /// Publish `event` to its dead-letter topic, annotated with `error`.
    ///
    /// Key, value and `eventKey` header are the same as on the primary topic;
    /// an `error` header carries the rendered failure.
    pub async fn publish_to_dlq(&self, event: &DomainEvent, error: &str) -> PublishStatus {
        let Some(route) = self.resolve(event.kind(), event.event_id(), "publish to DLQ") else {
            return self.skipped(event.kind());
        };
        let Some(envelope) = Self::envelope_for(event, route) else {
            return PublishStatus::Failed;
        };
        self.send_dead_letter(event.kind(), &route.dlq_topic, envelope, error)
            .await
    }

    /// Forward a received envelope to the dead-letter topic of `event`.
    ///
    /// Unlike [`publish_to_dlq`](Self::publish_to_dlq) the original key, body
    /// and headers are kept byte for byte; only the `error` header is added.
    pub async fn dead_letter(
        &self,
        event: &DomainEvent,
        original: &TransportEnvelope,
        error: &str,
    ) -> PublishStatus {
        let Some(route) = self.resolve(event.kind(), event.event_id(), "publish to DLQ") else {
            return self.skipped(event.kind());
        };
        self.send_dead_letter(event.kind(), &route.dlq_topic, original.clone(), error)
            .await
    }

    fn resolve(&self, kind: EventKind, event_id: Uuid, action: &str) -> Option<&Route> {
        if !self.enabled {
            return None;
        }
        let route = self.routes.route(kind);
        if route.is_none() {
            counter!(PUBLISH_ERRORS).increment(1);
            error!(
                event_type = %kind,
                event_id = %event_id,
                "No topic mapping for event type {kind}, cannot {action}"
            );
        }
        route
    }

    fn skipped(&self, kind: EventKind) -> PublishStatus {
        if self.enabled {
            PublishStatus::Unrouted
        } else {
            info!(event_type = %kind, "Kafka is disabled, not publishing event");
            PublishStatus::Disabled
        }
    }

    fn envelope_for(event: &DomainEvent, route: &Route) -> Option<TransportEnvelope> {
        match encode(event) {
            Ok(mut envelope) => {
                envelope.key = (route.key)(event);
                Some(envelope)
            },
            Err(e) => {
                counter!(PUBLISH_ERRORS).increment(1);
                error!(event_type = %event.kind(), error = %e, "Failed to encode event");
                None
            },
        }
    }

    async fn send_dead_letter(
        &self,
        kind: EventKind,
        topic: &str,
        mut envelope: TransportEnvelope,
        error: &str,
    ) -> PublishStatus {
        envelope
            .headers
            .insert(ERROR_HEADER.to_string(), error.to_string());
        let status = self.send(kind, topic, envelope).await;
        if status.is_sent() {
            counter!(EVENTS_DEAD_LETTERED).increment(1);
        }
        status
    }

    async fn send(
        &self,
        kind: EventKind,
        topic: &str,
        envelope: TransportEnvelope,
    ) -> PublishStatus {
        match self
            .producer
            .send(topic, vec![OutboundMessage::from(envelope)])
            .await
        {
            Ok(()) => {
                debug!(topic = %topic, event_type = %kind, "Event published");
                PublishStatus::Sent
            },
            Err(e) => {
                counter!(PUBLISH_ERRORS).increment(1);
                error!(
                    topic = %topic,
                    event_type = %kind,
                    error = %e,
                    "Failed to publish event to topic {topic}"
                );
                PublishStatus::Failed
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use iam_events_core::config::KafkaConfig;
    use iam_events_core::event::PersonDeleted;
    use iam_events_testing::{CapturedLogs, InMemoryProducer};
    use uuid::Uuid;

    fn person_deleted() -> DomainEvent {
        DomainEvent::new(PersonDeleted {
            person_id: Uuid::new_v4(),
            username: Some("jdoe".to_string()),
            email: None,
        })
    }

    fn gateway(producer: &Arc<InMemoryProducer>, enabled: bool) -> ProducerGateway {
        ProducerGateway::new(
            Arc::clone(producer) as Arc<dyn MessageProducer>,
            RoutingTable::from_config(&KafkaConfig::default()),
            enabled,
        )
    }

    #[tokio::test]
    async fn publish_sends_to_primary_topic() {
        let producer = Arc::new(InMemoryProducer::new());
        let event = person_deleted();

        let status = gateway(&producer, true).publish(&event).await;

        assert_eq!(status, PublishStatus::Sent);
        let sent = producer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "iam.person");
        assert_eq!(sent[0].message.key, event.routing_key());
        assert_eq!(sent[0].message.headers["eventKey"], "person.deleted");
        assert!(!sent[0].message.headers.contains_key("error"));
    }

    #[tokio::test]
    async fn dlq_publish_adds_error_header() {
        let producer = Arc::new(InMemoryProducer::new());
        let event = person_deleted();

        let status = gateway(&producer, true).publish_to_dlq(&event, "quota").await;

        assert_eq!(status, PublishStatus::Sent);
        let sent = producer.sent();
        assert_eq!(sent[0].topic, "iam.person-dlq");
        assert_eq!(sent[0].message.headers["error"], "quota");
        assert_eq!(sent[0].message.headers["eventKey"], "person.deleted");
    }

    #[tokio::test]
    async fn dead_letter_keeps_the_original_envelope() {
        let producer = Arc::new(InMemoryProducer::new());
        let event = person_deleted();
        let mut original = encode(&event).unwrap();
        original.key = "original-key".to_string();
        original
            .headers
            .insert("traceparent".to_string(), "00-abc".to_string());

        let status = gateway(&producer, true)
            .dead_letter(&event, &original, "quota")
            .await;

        assert_eq!(status, PublishStatus::Sent);
        let sent = producer.sent();
        assert_eq!(sent[0].topic, "iam.person-dlq");
        assert_eq!(sent[0].message.key, "original-key");
        assert_eq!(sent[0].message.headers["traceparent"], "00-abc");
        assert_eq!(sent[0].message.headers["error"], "quota");
        assert_eq!(sent[0].message.value.as_bytes(), original.body.as_slice());
    }

    #[tokio::test]
    async fn disabled_bus_sends_nothing() {
        let producer = Arc::new(InMemoryProducer::new());
        let gateway = gateway(&producer, false);

        assert_eq!(gateway.publish(&person_deleted()).await, PublishStatus::Disabled);
        assert_eq!(
            gateway.publish_to_dlq(&person_deleted(), "x").await,
            PublishStatus::Disabled
        );
        assert!(producer.sent().is_empty());
        assert_eq!(producer.send_attempts(), 0);
    }

    #[tokio::test]
    async fn unrouted_kind_performs_no_send() {
        let logs = CapturedLogs::new();
        let _guard = logs.install();
        let producer = Arc::new(InMemoryProducer::new());
        let mut routes = RoutingTable::new();
        routes.insert(EventKind::RoleUpdated, Route::new("iam.user", "iam.user-dlq"));
        let gateway = ProducerGateway::new(
            Arc::clone(&producer) as Arc<dyn MessageProducer>,
            routes,
            true,
        );

        assert_eq!(gateway.publish(&person_deleted()).await, PublishStatus::Unrouted);
        assert_eq!(producer.send_attempts(), 0);

        let errors = logs.errors();
        assert_eq!(errors.len(), 1);
        assert!(
            errors[0]
                .message
                .contains("No topic mapping for event type PersonDeleted")
        );
        assert_eq!(errors[0].field("event_type"), Some("PersonDeleted"));
    }

    #[tokio::test]
    async fn broker_failure_is_contained() {
        let producer = Arc::new(InMemoryProducer::new());
        producer.fail_sends(true);

        let status = gateway(&producer, true).publish(&person_deleted()).await;

        assert_eq!(status, PublishStatus::Failed);
        assert_eq!(producer.send_attempts(), 1);
        assert!(producer.sent().is_empty());
    }
}
