//! Event service lifecycle against the in-memory broker.

#![allow(clippy::unwrap_used)]

use iam_events_core::config::KafkaConfig;
use iam_events_core::event::{DomainEvent, EventKind, PersonDeleted};
use iam_events_core::handler::{HandlerReply, handler_fn};
use iam_events_core::transport::{MessageConsumer, MessageProducer, TransportError};
use iam_events_runtime::{EventService, PublishStatus};
use iam_events_testing::{
    CapturedLogs, InMemoryConsumer, InMemoryProducer, in_memory_broker, inbound,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

fn enabled() -> KafkaConfig {
    KafkaConfig {
        enabled: true,
        ..KafkaConfig::default()
    }
}

fn service(
    config: KafkaConfig,
    producer: &Arc<InMemoryProducer>,
    consumer: &Arc<InMemoryConsumer>,
) -> (EventService, mpsc::UnboundedReceiver<DomainEvent>) {
    let (seen, received) = mpsc::unbounded_channel();
    let service = EventService::builder(
        config,
        Arc::clone(producer) as Arc<dyn MessageProducer>,
        Arc::clone(consumer) as Arc<dyn MessageConsumer>,
    )
    .subscribe(
        EventKind::PersonDeleted,
        handler_fn(move |event, _keep_alive| {
            let seen = seen.clone();
            async move {
                let _ = seen.send(event);
                Ok(HandlerReply::Done)
            }
        }),
    )
    .build();
    (service, received)
}

fn person_deleted() -> DomainEvent {
    DomainEvent::new(PersonDeleted {
        person_id: Uuid::new_v4(),
        username: None,
        email: None,
    })
}

#[tokio::test]
async fn disabled_service_does_no_io() {
    let (producer, consumer) = in_memory_broker();
    let (service, _received) = service(KafkaConfig::default(), &producer, &consumer);

    service.on_start().await;
    assert!(!producer.is_connected());
    assert!(!consumer.is_connected());
    assert!(!service.is_running().await);

    assert_eq!(
        service.gateway().publish(&person_deleted()).await,
        PublishStatus::Disabled
    );
    assert_eq!(producer.send_attempts(), 0);

    service.on_stop().await;
}

#[tokio::test]
async fn started_service_consumes_and_dispatches() {
    let (producer, consumer) = in_memory_broker();
    let (service, mut received) = service(enabled(), &producer, &consumer);

    service.on_start().await;

    assert!(producer.is_connected());
    assert!(consumer.is_connected());
    assert!(service.is_running().await);
    assert_eq!(
        consumer.subscribed_topics(),
        vec!["iam.person".to_string(), "iam.user".to_string()]
    );

    let event = person_deleted();
    consumer.deliver(inbound(&event));
    let handled = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handled, event);

    service.on_stop().await;
    assert!(!service.is_running().await);
    assert!(!producer.is_connected());
    assert!(!consumer.is_connected());
}

#[tokio::test]
async fn receive_errors_do_not_stop_the_loop() {
    let logs = CapturedLogs::new();
    let _guard = logs.install();
    let (producer, consumer) = in_memory_broker();
    let (service, mut received) = service(enabled(), &producer, &consumer);

    service.on_start().await;
    consumer.deliver_error(TransportError::ReceiveFailed("partition moved".to_string()));
    let event = person_deleted();
    consumer.deliver(inbound(&event));

    let handled = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handled.event_id(), event.event_id());
    assert_eq!(logs.containing("Error receiving message").len(), 1);

    service.on_stop().await;
}

#[tokio::test]
async fn connection_failure_leaves_service_degraded() {
    let logs = CapturedLogs::new();
    let _guard = logs.install();
    let (producer, consumer) = in_memory_broker();
    producer.fail_connect(true);
    let (service, _received) = service(enabled(), &producer, &consumer);

    service.on_start().await;

    assert!(!service.is_running().await);
    assert!(!consumer.is_connected());
    assert_eq!(logs.containing("Failed to connect Kafka producer").len(), 1);

    // Stopping a degraded service is harmless
    service.on_stop().await;
}

#[tokio::test]
async fn consumer_connection_failure_is_logged() {
    let logs = CapturedLogs::new();
    let _guard = logs.install();
    let (producer, consumer) = in_memory_broker();
    consumer.fail_connect(true);
    let (service, _received) = service(enabled(), &producer, &consumer);

    service.on_start().await;

    assert!(!service.is_running().await);
    assert!(producer.is_connected());
    assert_eq!(logs.containing("Failed to connect Kafka consumer").len(), 1);
}

#[tokio::test]
async fn started_service_publishes_through_its_gateway() {
    let (producer, consumer) = in_memory_broker();
    let (service, _received) = service(enabled(), &producer, &consumer);
    service.on_start().await;

    let event = person_deleted();
    assert_eq!(service.gateway().publish(&event).await, PublishStatus::Sent);
    assert_eq!(producer.sent_to("iam.person").len(), 1);

    service.on_stop().await;
}

#[tokio::test]
async fn starting_twice_subscribes_once() {
    let (producer, consumer) = in_memory_broker();
    let (service, _received) = service(enabled(), &producer, &consumer);

    service.on_start().await;
    service.on_start().await;

    assert_eq!(consumer.subscribed_topics().len(), 2);
    service.on_stop().await;
}
