//! Dispatch and dead-letter counters, rendered by a Prometheus recorder that
//! is local to the test thread.

#![allow(clippy::unwrap_used)]

use iam_events_core::config::KafkaConfig;
use iam_events_core::envelope::EVENT_KEY_HEADER;
use iam_events_core::event::{DomainEvent, EventKind, PersonDeleted};
use iam_events_core::handler::{HandlerReply, handler_fn};
use iam_events_core::transport::{MessageConsumer, MessageProducer};
use iam_events_runtime::EventService;
use iam_events_testing::{in_memory_broker, inbound};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use uuid::Uuid;

fn person_deleted() -> DomainEvent {
    DomainEvent::new(PersonDeleted {
        person_id: Uuid::new_v4(),
        username: Some("jdoe".to_string()),
        email: None,
    })
}

#[tokio::test]
async fn dispatch_and_dead_letter_counters_are_recorded() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let (producer, consumer) = in_memory_broker();
    let service = EventService::builder(
        KafkaConfig {
            enabled: true,
            ..KafkaConfig::default()
        },
        Arc::clone(&producer) as Arc<dyn MessageProducer>,
        Arc::clone(&consumer) as Arc<dyn MessageConsumer>,
    )
    .subscribe(
        EventKind::PersonDeleted,
        handler_fn(|_event, _keep_alive| async {
            Ok(HandlerReply::failed("mailbox quota"))
        }),
    )
    .build();
    service.on_start().await;

    let dispatcher = service.dispatcher();
    let report = dispatcher.dispatch(&inbound(&person_deleted())).await;
    assert_eq!(report.dead_lettered, 1);

    let mut undecodable = inbound(&person_deleted());
    undecodable.headers.remove(EVENT_KEY_HEADER);
    dispatcher.dispatch(&undecodable).await;

    service.on_stop().await;

    let rendered = handle.render();
    assert!(rendered.contains("# HELP events_dispatched_total Messages handed to the dispatcher"));
    assert!(rendered.contains("events_dispatched_total 2"));
    assert!(rendered.contains("events_dead_lettered_total 1"));
    assert!(rendered.contains(r#"event_handler_outcomes_total{outcome="soft_failed"} 1"#));
    assert!(rendered.contains(r#"events_undecodable_total{reason="missing_type_header"} 1"#));
}
