//! Integration handlers running under the dispatch supervisor.

#![allow(clippy::unwrap_used)]

use futures::future::BoxFuture;
use iam_events_core::config::{IntegrationConfig, KafkaConfig};
use iam_events_core::event::{DomainEvent, PersonDeleted, RoleUpdated};
use iam_events_core::transport::{MessageConsumer, MessageProducer};
use iam_events_runtime::{EventService, HandlerOutcome, PublishStatus};
use iam_events_sync::cursor::{Page, PageRequest};
use iam_events_sync::error::GatewayError;
use iam_events_sync::gateway::{Person, PersonRepository};
use iam_events_sync::LearningPlatformSync;
use iam_events_testing::{
    CapturedLogs, InMemoryPersonRepository, InMemoryProducer, MockLearningPlatform,
    in_memory_broker, inbound, persons,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Repository whose every page takes `delay` to load.
struct SlowRepository {
    inner: InMemoryPersonRepository,
    delay: Duration,
}

impl PersonRepository for SlowRepository {
    fn find_by_role<'a>(
        &'a self,
        role_id: Uuid,
        page: &'a PageRequest,
    ) -> BoxFuture<'a, Result<Page<Person>, GatewayError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.find_by_role(role_id, page).await
        })
    }
}

fn service(
    persons: Arc<dyn PersonRepository>,
    platform: &MockLearningPlatform,
) -> (EventService, Arc<InMemoryProducer>) {
    let (producer, consumer) = in_memory_broker();
    let sync = Arc::new(LearningPlatformSync::new(
        persons,
        Arc::new(platform.clone()),
        IntegrationConfig {
            enabled: true,
            max_batch_size: 2,
        },
    ));
    let service = EventService::builder(
        KafkaConfig {
            enabled: true,
            ..KafkaConfig::default()
        },
        Arc::clone(&producer) as Arc<dyn MessageProducer>,
        consumer as Arc<dyn MessageConsumer>,
    )
    .with(move |registry| sync.register(registry))
    .build();
    (service, producer)
}

fn role_updated(role_id: Uuid) -> DomainEvent {
    DomainEvent::new(RoleUpdated {
        role_id,
        name: "teachers".to_string(),
        service_provider_ids: Vec::new(),
    })
}

#[tokio::test]
async fn failed_deletion_is_dead_lettered_with_its_reason() {
    let platform = MockLearningPlatform::new();
    platform.fail_next(GatewayError::Unavailable("quota exceeded".to_string()));
    let (service, producer) = service(Arc::new(InMemoryPersonRepository::new()), &platform);
    let event = DomainEvent::new(PersonDeleted {
        person_id: Uuid::new_v4(),
        username: Some("jdoe".to_string()),
        email: None,
    });
    let message = inbound(&event);

    let report = service.dispatcher().dispatch(&message).await;

    assert!(matches!(
        report.outcomes.as_slice(),
        [HandlerOutcome::SoftFailed {
            dead_letter: PublishStatus::Sent,
            ..
        }]
    ));
    let dead_letters = producer.sent_to("iam.person-dlq");
    assert_eq!(dead_letters.len(), 1);
    assert!(dead_letters[0].headers["error"].contains("quota exceeded"));
    assert_eq!(dead_letters[0].headers["eventKey"], message.headers["eventKey"]);
    assert_eq!(Some(dead_letters[0].value.as_bytes()), message.value.as_deref());
}

#[tokio::test(start_paused = true)]
async fn long_role_sync_stays_alive_page_by_page() {
    let logs = CapturedLogs::new();
    let _guard = logs.install();
    let repository = InMemoryPersonRepository::new();
    let role = Uuid::new_v4();
    repository.insert_role(role, persons(7));
    let platform = MockLearningPlatform::new();
    let slow = SlowRepository {
        inner: repository,
        delay: Duration::from_secs(20),
    };
    let (service, producer) = service(Arc::new(slow), &platform);

    let started = Instant::now();
    let report = service.dispatcher().dispatch_event(&role_updated(role)).await;

    assert_eq!(report.outcomes, vec![HandlerOutcome::Completed]);
    assert!(started.elapsed() >= Duration::from_secs(80));
    assert_eq!(platform.batches().len(), 4);
    assert!(logs.critical().is_empty());
    assert!(producer.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stalled_page_times_the_handler_out() {
    let logs = CapturedLogs::new();
    let _guard = logs.install();
    let repository = InMemoryPersonRepository::new();
    let role = Uuid::new_v4();
    repository.insert_role(role, persons(3));
    let platform = MockLearningPlatform::new();
    let slow = SlowRepository {
        inner: repository,
        delay: Duration::from_secs(45),
    };
    let (service, producer) = service(Arc::new(slow), &platform);

    let report = service.dispatcher().dispatch_event(&role_updated(role)).await;

    assert_eq!(report.outcomes, vec![HandlerOutcome::TimedOut]);
    assert_eq!(logs.critical().len(), 1);
    assert!(producer.sent().is_empty());
}
