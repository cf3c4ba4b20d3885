//! Learning platform integration against the in-memory doubles.

#![allow(clippy::unwrap_used)]

use iam_events_core::config::IntegrationConfig;
use iam_events_core::event::{DomainEvent, EventKind, PersonDeleted, RoleUpdated};
use iam_events_core::handler::{EventHandler, HandlerReply, KeepAlive};
use iam_events_core::registry::HandlerRegistry;
use iam_events_sync::error::GatewayError;
use iam_events_sync::gateway::{LearningPlatformClient, RetryingLearningPlatform};
use iam_events_sync::{LearningPlatformSync, RetryPolicy};
use iam_events_testing::{CapturedLogs, InMemoryPersonRepository, MockLearningPlatform, persons};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

fn enabled(max_batch_size: usize) -> IntegrationConfig {
    IntegrationConfig {
        enabled: true,
        max_batch_size,
    }
}

fn integration(
    repository: &InMemoryPersonRepository,
    platform: &MockLearningPlatform,
    config: IntegrationConfig,
) -> LearningPlatformSync {
    LearningPlatformSync::new(
        Arc::new(repository.clone()),
        Arc::new(platform.clone()),
        config,
    )
}

fn role_updated(role_id: Uuid) -> DomainEvent {
    DomainEvent::new(RoleUpdated {
        role_id,
        name: "teachers".to_string(),
        service_provider_ids: vec![Uuid::new_v4()],
    })
}

fn person_deleted(person_id: Uuid) -> DomainEvent {
    DomainEvent::new(PersonDeleted {
        person_id,
        username: Some("jdoe".to_string()),
        email: None,
    })
}

fn counting_keep_alive() -> (KeepAlive, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let keep_alive = KeepAlive::from_fn(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (keep_alive, count)
}

#[tokio::test]
async fn role_update_pushes_every_holder_page_by_page() {
    let repository = InMemoryPersonRepository::new();
    let platform = MockLearningPlatform::new();
    let role = Uuid::new_v4();
    repository.insert_role(role, persons(7));
    let sync = integration(&repository, &platform, enabled(3));
    let (keep_alive, signals) = counting_keep_alive();

    let reply = sync.handle(&role_updated(role), keep_alive).await.unwrap();

    assert_eq!(reply, HandlerReply::Done);
    let sizes: Vec<usize> = platform.batches().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert_eq!(repository.fetches(), 3);
    assert_eq!(signals.load(Ordering::SeqCst), 3);

    let logins: Vec<String> = platform
        .batches()
        .concat()
        .into_iter()
        .map(|user| user.login)
        .collect();
    assert_eq!(logins.first().map(String::as_str), Some("user-0"));
    assert_eq!(logins.last().map(String::as_str), Some("user-6"));
}

#[tokio::test]
async fn refused_persons_are_logged_individually() {
    let logs = CapturedLogs::new();
    let _guard = logs.install();
    let repository = InMemoryPersonRepository::new();
    let platform = MockLearningPlatform::new();
    let role = Uuid::new_v4();
    repository.insert_role(role, persons(5));
    platform.refuse("user-1");
    platform.refuse("user-4");
    let sync = integration(&repository, &platform, enabled(2));

    let reply = sync
        .handle(&role_updated(role), KeepAlive::detached())
        .await
        .unwrap();

    assert_eq!(reply, HandlerReply::Done);
    let failures = logs.containing("Failed to create person in learning platform");
    let usernames: Vec<&str> = failures
        .iter()
        .filter_map(|record| record.field("username"))
        .collect();
    assert_eq!(usernames, vec!["user-1", "user-4"]);
}

#[tokio::test]
async fn failed_mass_action_marks_the_whole_page() {
    let logs = CapturedLogs::new();
    let _guard = logs.install();
    let repository = InMemoryPersonRepository::new();
    let platform = MockLearningPlatform::new();
    let role = Uuid::new_v4();
    repository.insert_role(role, persons(5));
    platform.fail_next(GatewayError::Rejected("payload too large".to_string()));
    let sync = integration(&repository, &platform, enabled(2));

    let reply = sync
        .handle(&role_updated(role), KeepAlive::detached())
        .await
        .unwrap();

    assert_eq!(reply, HandlerReply::Done);
    assert_eq!(platform.calls(), 3);
    assert_eq!(platform.batches().len(), 2);
    assert_eq!(logs.containing("Failed to create person in learning platform").len(), 2);
}

#[tokio::test]
async fn unreadable_repository_is_a_hard_failure() {
    let repository = InMemoryPersonRepository::new();
    let platform = MockLearningPlatform::new();
    repository.fail_next(GatewayError::Unavailable("connection reset".to_string()));
    let sync = integration(&repository, &platform, enabled(10));

    let err = sync
        .handle(&role_updated(Uuid::new_v4()), KeepAlive::detached())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Failed to sync persons of role teachers"));
    assert_eq!(platform.calls(), 0);
}

#[tokio::test]
async fn role_without_holders_sends_nothing() {
    let repository = InMemoryPersonRepository::new();
    let platform = MockLearningPlatform::new();
    let sync = integration(&repository, &platform, enabled(10));

    let reply = sync
        .handle(&role_updated(Uuid::new_v4()), KeepAlive::detached())
        .await
        .unwrap();

    assert_eq!(reply, HandlerReply::Done);
    assert_eq!(repository.fetches(), 1);
    assert_eq!(platform.calls(), 0);
}

#[tokio::test]
async fn person_deletion_removes_the_user() {
    let platform = MockLearningPlatform::new();
    let sync = integration(&InMemoryPersonRepository::new(), &platform, enabled(10));
    let person_id = Uuid::new_v4();

    let reply = sync
        .handle(&person_deleted(person_id), KeepAlive::detached())
        .await
        .unwrap();

    assert_eq!(reply, HandlerReply::Done);
    assert_eq!(platform.deleted(), vec![person_id]);
}

#[tokio::test]
async fn failed_deletion_is_a_soft_failure() {
    let platform = MockLearningPlatform::new();
    platform.fail_next(GatewayError::Unavailable("quota exceeded".to_string()));
    let sync = integration(&InMemoryPersonRepository::new(), &platform, enabled(10));

    let reply = sync
        .handle(&person_deleted(Uuid::new_v4()), KeepAlive::detached())
        .await
        .unwrap();

    assert!(reply.is_failed());
    assert!(matches!(reply, HandlerReply::Failed { error } if error.contains("quota exceeded")));
}

#[tokio::test]
async fn deleting_an_unknown_user_is_done() {
    let platform = MockLearningPlatform::new();
    platform.fail_next(GatewayError::NotFound("user".to_string()));
    let sync = integration(&InMemoryPersonRepository::new(), &platform, enabled(10));

    let reply = sync
        .handle(&person_deleted(Uuid::new_v4()), KeepAlive::detached())
        .await
        .unwrap();

    assert_eq!(reply, HandlerReply::Done);
}

#[tokio::test]
async fn disabled_integration_ignores_events() {
    let logs = CapturedLogs::new();
    let _guard = logs.install();
    let repository = InMemoryPersonRepository::new();
    let platform = MockLearningPlatform::new();
    let sync = integration(&repository, &platform, IntegrationConfig::default());

    let reply = sync
        .handle(&person_deleted(Uuid::new_v4()), KeepAlive::detached())
        .await
        .unwrap();

    assert_eq!(reply, HandlerReply::Done);
    assert_eq!(platform.calls(), 0);
    assert_eq!(
        logs.containing("Learning platform sync is disabled, ignoring event").len(),
        1
    );
}

#[test]
fn registers_for_role_and_deletion_events() {
    let sync = Arc::new(integration(
        &InMemoryPersonRepository::new(),
        &MockLearningPlatform::new(),
        enabled(10),
    ));
    let mut registry = HandlerRegistry::new();

    sync.register(&mut registry);

    assert_eq!(registry.lookup(EventKind::RoleUpdated).len(), 1);
    assert_eq!(registry.lookup(EventKind::PersonDeleted).len(), 1);
    assert!(registry.lookup(EventKind::PersonCreated).is_empty());
    assert_eq!(registry.lookup(EventKind::RoleUpdated)[0].name(), "learning-platform");
}

#[tokio::test(start_paused = true)]
async fn retrying_client_absorbs_transient_failures() {
    let platform = MockLearningPlatform::new();
    platform.fail_next(GatewayError::Unavailable("502".to_string()));
    platform.fail_next(GatewayError::Unavailable("503".to_string()));
    let client = RetryingLearningPlatform::new(
        Arc::new(platform.clone()),
        RetryPolicy::new(3, Duration::from_millis(100)),
    );
    let person_id = Uuid::new_v4();

    client.delete_person(person_id).await.unwrap();

    assert_eq!(platform.calls(), 3);
    assert_eq!(platform.deleted(), vec![person_id]);
}

#[tokio::test(start_paused = true)]
async fn retrying_client_gives_up_on_permanent_failures() {
    let platform = MockLearningPlatform::new();
    platform.fail_next(GatewayError::Unauthorized("token expired".to_string()));
    let client = RetryingLearningPlatform::new(
        Arc::new(platform.clone()),
        RetryPolicy::new(3, Duration::from_millis(100)),
    );

    let err = client.delete_person(Uuid::new_v4()).await.unwrap_err();

    assert_eq!(err, GatewayError::Unauthorized("token expired".to_string()));
    assert_eq!(platform.calls(), 1);
}
