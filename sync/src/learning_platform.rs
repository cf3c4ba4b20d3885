//! Learning platform integration.
//!
//! - `RoleUpdated`: push every person holding the role to the platform with
//!   a cursor batch synchronization of `create_persons` mass actions.
//!   Refused persons are logged one by one; the run itself succeeds.
//! - `PersonDeleted`: delete the platform user. A gateway failure is reported
//!   as a soft failure so the event is dead-lettered for replay.

use crate::cursor::{CursorSynchronizer, MassActionSink};
use crate::error::GatewayError;
use crate::gateway::{
    LearningPlatformClient, LearningPlatformUser, Person, PersonRepository, RoleMembers,
};
use crate::mass_action::MassActionResult;
use anyhow::Context;
use futures::future::BoxFuture;
use iam_events_core::config::IntegrationConfig;
use iam_events_core::event::{DomainEvent, EventKind, EventPayload, PersonDeleted, RoleUpdated};
use iam_events_core::handler::{EventHandler, HandlerReply, HandlerResult, KeepAlive};
use iam_events_core::registry::HandlerRegistry;
use std::sync::Arc;

/// Event kinds this integration handles.
pub const SUBSCRIBED_KINDS: [EventKind; 2] = [EventKind::RoleUpdated, EventKind::PersonDeleted];

/// Keeps the learning platform's users in line with the identity system.
pub struct LearningPlatformSync {
    persons: Arc<dyn PersonRepository>,
    client: Arc<dyn LearningPlatformClient>,
    config: IntegrationConfig,
}

impl LearningPlatformSync {
    /// Create the integration.
    #[must_use]
    pub fn new(
        persons: Arc<dyn PersonRepository>,
        client: Arc<dyn LearningPlatformClient>,
        config: IntegrationConfig,
    ) -> Self {
        Self {
            persons,
            client,
            config,
        }
    }

    /// Register for every kind in [`SUBSCRIBED_KINDS`].
    pub fn register(self: Arc<Self>, registry: &mut HandlerRegistry) {
        for kind in SUBSCRIBED_KINDS {
            registry.register(kind, Arc::clone(&self) as Arc<dyn EventHandler>);
        }
    }

    async fn role_updated(&self, event: &RoleUpdated, keep_alive: KeepAlive) -> HandlerResult {
        let source = RoleMembers::new(self.persons.as_ref(), event.role_id);
        let sink = CreatePersons {
            client: self.client.as_ref(),
        };

        let run = CursorSynchronizer::new(self.config.max_batch_size)
            .run(&source, &sink, &keep_alive)
            .await
            .with_context(|| format!("Failed to sync persons of role {}", event.name))?;

        for failure in &run.failures {
            tracing::error!(
                role = %event.name,
                person_id = %failure.item.id,
                username = %failure.item.username,
                reason = %failure.reason,
                "Failed to create person in learning platform"
            );
        }
        tracing::info!(
            role = %event.name,
            pages = run.pages,
            synced = run.succeeded(),
            failed = run.failures.len(),
            "Synced persons of role to learning platform"
        );
        Ok(HandlerReply::Done)
    }

    async fn person_deleted(&self, event: &PersonDeleted) -> HandlerResult {
        match self.client.delete_person(event.person_id).await {
            Ok(()) => Ok(HandlerReply::Done),
            Err(GatewayError::NotFound(_)) => {
                tracing::debug!(
                    person_id = %event.person_id,
                    "Person not present in learning platform"
                );
                Ok(HandlerReply::Done)
            },
            Err(e) => Ok(HandlerReply::failed(format!(
                "Failed to delete person {} from learning platform: {e}",
                event.person_id
            ))),
        }
    }
}

impl EventHandler for LearningPlatformSync {
    fn handle<'a>(
        &'a self,
        event: &'a DomainEvent,
        keep_alive: KeepAlive,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if !self.config.enabled {
                tracing::info!(
                    event_type = %event.kind(),
                    "Learning platform sync is disabled, ignoring event"
                );
                return Ok(HandlerReply::Done);
            }
            match event.payload() {
                EventPayload::RoleUpdated(role) => self.role_updated(role, keep_alive).await,
                EventPayload::PersonDeleted(person) => self.person_deleted(person).await,
                _ => Ok(HandlerReply::Done),
            }
        })
    }

    fn name(&self) -> &str {
        "learning-platform"
    }
}

struct CreatePersons<'a> {
    client: &'a dyn LearningPlatformClient,
}

impl MassActionSink<Person> for CreatePersons<'_> {
    type Request = Vec<LearningPlatformUser>;
    type Value = ();

    fn translate(&self, items: &[Person]) -> Self::Request {
        items.iter().map(LearningPlatformUser::from).collect()
    }

    fn send(
        &self,
        request: Self::Request,
    ) -> BoxFuture<'_, Result<MassActionResult<()>, GatewayError>> {
        Box::pin(async move { self.client.create_persons(&request).await })
    }
}
