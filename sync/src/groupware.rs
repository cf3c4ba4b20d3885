//! Groupware integration.
//!
//! | Event | Action | On gateway failure |
//! |-------|--------|--------------------|
//! | `EmailAddressGenerated` | create account | soft failure (dead-lettered) |
//! | `PersonRenamed` | change username | soft failure (dead-lettered) |
//! | `PersonDeleted` | delete account, missing ones ignored | soft failure (dead-lettered) |
//! | `RoleUpdated` | add role holders to its group, paged | refused members are logged |

use crate::cursor::{CursorSynchronizer, MassActionSink};
use crate::error::GatewayError;
use crate::gateway::{GroupwareAccount, GroupwareClient, Person, PersonRepository, RoleMembers};
use crate::mass_action::MassActionResult;
use anyhow::Context;
use futures::future::BoxFuture;
use iam_events_core::config::IntegrationConfig;
use iam_events_core::event::{
    DomainEvent, EmailAddressGenerated, EventKind, EventPayload, PersonDeleted, PersonRenamed,
    RoleUpdated,
};
use iam_events_core::handler::{EventHandler, HandlerReply, HandlerResult, KeepAlive};
use iam_events_core::registry::HandlerRegistry;
use std::sync::Arc;

/// Event kinds this integration handles.
pub const SUBSCRIBED_KINDS: [EventKind; 4] = [
    EventKind::EmailAddressGenerated,
    EventKind::PersonRenamed,
    EventKind::PersonDeleted,
    EventKind::RoleUpdated,
];

/// Keeps groupware accounts and groups in line with the identity system.
pub struct GroupwareSync {
    persons: Arc<dyn PersonRepository>,
    client: Arc<dyn GroupwareClient>,
    config: IntegrationConfig,
}

impl GroupwareSync {
    /// Create the integration.
    #[must_use]
    pub fn new(
        persons: Arc<dyn PersonRepository>,
        client: Arc<dyn GroupwareClient>,
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

    async fn email_generated(&self, event: &EmailAddressGenerated) -> HandlerResult {
        let account = GroupwareAccount {
            person_id: event.person_id,
            username: event.username.clone(),
            address: event.address.clone(),
            enabled: event.enabled,
        };
        Ok(match self.client.create_account(&account).await {
            Ok(()) => {
                tracing::info!(username = %account.username, "Created groupware account");
                HandlerReply::Done
            },
            Err(e) => HandlerReply::failed(format!(
                "Failed to create groupware account {}: {e}",
                account.username
            )),
        })
    }

    async fn person_renamed(&self, event: &PersonRenamed) -> HandlerResult {
        if event.old_username == event.username {
            return Ok(HandlerReply::Done);
        }
        Ok(
            match self
                .client
                .rename_account(&event.old_username, &event.username)
                .await
            {
                Ok(()) => HandlerReply::Done,
                Err(e) => HandlerReply::failed(format!(
                    "Failed to rename groupware account {} to {}: {e}",
                    event.old_username, event.username
                )),
            },
        )
    }

    async fn person_deleted(&self, event: &PersonDeleted) -> HandlerResult {
        let Some(username) = event.username.as_deref() else {
            tracing::debug!(
                person_id = %event.person_id,
                "Deleted person had no username, no groupware account"
            );
            return Ok(HandlerReply::Done);
        };
        Ok(match self.client.delete_account(username).await {
            Ok(()) | Err(GatewayError::NotFound(_)) => HandlerReply::Done,
            Err(e) => {
                HandlerReply::failed(format!("Failed to delete groupware account {username}: {e}"))
            },
        })
    }

    async fn role_updated(&self, event: &RoleUpdated, keep_alive: KeepAlive) -> HandlerResult {
        let source = RoleMembers::new(self.persons.as_ref(), event.role_id);
        let sink = AddGroupMembers {
            client: self.client.as_ref(),
            group: &event.name,
        };

        let run = CursorSynchronizer::new(self.config.max_batch_size)
            .run(&source, &sink, &keep_alive)
            .await
            .with_context(|| format!("Failed to sync members of group {}", event.name))?;

        for failure in &run.failures {
            tracing::error!(
                group = %event.name,
                username = %failure.item.username,
                reason = %failure.reason,
                "Failed to add member to groupware group"
            );
        }
        tracing::info!(
            group = %event.name,
            members = run.succeeded(),
            failed = run.failures.len(),
            "Synced groupware group members"
        );
        Ok(HandlerReply::Done)
    }
}

impl EventHandler for GroupwareSync {
    fn handle<'a>(
        &'a self,
        event: &'a DomainEvent,
        keep_alive: KeepAlive,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if !self.config.enabled {
                tracing::info!(
                    event_type = %event.kind(),
                    "Groupware sync is disabled, ignoring event"
                );
                return Ok(HandlerReply::Done);
            }
            match event.payload() {
                EventPayload::EmailAddressGenerated(email) => self.email_generated(email).await,
                EventPayload::PersonRenamed(person) => self.person_renamed(person).await,
                EventPayload::PersonDeleted(person) => self.person_deleted(person).await,
                EventPayload::RoleUpdated(role) => self.role_updated(role, keep_alive).await,
                EventPayload::PersonCreated(_) => Ok(HandlerReply::Done),
            }
        })
    }

    fn name(&self) -> &str {
        "groupware"
    }
}

struct AddGroupMembers<'a> {
    client: &'a dyn GroupwareClient,
    group: &'a str,
}

impl MassActionSink<Person> for AddGroupMembers<'_> {
    type Request = Vec<String>;
    type Value = ();

    fn translate(&self, items: &[Person]) -> Self::Request {
        items.iter().map(|person| person.username.clone()).collect()
    }

    fn send(
        &self,
        request: Self::Request,
    ) -> BoxFuture<'_, Result<MassActionResult<()>, GatewayError>> {
        Box::pin(async move { self.client.add_group_members(self.group, &request).await })
    }
}
