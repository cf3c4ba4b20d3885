//! Domain events carried over the message bus.
//!
//! Events are a closed set: every kind has a stable wire tag (used in the
//! `eventKey` transport header) and a payload struct. Routing by tag replaces
//! any lookup by runtime type name, so adding a kind means extending
//! [`EventKind`], [`EventPayload`] and the match arms below; the compiler points
//! at every place that needs an update.
//!
//! # Example
//!
//! ```
//! use iam_events_core::event::{DomainEvent, EventKind, PersonDeleted};
//! use uuid::Uuid;
//!
//! let event = DomainEvent::new(PersonDeleted {
//!     person_id: Uuid::new_v4(),
//!     username: Some("jdoe".to_string()),
//!     email: None,
//! });
//!
//! assert_eq!(event.kind(), EventKind::PersonDeleted);
//! assert_eq!(event.kind().tag(), "person.deleted");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Identifies the kind of a [`DomainEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// A person was created
    PersonCreated,
    /// A person's name or username changed
    PersonRenamed,
    /// A person was deleted
    PersonDeleted,
    /// A role's attributes or attached service providers changed
    RoleUpdated,
    /// An email address was generated for a person
    EmailAddressGenerated,
}

impl EventKind {
    /// Every known kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::PersonCreated,
        Self::PersonRenamed,
        Self::PersonDeleted,
        Self::RoleUpdated,
        Self::EmailAddressGenerated,
    ];

    /// Wire tag written to the `eventKey` header.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::PersonCreated => "person.created",
            Self::PersonRenamed => "person.renamed",
            Self::PersonDeleted => "person.deleted",
            Self::RoleUpdated => "role.updated",
            Self::EmailAddressGenerated => "email.generated",
        }
    }

    /// Resolve a wire tag back to its kind.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Human-readable type name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PersonCreated => "PersonCreated",
            Self::PersonRenamed => "PersonRenamed",
            Self::PersonDeleted => "PersonDeleted",
            Self::RoleUpdated => "RoleUpdated",
            Self::EmailAddressGenerated => "EmailAddressGenerated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A person was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonCreated {
    /// Person identifier
    pub person_id: Uuid,
    /// Login name, if one was assigned at creation
    pub username: Option<String>,
    /// Given name
    pub given_name: String,
    /// Family name
    pub family_name: String,
}

/// A person's name changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonRenamed {
    /// Person identifier
    pub person_id: Uuid,
    /// New login name
    pub username: String,
    /// Login name before the rename
    pub old_username: String,
    /// New given name
    pub given_name: String,
    /// New family name
    pub family_name: String,
}

/// A person was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonDeleted {
    /// Person identifier
    pub person_id: Uuid,
    /// Login name at deletion time
    pub username: Option<String>,
    /// Primary email address at deletion time
    pub email: Option<String>,
}

/// A role changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleUpdated {
    /// Role identifier
    pub role_id: Uuid,
    /// Role display name
    pub name: String,
    /// Service providers now attached to the role
    pub service_provider_ids: Vec<Uuid>,
}

/// An email address was generated for a person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAddressGenerated {
    /// Person identifier
    pub person_id: Uuid,
    /// Login name of the person
    pub username: String,
    /// The generated address
    pub address: String,
    /// Whether the address is active
    pub enabled: bool,
}

/// Kind-specific data of a [`DomainEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// See [`PersonCreated`]
    PersonCreated(PersonCreated),
    /// See [`PersonRenamed`]
    PersonRenamed(PersonRenamed),
    /// See [`PersonDeleted`]
    PersonDeleted(PersonDeleted),
    /// See [`RoleUpdated`]
    RoleUpdated(RoleUpdated),
    /// See [`EmailAddressGenerated`]
    EmailAddressGenerated(EmailAddressGenerated),
}

impl EventPayload {
    /// Kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::PersonCreated(_) => EventKind::PersonCreated,
            Self::PersonRenamed(_) => EventKind::PersonRenamed,
            Self::PersonDeleted(_) => EventKind::PersonDeleted,
            Self::RoleUpdated(_) => EventKind::RoleUpdated,
            Self::EmailAddressGenerated(_) => EventKind::EmailAddressGenerated,
        }
    }

    /// Business key used as the message key (partitioning).
    #[must_use]
    pub fn routing_key(&self) -> String {
        match self {
            Self::PersonCreated(e) => e.person_id.to_string(),
            Self::PersonRenamed(e) => e.person_id.to_string(),
            Self::PersonDeleted(e) => e.person_id.to_string(),
            Self::RoleUpdated(e) => e.role_id.to_string(),
            Self::EmailAddressGenerated(e) => e.person_id.to_string(),
        }
    }

    /// Serialize the payload fields to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if a field cannot be serialized.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            Self::PersonCreated(e) => serde_json::to_value(e),
            Self::PersonRenamed(e) => serde_json::to_value(e),
            Self::PersonDeleted(e) => serde_json::to_value(e),
            Self::RoleUpdated(e) => serde_json::to_value(e),
            Self::EmailAddressGenerated(e) => serde_json::to_value(e),
        }
    }

    /// Deserialize the payload of `kind` from a JSON value.
    ///
    /// Unknown fields are ignored; missing required fields fail.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error when the value does not match
    /// the payload shape of `kind`.
    pub fn from_json(kind: EventKind, value: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EventKind::PersonCreated => Self::PersonCreated(serde_json::from_value(value)?),
            EventKind::PersonRenamed => Self::PersonRenamed(serde_json::from_value(value)?),
            EventKind::PersonDeleted => Self::PersonDeleted(serde_json::from_value(value)?),
            EventKind::RoleUpdated => Self::RoleUpdated(serde_json::from_value(value)?),
            EventKind::EmailAddressGenerated => {
                Self::EmailAddressGenerated(serde_json::from_value(value)?)
            },
        })
    }
}

impl From<PersonCreated> for EventPayload {
    fn from(event: PersonCreated) -> Self {
        Self::PersonCreated(event)
    }
}

impl From<PersonRenamed> for EventPayload {
    fn from(event: PersonRenamed) -> Self {
        Self::PersonRenamed(event)
    }
}

impl From<PersonDeleted> for EventPayload {
    fn from(event: PersonDeleted) -> Self {
        Self::PersonDeleted(event)
    }
}

impl From<RoleUpdated> for EventPayload {
    fn from(event: RoleUpdated) -> Self {
        Self::RoleUpdated(event)
    }
}

impl From<EmailAddressGenerated> for EventPayload {
    fn from(event: EmailAddressGenerated) -> Self {
        Self::EmailAddressGenerated(event)
    }
}

/// An immutable domain event.
///
/// Created by application logic, handed to the publish path once and never
/// mutated afterwards. The `event_id` is a correlation identifier generated at
/// construction time and preserved across the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    event_id: Uuid,
    created_at: DateTime<Utc>,
    payload: EventPayload,
}

impl DomainEvent {
    /// Create a new event with a fresh correlation id.
    #[must_use]
    pub fn new(payload: impl Into<EventPayload>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            created_at: Utc::now(),
            payload: payload.into(),
        }
    }

    /// Rebuild an event with known identity, e.g. after decoding.
    #[must_use]
    pub const fn from_parts(
        event_id: Uuid,
        created_at: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id,
            created_at,
            payload,
        }
    }

    /// Correlation identifier.
    #[must_use]
    pub const fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Kind-specific data.
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Business key used as the message key.
    #[must_use]
    pub fn routing_key(&self) -> String {
        self.payload.routing_key()
    }
}
