//! # IAM Events Core
//!
//! Core types for the IAM event synchronization core.
//!
//! This crate holds everything that is pure or purely abstract:
//!
//! - **Events**: the closed set of domain events and their wire tags ([`event`])
//! - **Envelope codec**: domain event ⇄ `{ key, headers, body }` ([`envelope`])
//! - **Handlers**: the handler trait, replies and the keep-alive handle ([`handler`])
//! - **Registry**: event kind → ordered handlers ([`registry`])
//! - **Transport**: producer/consumer traits implemented by broker clients ([`transport`])
//! - **Configuration**: environment-driven settings ([`config`])
//!
//! Execution (dispatch supervision, publishing, lifecycle) lives in
//! `iam-events-runtime`; the Kafka client lives in `iam-events-redpanda`.
//!
//! ## Example
//!
//! ```
//! use iam_events_core::envelope::{decode, encode};
//! use iam_events_core::event::{DomainEvent, PersonDeleted};
//! use iam_events_core::handler::{handler_fn, HandlerReply};
//! use iam_events_core::registry::HandlerRegistry;
//! use iam_events_core::event::EventKind;
//! use uuid::Uuid;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(
//!     EventKind::PersonDeleted,
//!     handler_fn(|_event, _keep_alive| async { Ok(HandlerReply::Done) }),
//! );
//!
//! let event = DomainEvent::new(PersonDeleted {
//!     person_id: Uuid::new_v4(),
//!     username: None,
//!     email: None,
//! });
//! let envelope = encode(&event)?;
//! assert_eq!(decode(&envelope)?, event);
//! assert_eq!(registry.lookup(event.kind()).len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod registry;
pub mod transport;

pub use config::{Config, ConfigError, IntegrationConfig, KafkaConfig, TlsConfig};
pub use envelope::{DecodeError, EncodeError, TransportEnvelope, decode, encode};
pub use event::{DomainEvent, EventKind, EventPayload};
pub use handler::{EventHandler, HandlerReply, HandlerResult, KeepAlive, handler_fn};
pub use registry::HandlerRegistry;
pub use transport::{
    InboundMessage, InboundStream, MessageConsumer, MessageProducer, OutboundMessage,
    TransportError,
};
