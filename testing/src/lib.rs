//! # IAM Events Testing
//!
//! Testing utilities for the IAM event synchronization core.
//!
//! This crate provides:
//! - An in-memory broker transport ([`broker`])
//! - Doubles for the person repository and the external systems ([`mocks`])
//! - A `tracing` layer that captures log events for assertions ([`logs`])
//! - Helpers to turn domain events into inbound broker messages
//!
//! ## Example
//!
//! ```ignore
//! use iam_events_testing::{CapturedLogs, in_memory_broker, inbound};
//!
//! #[tokio::test]
//! async fn soft_failure_is_dead_lettered() {
//!     let logs = CapturedLogs::new();
//!     let _guard = logs.install();
//!     let (producer, consumer) = in_memory_broker();
//!
//!     let service = EventService::builder(config, producer.clone(), consumer.clone())
//!         .subscribe(EventKind::PersonDeleted, failing_handler)
//!         .build();
//!
//!     service.dispatcher().dispatch(&inbound(&event)).await;
//!     assert_eq!(producer.sent_to("iam.person-dlq").len(), 1);
//! }
//! ```

pub mod broker;
pub mod logs;
pub mod mocks;

pub use broker::{InMemoryConsumer, InMemoryProducer, SentMessage, in_memory_broker};
pub use logs::{CapturedLogs, LogRecord};
pub use mocks::{InMemoryPersonRepository, MockGroupware, MockLearningPlatform, person, persons};

use iam_events_core::envelope::encode;
use iam_events_core::event::DomainEvent;
use iam_events_core::transport::InboundMessage;

/// Encode `event` as the broker would deliver it.
///
/// # Panics
///
/// Panics if the event cannot be encoded.
#[must_use]
#[allow(clippy::expect_used)]
pub fn inbound(event: &DomainEvent) -> InboundMessage {
    let envelope = encode(event).expect("event should encode");
    InboundMessage {
        topic: String::new(),
        partition: 0,
        offset: 0,
        key: Some(envelope.key.into_bytes()),
        value: Some(envelope.body),
        headers: envelope.headers,
    }
}
