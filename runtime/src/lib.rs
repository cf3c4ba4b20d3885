//! # IAM Events Runtime
//!
//! Execution side of the IAM event synchronization core.
//!
//! ## Core Components
//!
//! - **Routing**: event kind → topic, dead-letter topic and key ([`routing`])
//! - **Producer Gateway**: fault-isolated publish and dead-letter paths ([`producer`])
//! - **Dispatcher**: decode, look up and supervise handlers with a renewable
//!   timeout ([`supervisor`])
//! - **Event Service**: connect/subscribe/consume/disconnect, gated by the
//!   enable flag ([`lifecycle`])
//! - **Metrics**: counters for the dispatch and publish paths ([`metrics`])
//!
//! ## Example
//!
//! ```ignore
//! use iam_events_runtime::EventService;
//!
//! let service = EventService::builder(config.kafka.clone(), producer, consumer)
//!     .subscribe(EventKind::PersonDeleted, audit_handler)
//!     .build();
//!
//! service.on_start().await;
//! service.gateway().publish(&event).await;
//! service.on_stop().await;
//! ```

/// Consumer lifecycle hooks
pub mod lifecycle;

/// Metrics for the dispatch and publish paths
pub mod metrics;

/// Producer gateway
pub mod producer;

/// Event kind → destination routing
pub mod routing;

/// Dispatch supervision
pub mod supervisor;

pub use lifecycle::{EventService, EventServiceBuilder};
pub use producer::{ProducerGateway, PublishStatus};
pub use routing::{Route, RoutingTable};
pub use supervisor::{DispatchReport, Dispatcher, HandlerOutcome};
