//! # IAM Events Sync
//!
//! Handlers that push identity data to slow external systems.
//!
//! - **Mass actions**: per-item status of a batch call ([`mass_action`])
//! - **Cursor synchronizer**: page → translate → send → reconcile, with one
//!   keep-alive per page ([`cursor`])
//! - **Gateways**: repository and external client contracts plus retrying
//!   wrappers ([`gateway`], [`retry`])
//! - **Integrations**: learning platform ([`learning_platform`]) and
//!   groupware ([`groupware`]) event handlers
//!
//! ## Example
//!
//! ```ignore
//! use iam_events_sync::{
//!     GroupwareSync, LearningPlatformSync, RetryPolicy, RetryingLearningPlatform,
//! };
//!
//! let learning_platform = Arc::new(LearningPlatformSync::new(
//!     persons.clone(),
//!     Arc::new(RetryingLearningPlatform::new(client, RetryPolicy::default())),
//!     config.learning_platform.clone(),
//! ));
//!
//! let service = EventService::builder(config.kafka.clone(), producer, consumer)
//!     .with(|registry| learning_platform.register(registry))
//!     .build();
//! ```

pub mod cursor;
pub mod error;
pub mod gateway;
pub mod groupware;
pub mod learning_platform;
pub mod mass_action;
pub mod retry;

pub use cursor::{
    CursorSynchronizer, ItemFailure, MassActionSink, Page, PageRequest, PageSource, SyncRun,
};
pub use error::{GatewayError, SyncError};
pub use gateway::{
    GroupwareAccount, GroupwareClient, LearningPlatformClient, LearningPlatformUser, Person,
    PersonRepository, RetryingGroupware, RetryingLearningPlatform, RoleMembers,
};
pub use groupware::GroupwareSync;
pub use learning_platform::LearningPlatformSync;
pub use mass_action::{ItemStatus, MassActionResult};
pub use retry::{RetryPolicy, Retryable, retry};
