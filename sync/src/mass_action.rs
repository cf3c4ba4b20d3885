//! Mass actions: one network call operating on a batch of items.

use serde::{Deserialize, Serialize};

/// Per-item status of a mass action, positionally aligned with the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    /// The item was applied
    Success,
    /// The item was refused
    Failure {
        /// Why the external system refused the item
        description: String,
    },
}

impl ItemStatus {
    /// Failure status with the given description.
    #[must_use]
    pub fn failure(description: impl Into<String>) -> Self {
        Self::Failure {
            description: description.into(),
        }
    }

    /// Failure description, if this is a failure.
    #[must_use]
    pub fn failure_description(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failure { description } => Some(description),
        }
    }
}

/// Response to a mass action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassActionResult<T> {
    /// One status per submitted item, in submission order
    pub status: Vec<ItemStatus>,
    /// Call-level payload returned by the external system
    pub value: T,
}

impl<T> MassActionResult<T> {
    /// Result with the given statuses.
    #[must_use]
    pub const fn new(status: Vec<ItemStatus>, value: T) -> Self {
        Self { status, value }
    }

    /// Number of items marked as failed.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.status
            .iter()
            .filter(|status| status.failure_description().is_some())
            .count()
    }
}

impl MassActionResult<()> {
    /// Result where all `count` items succeeded.
    #[must_use]
    pub fn all_succeeded(count: usize) -> Self {
        Self::new(vec![ItemStatus::Success; count], ())
    }
}
