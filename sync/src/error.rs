//! Error types for external gateways and synchronization runs.

use thiserror::Error;

/// Errors returned by external system gateways (repositories, learning
/// platform, groupware).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The system could not be reached or timed out
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Credentials were rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The system refused the request
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    /// Whether repeating the call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors that abort a synchronization run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A page could not be fetched from the source
    #[error("Failed to fetch page at cursor {cursor:?}: {source}")]
    Fetch {
        /// Cursor of the page that failed
        cursor: Option<String>,
        /// Underlying gateway error
        #[source]
        source: GatewayError,
    },
}
