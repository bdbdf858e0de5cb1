//! Sync engine errors.

use thiserror::Error;

/// Errors surfaced by the sync engine.
///
/// Only [`SyncError::TransportSubscribeFailed`] is returned to callers; the
/// others are recorded in the store or logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// No principal, or one without a filter value.
    #[error("User not authenticated")]
    AuthenticationMissing,

    /// The initial or imperative fetch failed.
    #[error("Fetch failed: {0}")]
    TransportQueryFailed(String),

    /// The push subscription could not be opened.
    #[error("Subscribe failed: {0}")]
    TransportSubscribeFailed(String),

    /// A change event that could not be applied.
    #[error("Malformed change event: {0}")]
    MalformedEvent(String),
}
