//! Error types for the synced collection layer.

use thiserror::Error;
use vita_types::RemoteError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by synced collections.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    /// A remote operation failed and was not (or could not be) retried.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A retryable failure persisted through every allowed attempt.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: RemoteError },

    /// The collection was torn down; the operation was not performed.
    #[error("collection is closed")]
    Closed,

    /// No user is signed in.
    #[error("no signed-in user")]
    SignedOut,
}

impl SyncError {
    /// The underlying remote error, if any.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) | Self::RetriesExhausted { last: err, .. } => Some(err),
            _ => None,
        }
    }

    /// A short message suitable for surfacing to a user. Raw backend errors
    /// never cross the hook boundary.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Remote(err) => err.user_message(),
            Self::RetriesExhausted { .. } => "Connection problem, please retry.",
            Self::Closed => "This view is no longer active.",
            Self::SignedOut => "Please sign in.",
        }
    }
}

/// The reduced error a hook exposes to UI layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Operation that failed ("fetch", "add", "update", "delete").
    pub operation: String,
    /// User-facing message.
    pub message: String,
}

impl ErrorInfo {
    pub(crate) fn new(operation: &str, err: &SyncError) -> Self {
        Self {
            operation: operation.to_string(),
            message: err.user_message().to_string(),
        }
    }
}
