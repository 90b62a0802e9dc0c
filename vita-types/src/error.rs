//! The backend error taxonomy.
//!
//! Every remote operation surfaces a typed error carrying a stable backend
//! code. Unknown codes are treated as fatal; only `transient_unavailable` is
//! eligible for retry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for remote collection operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Stable error codes surfaced by the remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The addressed row does not exist.
    NotFound,
    /// A unique-constraint violation (e.g. double-submit of a keyed row).
    Conflict,
    /// Owner-key mismatch or expired session.
    PermissionDenied,
    /// Network timeout or backend temporarily unavailable.
    TransientUnavailable,
    /// Malformed payload or out-of-range value.
    ValidationError,
    /// A code this client does not recognize. Never retried.
    #[serde(untagged)]
    Unknown(String),
}

impl ErrorCode {
    /// Whether a failed operation with this code may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientUnavailable)
    }
}

/// A failed remote operation, with enough context to log meaningfully.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{operation} on '{collection}' failed: {code:?}")]
pub struct RemoteError {
    /// The backend error code.
    pub code: ErrorCode,
    /// Collection the operation targeted.
    pub collection: String,
    /// Operation name ("query", "insert", "update", "delete", "subscribe").
    pub operation: String,
    /// Optional backend-provided detail message.
    pub detail: Option<String>,
}

impl RemoteError {
    /// Creates an error for an operation against a collection.
    #[must_use]
    pub fn new(
        code: ErrorCode,
        collection: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            code,
            collection: collection.into(),
            operation: operation.into(),
            detail: None,
        }
    }

    /// Attaches a backend detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Whether this failure may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// A short message suitable for surfacing to a user. Raw backend detail
    /// never crosses the hook boundary.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self.code {
            ErrorCode::NotFound => "That item no longer exists.",
            ErrorCode::Conflict => "That entry already exists.",
            ErrorCode::PermissionDenied => "Please sign in again.",
            ErrorCode::TransientUnavailable => "Connection problem, please retry.",
            ErrorCode::ValidationError => "Please check the entered values.",
            ErrorCode::Unknown(_) => "Something went wrong.",
        }
    }
}
