//! The generic record shape every remote collection instantiates.

use crate::{OwnerKey, RecordId};
use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A row fetched from (or pushed by) a remote collection.
///
/// The `payload` field holds arbitrary JSON whose structure is defined by the
/// domain (an activity, a meal, a mood log, a chat message, ...). The sync
/// core only reads payload fields through the JSON-pointer accessors, for
/// sorting and natural-key matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Backend-assigned unique identifier.
    pub id: RecordId,
    /// The owner scope this row belongs to.
    pub owner: OwnerKey,
    /// Domain-specific fields.
    pub payload: serde_json::Value,
    /// Milliseconds since epoch, set by the backend on insert.
    pub created_at: i64,
    /// Milliseconds since epoch, refreshed by the backend on every write.
    /// Invariant: `updated_at >= created_at`.
    pub updated_at: i64,
}

impl Record {
    /// Extract a string value from `payload` using a JSON pointer (e.g. "/mood").
    #[must_use]
    pub fn get_str(&self, pointer: &str) -> Option<&str> {
        self.payload.pointer(pointer).and_then(|v| v.as_str())
    }

    /// Extract a boolean value from `payload` using a JSON pointer.
    #[must_use]
    pub fn get_bool(&self, pointer: &str) -> Option<bool> {
        self.payload.pointer(pointer).and_then(|v| v.as_bool())
    }

    /// Extract a numeric value from `payload` using a JSON pointer.
    #[must_use]
    pub fn get_number(&self, pointer: &str) -> Option<f64> {
        self.payload.pointer(pointer).and_then(|v| v.as_f64())
    }

    /// Returns true if `other` is a newer write of the same row.
    /// Ties go to `other` so an authoritative server echo replaces an
    /// optimistic local guess with equal timestamps.
    #[must_use]
    pub fn is_superseded_by(&self, other: &Record) -> bool {
        self.id == other.id && other.updated_at >= self.updated_at
    }
}
