//! Push-channel change events.
//!
//! The backend delivers at-least-once row-level notifications for every
//! subscribed collection. Delivery order between distinct rows is not
//! guaranteed; per-row order follows backend emission order. Merge logic on
//! the receiving side must therefore be idempotent.

use crate::{Record, RecordId};
use serde::{Deserialize, Serialize};

/// A row-level change delivered over the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    /// A row was inserted. Carries the full new row.
    Insert(Record),
    /// A row was updated. Carries the full row after the write.
    Update(Record),
    /// A row was deleted. Only the id survives.
    Delete(RecordId),
}

impl ChangeEvent {
    /// The id of the row this event concerns.
    #[must_use]
    pub fn record_id(&self) -> RecordId {
        match self {
            Self::Insert(r) | Self::Update(r) => r.id,
            Self::Delete(id) => *id,
        }
    }

    /// The row carried by the event, if any.
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Insert(r) | Self::Update(r) => Some(r),
            Self::Delete(_) => None,
        }
    }
}
