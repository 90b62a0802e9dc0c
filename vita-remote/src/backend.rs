//! Backend abstraction.
//!
//! Defines the trait the sync layer talks to, so the real backend-as-a-service
//! adapter and the in-memory test backend are interchangeable.

use crate::filter::{Filter, OrderBy};
use async_trait::async_trait;
use tokio::sync::mpsc;
use vita_types::{ChangeEvent, OwnerKey, Record, RecordId, RemoteResult};

/// Opaque handle identifying one open push-channel subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

/// An open push channel for one collection.
///
/// The receiver yields row-level change events matching the subscribed
/// filter, in backend emission order per row. A closed receiver means the
/// transport dropped; the consumer is expected to re-subscribe.
pub struct ChangeStream {
    /// Token for unsubscribing.
    pub token: SubscriptionToken,
    /// The event stream.
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// A remote backend holding named collections of owner-scoped records.
///
/// All mutating operations take the caller's owner key and must refuse to
/// touch rows outside that scope (`permission_denied`). Ids and timestamps
/// are assigned server-side: `insert` returns the authoritative row,
/// `update` returns the row with a refreshed `updated_at`.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Queries a collection. Results match the filter; when `order` is given
    /// they come back sorted under it.
    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
        order: Option<&OrderBy>,
    ) -> RemoteResult<Vec<Record>>;

    /// Inserts a new row. The backend assigns `id`, `created_at` and
    /// `updated_at`.
    async fn insert(
        &self,
        collection: &str,
        owner: OwnerKey,
        payload: serde_json::Value,
    ) -> RemoteResult<Record>;

    /// Applies a shallow object-merge patch to a row's payload and refreshes
    /// `updated_at`.
    async fn update(
        &self,
        collection: &str,
        id: RecordId,
        owner: OwnerKey,
        patch: serde_json::Value,
    ) -> RemoteResult<Record>;

    /// Deletes a row.
    async fn delete(&self, collection: &str, id: RecordId, owner: OwnerKey) -> RemoteResult<()>;

    /// Opens a push channel delivering changes to rows matching `filter`.
    async fn subscribe(&self, collection: &str, filter: Filter) -> RemoteResult<ChangeStream>;

    /// Closes a push channel. Unknown tokens are ignored.
    async fn unsubscribe(&self, token: SubscriptionToken);
}
