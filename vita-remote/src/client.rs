//! Owner-scoped collection client.

use crate::backend::RemoteBackend;
use crate::filter::{Filter, OrderBy};
use std::sync::Arc;
use tracing::{debug, warn};
use vita_types::{ErrorCode, OwnerKey, Record, RecordId, RemoteError, RemoteResult};

/// A thin typed wrapper over one named remote collection, constrained to a
/// single owner key.
///
/// Every query and mutation issued through this client carries the owner key,
/// regardless of what the caller passes in. The backend's access policy
/// enforces scoping server-side as well; the client never relies on that
/// alone.
#[derive(Clone)]
pub struct CollectionClient {
    backend: Arc<dyn RemoteBackend>,
    collection: String,
    owner: OwnerKey,
}

impl CollectionClient {
    /// Creates a client for one collection and owner scope.
    #[must_use]
    pub fn new(backend: Arc<dyn RemoteBackend>, collection: impl Into<String>, owner: OwnerKey) -> Self {
        Self {
            backend,
            collection: collection.into(),
            owner,
        }
    }

    /// The collection name this client targets.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The owner scope of this client.
    #[must_use]
    pub fn owner(&self) -> OwnerKey {
        self.owner
    }

    /// A filter over this client's owner scope, for further narrowing.
    #[must_use]
    pub fn filter(&self) -> Filter {
        Filter::owner(self.owner)
    }

    /// Queries all rows in scope.
    pub async fn query(&self, order: Option<&OrderBy>) -> RemoteResult<Vec<Record>> {
        self.query_filtered(self.filter(), order).await
    }

    /// Queries with extra conditions. The filter's owner is overwritten with
    /// this client's owner so a caller cannot widen the scope.
    pub async fn query_filtered(
        &self,
        mut filter: Filter,
        order: Option<&OrderBy>,
    ) -> RemoteResult<Vec<Record>> {
        filter.owner = self.owner;
        self.backend.query(&self.collection, &filter, order).await
    }

    /// Inserts a new row. The backend assigns id and timestamps.
    pub async fn insert(&self, payload: serde_json::Value) -> RemoteResult<Record> {
        debug!(collection = %self.collection, "insert");
        self.backend.insert(&self.collection, self.owner, payload).await
    }

    /// Applies a shallow patch to a row.
    pub async fn update(&self, id: RecordId, patch: serde_json::Value) -> RemoteResult<Record> {
        debug!(collection = %self.collection, %id, "update");
        self.backend.update(&self.collection, id, self.owner, patch).await
    }

    /// Deletes a row.
    pub async fn delete(&self, id: RecordId) -> RemoteResult<()> {
        debug!(collection = %self.collection, %id, "delete");
        self.backend.delete(&self.collection, id, self.owner).await
    }

    /// Update-or-create keyed by a natural uniqueness constraint.
    ///
    /// `natural_key` lists the payload pointers that identify the row (e.g.
    /// `["/log_date"]` for one mood log per date). An existing row with the
    /// same key values is patched; otherwise a new row is inserted. An insert
    /// that loses a double-submit race and comes back with `conflict` is
    /// resolved by re-querying and patching the winner, so the operation is
    /// safe to run more than once.
    ///
    /// A payload missing any of the key fields is rejected as a validation
    /// error: without the full key the match would degrade to the bare owner
    /// scope and patch an arbitrary row.
    pub async fn upsert(
        &self,
        natural_key: &[&str],
        payload: serde_json::Value,
    ) -> RemoteResult<Record> {
        for pointer in natural_key {
            if payload.pointer(pointer).is_none() {
                return Err(RemoteError::new(
                    ErrorCode::ValidationError,
                    self.collection.as_str(),
                    "upsert",
                )
                .with_detail(format!("payload missing natural key field '{pointer}'")));
            }
        }
        let filter = self.natural_key_filter(natural_key, &payload);
        let existing = self.query_filtered(filter.clone(), None).await?;

        if let Some(found) = existing.first() {
            if existing.len() > 1 {
                // Duplicates from a pre-upsert era; patch the first, leave
                // cleanup to the backend's constraint.
                warn!(
                    collection = %self.collection,
                    count = existing.len(),
                    "multiple rows match natural key"
                );
            }
            return self.update(found.id, payload).await;
        }

        match self.insert(payload.clone()).await {
            Ok(record) => Ok(record),
            Err(err) if err.code == ErrorCode::Conflict => {
                // Lost the race: another writer inserted the keyed row after
                // our query. Patch theirs.
                debug!(collection = %self.collection, "upsert conflict, re-querying");
                let winners = self.query_filtered(filter, None).await?;
                match winners.first() {
                    Some(winner) => self.update(winner.id, payload).await,
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn natural_key_filter(&self, natural_key: &[&str], payload: &serde_json::Value) -> Filter {
        let mut filter = self.filter();
        for pointer in natural_key {
            if let Some(value) = payload.pointer(pointer) {
                filter = filter.and_eq(*pointer, value.clone());
            }
        }
        filter
    }
}
