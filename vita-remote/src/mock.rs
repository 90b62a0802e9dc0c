//! An in-memory backend for testing.
//!
//! Emulates the relevant behavior of the real backend-as-a-service: owner
//! scoping, server-assigned ids and timestamps, unique-constraint conflicts,
//! and row-level push notifications. Tests can script failures per operation
//! and inspect call counts.

use crate::backend::{ChangeStream, RemoteBackend, SubscriptionToken};
use crate::filter::{Filter, OrderBy};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;
use vita_types::{
    now_millis, ChangeEvent, ErrorCode, OwnerKey, Record, RecordId, RemoteError, RemoteResult,
};

struct SubEntry {
    collection: String,
    filter: Filter,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Record>>,
    unique_keys: HashMap<String, Vec<String>>,
    subs: HashMap<u64, SubEntry>,
    next_token: u64,
    fail_plan: HashMap<(String, String), VecDeque<ErrorCode>>,
    calls: HashMap<(String, String), usize>,
    shadowed_queries: HashMap<String, usize>,
}

/// In-memory `RemoteBackend` implementation.
#[derive(Default)]
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a unique constraint on a collection: no two rows of one owner
    /// may share the same values at the given payload pointers.
    pub fn set_unique_key(&self, collection: &str, pointers: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        inner.unique_keys.insert(
            collection.to_string(),
            pointers.iter().map(|p| (*p).to_string()).collect(),
        );
    }

    /// Scripts the next call of `operation` on `collection` to fail with
    /// `code`. Multiple scripted failures queue up in order.
    pub fn fail_next(&self, collection: &str, operation: &str, code: ErrorCode) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .fail_plan
            .entry((collection.to_string(), operation.to_string()))
            .or_default()
            .push_back(code);
    }

    /// Makes the next query on `collection` return no rows regardless of
    /// contents, simulating a stale read ahead of a concurrent writer (the
    /// race the upsert conflict path exists for).
    pub fn shadow_next_query(&self, collection: &str) {
        let mut inner = self.inner.lock().unwrap();
        *inner
            .shadowed_queries
            .entry(collection.to_string())
            .or_insert(0) += 1;
    }

    /// Number of times `operation` was called on `collection` (failed calls
    /// included).
    #[must_use]
    pub fn call_count(&self, collection: &str, operation: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .calls
            .get(&(collection.to_string(), operation.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// All rows currently stored in a collection, unordered.
    #[must_use]
    pub fn rows(&self, collection: &str) -> Vec<Record> {
        let inner = self.inner.lock().unwrap();
        inner.tables.get(collection).cloned().unwrap_or_default()
    }

    /// Re-delivers an event to current subscribers, simulating the
    /// at-least-once push channel delivering a duplicate notification.
    pub fn replay_event(&self, collection: &str, event: ChangeEvent) {
        let mut inner = self.inner.lock().unwrap();
        let record = event.record().cloned();
        match record {
            Some(record) => Self::emit(&mut inner, collection, &record, event),
            None => {
                // Delete replay: no row to match against; deliver to every
                // subscriber of the collection.
                let dead: Vec<u64> = inner
                    .subs
                    .iter()
                    .filter(|(_, s)| s.collection == collection)
                    .filter(|(_, s)| s.sender.send(event.clone()).is_err())
                    .map(|(t, _)| *t)
                    .collect();
                for token in dead {
                    inner.subs.remove(&token);
                }
            }
        }
    }

    /// Drops all push channels for a collection without removing data,
    /// simulating a transport drop. Subscribers see their stream end and
    /// are expected to reconnect.
    pub fn drop_channels(&self, collection: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.subs.retain(|_, s| s.collection != collection);
    }

    /// Number of currently open push channels for a collection.
    #[must_use]
    pub fn open_channels(&self, collection: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .subs
            .values()
            .filter(|s| s.collection == collection)
            .count()
    }

    fn count_call(inner: &mut Inner, collection: &str, operation: &str) {
        *inner
            .calls
            .entry((collection.to_string(), operation.to_string()))
            .or_insert(0) += 1;
    }

    fn take_failure(
        inner: &mut Inner,
        collection: &str,
        operation: &str,
    ) -> Option<RemoteError> {
        let code = inner
            .fail_plan
            .get_mut(&(collection.to_string(), operation.to_string()))?
            .pop_front()?;
        Some(RemoteError::new(code, collection, operation))
    }

    /// Sends an event to every subscriber whose filter matches `record`,
    /// pruning subscribers whose receiver is gone.
    fn emit(inner: &mut Inner, collection: &str, record: &Record, event: ChangeEvent) {
        let dead: Vec<u64> = inner
            .subs
            .iter()
            .filter(|(_, s)| s.collection == collection && s.filter.matches(record))
            .filter(|(_, s)| s.sender.send(event.clone()).is_err())
            .map(|(t, _)| *t)
            .collect();
        for token in dead {
            inner.subs.remove(&token);
        }
    }

    fn violates_unique_key(
        inner: &Inner,
        collection: &str,
        owner: OwnerKey,
        payload: &serde_json::Value,
        exclude: Option<RecordId>,
    ) -> bool {
        let Some(pointers) = inner.unique_keys.get(collection) else {
            return false;
        };
        let Some(rows) = inner.tables.get(collection) else {
            return false;
        };
        rows.iter()
            .filter(|r| r.owner == owner && Some(r.id) != exclude)
            .any(|r| {
                pointers.iter().all(|p| {
                    match (r.payload.pointer(p), payload.pointer(p)) {
                        (Some(a), Some(b)) => a == b,
                        _ => false,
                    }
                })
            })
    }
}

#[async_trait]
impl RemoteBackend for InMemoryBackend {
    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
        order: Option<&OrderBy>,
    ) -> RemoteResult<Vec<Record>> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_call(&mut inner, collection, "query");
        if let Some(err) = Self::take_failure(&mut inner, collection, "query") {
            return Err(err);
        }
        if let Some(remaining) = inner.shadowed_queries.get_mut(collection) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(Vec::new());
            }
        }

        let mut rows: Vec<Record> = inner
            .tables
            .get(collection)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        if let Some(order) = order {
            order.sort(&mut rows);
        }
        Ok(rows)
    }

    async fn insert(
        &self,
        collection: &str,
        owner: OwnerKey,
        payload: serde_json::Value,
    ) -> RemoteResult<Record> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_call(&mut inner, collection, "insert");
        if let Some(err) = Self::take_failure(&mut inner, collection, "insert") {
            return Err(err);
        }
        if !payload.is_object() {
            return Err(
                RemoteError::new(ErrorCode::ValidationError, collection, "insert")
                    .with_detail("payload must be an object"),
            );
        }
        if Self::violates_unique_key(&inner, collection, owner, &payload, None) {
            return Err(RemoteError::new(ErrorCode::Conflict, collection, "insert")
                .with_detail("unique constraint violated"));
        }

        let now = now_millis();
        let record = Record {
            id: RecordId::new(),
            owner,
            payload,
            created_at: now,
            updated_at: now,
        };
        inner
            .tables
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        Self::emit(&mut inner, collection, &record, ChangeEvent::Insert(record.clone()));
        Ok(record)
    }

    async fn update(
        &self,
        collection: &str,
        id: RecordId,
        owner: OwnerKey,
        patch: serde_json::Value,
    ) -> RemoteResult<Record> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_call(&mut inner, collection, "update");
        if let Some(err) = Self::take_failure(&mut inner, collection, "update") {
            return Err(err);
        }
        let Some(patch_obj) = patch.as_object().cloned() else {
            return Err(
                RemoteError::new(ErrorCode::ValidationError, collection, "update")
                    .with_detail("patch must be an object"),
            );
        };

        let Some(position) = inner
            .tables
            .get(collection)
            .and_then(|rows| rows.iter().position(|r| r.id == id))
        else {
            return Err(RemoteError::new(ErrorCode::NotFound, collection, "update"));
        };

        let existing = &inner.tables[collection][position];
        if existing.owner != owner {
            return Err(RemoteError::new(
                ErrorCode::PermissionDenied,
                collection,
                "update",
            ));
        }

        let mut merged = existing.payload.clone();
        if let Some(obj) = merged.as_object_mut() {
            for (k, v) in patch_obj {
                obj.insert(k, v);
            }
        }
        if Self::violates_unique_key(&inner, collection, owner, &merged, Some(id)) {
            return Err(RemoteError::new(ErrorCode::Conflict, collection, "update")
                .with_detail("unique constraint violated"));
        }

        let rows = inner.tables.get_mut(collection).unwrap();
        let row = &mut rows[position];
        row.payload = merged;
        // updated_at never goes backwards, even within one millisecond.
        row.updated_at = now_millis().max(row.updated_at + 1);
        let updated = row.clone();
        Self::emit(&mut inner, collection, &updated, ChangeEvent::Update(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, collection: &str, id: RecordId, owner: OwnerKey) -> RemoteResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_call(&mut inner, collection, "delete");
        if let Some(err) = Self::take_failure(&mut inner, collection, "delete") {
            return Err(err);
        }

        let Some(position) = inner
            .tables
            .get(collection)
            .and_then(|rows| rows.iter().position(|r| r.id == id))
        else {
            return Err(RemoteError::new(ErrorCode::NotFound, collection, "delete"));
        };
        if inner.tables[collection][position].owner != owner {
            return Err(RemoteError::new(
                ErrorCode::PermissionDenied,
                collection,
                "delete",
            ));
        }

        let removed = inner.tables.get_mut(collection).unwrap().remove(position);
        Self::emit(&mut inner, collection, &removed, ChangeEvent::Delete(removed.id));
        Ok(())
    }

    async fn subscribe(&self, collection: &str, filter: Filter) -> RemoteResult<ChangeStream> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_call(&mut inner, collection, "subscribe");
        if let Some(err) = Self::take_failure(&mut inner, collection, "subscribe") {
            return Err(err);
        }

        let (sender, events) = mpsc::unbounded_channel();
        inner.next_token += 1;
        let token = SubscriptionToken(inner.next_token);
        inner.subs.insert(
            token.0,
            SubEntry {
                collection: collection.to_string(),
                filter,
                sender,
            },
        );
        Ok(ChangeStream { token, events })
    }

    async fn unsubscribe(&self, token: SubscriptionToken) {
        let mut inner = self.inner.lock().unwrap();
        inner.subs.remove(&token.0);
    }
}
