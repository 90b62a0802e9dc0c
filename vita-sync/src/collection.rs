//! The per-domain synced collection.
//!
//! `SyncedCollection` composes the shared machinery into the contract every
//! domain screen consumes: an observable `{ phase, items, error }` snapshot,
//! a refetch, and optimistic mutators. One instance corresponds to one
//! mounted hook in the app; teardown is deterministic and results of
//! requests outliving the instance (or its session epoch) are discarded.
//!
//! State machine per instance:
//! `Idle -> Loading -> Ready | Error -> Loading (refetch) -> ... -> Closed`.
//! Transitions are one-directional within a fetch cycle; push merges never
//! change the phase, only the items.

use crate::domain::DomainSpec;
use crate::error::{ErrorInfo, SyncError, SyncResult};
use crate::optimistic;
use crate::retry::RetryPolicy;
use crate::runtime::SyncRuntime;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};
use vita_cache::CacheKey;
use vita_remote::{ChangeHandler, ChangeSubscription, CollectionClient, Filter, OrderBy};
use vita_types::{now_millis, ErrorCode, OwnerKey, Record, RecordId, RemoteError, UserId};

/// Lifecycle phase of a synced collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, first fetch not yet started.
    Idle,
    /// A fetch is in flight.
    Loading,
    /// Items populated, subscription active.
    Ready,
    /// The last fetch failed; items retain their last-known value.
    Error,
    /// Torn down; no further state changes.
    Closed,
}

/// One observable state of a collection.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub phase: Phase,
    pub items: Vec<Record>,
    pub error: Option<ErrorInfo>,
}

#[derive(Clone)]
struct HookState {
    items: Vec<Record>,
    phase: Phase,
    error: Option<ErrorInfo>,
}

struct Core {
    spec: DomainSpec,
    client: CollectionClient,
    runtime: Arc<SyncRuntime>,
    retry: RetryPolicy,
    state: Mutex<HookState>,
    watch: watch::Sender<Snapshot>,
    alive: AtomicBool,
    /// Session epoch at open time; results arriving under a newer epoch are
    /// discarded.
    epoch: u64,
}

impl Core {
    fn list_key(&self) -> CacheKey {
        CacheKey::list(self.client.owner(), self.spec.collection)
    }

    fn is_live(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.runtime.session().epoch() == self.epoch
    }

    fn ensure_live(&self) -> SyncResult<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Closed)
        }
    }

    fn publish(&self) {
        let snapshot = {
            let state = self.state.lock().unwrap();
            Snapshot {
                phase: state.phase,
                items: state.items.clone(),
                error: state.error.clone(),
            }
        };
        self.watch.send_replace(snapshot);
    }

    /// Last-writer-wins merge of a server-originated row, idempotent under
    /// duplicate delivery.
    fn merge_into(items: &mut Vec<Record>, record: Record, order: &OrderBy) {
        match items.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                if existing.is_superseded_by(&record) {
                    *existing = record;
                }
            }
            None => items.push(record),
        }
        order.sort(items);
    }

    /// Unconditional replacement by the authoritative server response; the
    /// optimistic guess is replaced, not merely confirmed.
    fn replace_into(items: &mut Vec<Record>, record: Record, order: &OrderBy) {
        items.retain(|r| r.id != record.id);
        items.push(record);
        order.sort(items);
    }

    fn apply_push(&self, record: Record) {
        if !self.is_live() {
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            Self::merge_into(&mut state.items, record, &self.spec.order);
        }
        self.refresh_cache_from_state();
        self.publish();
    }

    fn apply_push_delete(&self, id: RecordId) {
        if !self.is_live() {
            return;
        }
        let removed = {
            let mut state = self.state.lock().unwrap();
            let before = state.items.len();
            state.items.retain(|r| r.id != id);
            state.items.len() != before
        };
        // Delete of a row we never had is a no-op.
        if removed {
            self.refresh_cache_from_state();
            self.publish();
        }
    }

    /// Writes the current item list back to the shared cache so reads from
    /// other instances see the merged state.
    fn refresh_cache_from_state(&self) {
        let items = self.state.lock().unwrap().items.clone();
        self.runtime
            .cache()
            .set_with_ttl(self.list_key(), items, self.spec.cache_ttl);
    }

    fn commit_ready(&self, mut items: Vec<Record>) {
        self.spec.order.sort(&mut items);
        {
            let mut state = self.state.lock().unwrap();
            state.items = items;
            state.phase = Phase::Ready;
            state.error = None;
        }
        self.publish();
    }

    async fn fetch(self: Arc<Self>, force: bool) -> SyncResult<()> {
        self.ensure_live()?;
        {
            let mut state = self.state.lock().unwrap();
            state.phase = Phase::Loading;
        }
        self.publish();

        let key = self.list_key();
        if !force {
            if let Some(items) = self.runtime.cache().get(&key) {
                debug!(collection = self.spec.collection, "served from cache");
                if self.is_live() {
                    self.commit_ready(items);
                }
                return Ok(());
            }
        }

        let result = self
            .retry
            .run(|| {
                let client = self.client.clone();
                let order = self.spec.order.clone();
                let key = key.clone();
                let coordinator = self.runtime.coordinator();
                let cooldown = self.spec.cooldown;
                async move {
                    coordinator
                        .coordinate(key, cooldown, force, async move {
                            client.query(Some(&order)).await
                        })
                        .await
                }
            })
            .await;

        match result {
            Ok(items) => {
                if self.is_live() {
                    self.runtime.cache().set_with_ttl(
                        key,
                        items.clone(),
                        self.spec.cache_ttl,
                    );
                    self.commit_ready(items);
                }
                Ok(())
            }
            Err(err) => {
                warn!(collection = self.spec.collection, %err, "fetch failed");
                if self.is_live() {
                    let mut state = self.state.lock().unwrap();
                    state.phase = Phase::Error;
                    state.error = Some(ErrorInfo::new("fetch", &err));
                    drop(state);
                    self.publish();
                }
                Err(err)
            }
        }
    }

    /// Post-mutation bookkeeping: a successful write refreshes the shared
    /// cache and drops the coordinator's cooldown entry (the next fetch must
    /// not serve the pre-mutation list); a failure surfaces a reduced error
    /// while items keep their rolled-back value.
    fn after_mutation<T>(&self, operation: &str, result: &SyncResult<T>) {
        let key = self.list_key();
        match result {
            Ok(_) => {
                if self.is_live() {
                    self.refresh_cache_from_state();
                } else {
                    self.runtime.cache().invalidate(&key);
                }
                self.runtime.coordinator().forget(&key);
                let mut state = self.state.lock().unwrap();
                state.error = None;
                drop(state);
                self.publish();
            }
            Err(err) => {
                warn!(
                    collection = self.spec.collection,
                    operation, %err, "mutation failed, state rolled back"
                );
                let mut state = self.state.lock().unwrap();
                state.error = Some(ErrorInfo::new(operation, err));
                drop(state);
                self.publish();
            }
        }
    }

    fn natural_key_matches(record: &Record, pointers: &[&str], payload: &serde_json::Value) -> bool {
        !pointers.is_empty()
            && pointers.iter().all(|p| {
                match (record.payload.pointer(p), payload.pointer(p)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            })
    }
}

struct PushMerge {
    core: Arc<Core>,
}

impl ChangeHandler for PushMerge {
    fn on_insert(&self, record: Record) {
        self.core.apply_push(record);
    }

    fn on_update(&self, record: Record) {
        self.core.apply_push(record);
    }

    fn on_delete(&self, id: RecordId) {
        self.core.apply_push_delete(id);
    }
}

/// A live, owner-scoped view of one remote collection.
pub struct SyncedCollection {
    core: Arc<Core>,
    subscription: ChangeSubscription,
}

impl SyncedCollection {
    /// Opens a collection scoped to the signed-in user and starts the first
    /// fetch in the background.
    pub fn open(runtime: Arc<SyncRuntime>, spec: DomainSpec) -> SyncResult<Self> {
        let user = runtime.session().current_user().ok_or(SyncError::SignedOut)?;
        Self::open_scoped(runtime, spec, OwnerKey::user(user))
    }

    /// Opens the message collection for a conversation with `counterpart`.
    pub fn open_conversation(runtime: Arc<SyncRuntime>, counterpart: UserId) -> SyncResult<Self> {
        let user = runtime.session().current_user().ok_or(SyncError::SignedOut)?;
        Self::open_scoped(
            runtime,
            DomainSpec::messages(),
            OwnerKey::pair(user, counterpart),
        )
    }

    /// Opens a collection under an explicit owner scope.
    pub fn open_scoped(
        runtime: Arc<SyncRuntime>,
        spec: DomainSpec,
        owner: OwnerKey,
    ) -> SyncResult<Self> {
        let client = CollectionClient::new(runtime.backend(), spec.collection, owner);
        let (watch_tx, _) = watch::channel(Snapshot {
            phase: Phase::Idle,
            items: Vec::new(),
            error: None,
        });
        let core = Arc::new(Core {
            epoch: runtime.session().epoch(),
            client,
            retry: RetryPolicy::default(),
            state: Mutex::new(HookState {
                items: Vec::new(),
                phase: Phase::Idle,
                error: None,
            }),
            watch: watch_tx,
            alive: AtomicBool::new(true),
            runtime: runtime.clone(),
            spec,
        });

        let subscription = ChangeSubscription::open(
            runtime.backend(),
            core.spec.collection,
            Filter::owner(owner),
            Arc::new(PushMerge { core: core.clone() }),
        );

        let fetch_core = core.clone();
        tokio::spawn(async move {
            let _ = fetch_core.fetch(false).await;
        });

        Ok(Self { core, subscription })
    }

    /// Current items, in the domain's natural order.
    #[must_use]
    pub fn items(&self) -> Vec<Record> {
        self.core.state.lock().unwrap().items.clone()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.core.state.lock().unwrap().phase
    }

    /// The last surfaced error, if any.
    #[must_use]
    pub fn error(&self) -> Option<ErrorInfo> {
        self.core.state.lock().unwrap().error.clone()
    }

    /// True while items are loading (first fetch or refetch in flight).
    #[must_use]
    pub fn loading(&self) -> bool {
        self.phase() == Phase::Loading
    }

    /// Subscribes to state snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.core.watch.subscribe()
    }

    /// Fetches fresh data, bypassing the cooldown cache (but still joining
    /// an equivalent in-flight call).
    pub async fn refetch(&self) -> SyncResult<()> {
        self.core.clone().fetch(true).await
    }

    /// Adds an item optimistically.
    ///
    /// Domains with a natural key write through upsert (safe to retry, and a
    /// re-submit replaces the keyed row instead of duplicating it); other
    /// domains issue a single non-retried insert.
    pub async fn add_item(&self, payload: serde_json::Value) -> SyncResult<Record> {
        let core = &self.core;
        core.ensure_live()?;

        let now = now_millis();
        let provisional = Record {
            id: RecordId::new(),
            owner: core.client.owner(),
            payload: payload.clone(),
            created_at: now,
            updated_at: now,
        };
        let provisional_id = provisional.id;
        let order = core.spec.order.clone();
        let natural_key = core.spec.natural_key.clone();

        let client = core.client.clone();
        let retry = core.retry;
        let remote_payload = payload.clone();
        let remote_key = natural_key.clone();
        let remote = async move {
            match remote_key {
                Some(pointers) => {
                    retry
                        .run(|| client.upsert(&pointers, remote_payload.clone()))
                        .await
                }
                None => {
                    RetryPolicy::none()
                        .run(|| client.insert(remote_payload.clone()))
                        .await
                }
            }
        };

        let result = optimistic::mutate(
            &core.state,
            |state| {
                if let Some(pointers) = &natural_key {
                    // A keyed add replaces the existing keyed row locally too.
                    state
                        .items
                        .retain(|r| !Core::natural_key_matches(r, pointers, &payload));
                }
                state.items.push(provisional);
                order.sort(&mut state.items);
            },
            remote,
            |state, record: &Record| {
                state.items.retain(|r| r.id != provisional_id);
                Core::replace_into(&mut state.items, record.clone(), &order);
            },
        )
        .await;

        core.after_mutation("add", &result);
        result
    }

    /// Adds an item and then runs a best-effort secondary effect (e.g.
    /// creating a notification row for the recipient). The secondary effect
    /// never fails the primary operation; its errors are logged and dropped.
    pub async fn add_item_with_side_effect<Fut>(
        &self,
        payload: serde_json::Value,
        side_effect: Fut,
    ) -> SyncResult<Record>
    where
        Fut: Future<Output = SyncResult<()>>,
    {
        let record = self.add_item(payload).await?;
        if let Err(err) = side_effect.await {
            warn!(
                collection = self.core.spec.collection,
                %err, "best-effort side effect failed"
            );
        }
        Ok(record)
    }

    /// Patches an item optimistically. Updates are idempotent and retried on
    /// transient failures.
    pub async fn update_item(
        &self,
        id: RecordId,
        patch: serde_json::Value,
    ) -> SyncResult<Record> {
        let core = &self.core;
        core.ensure_live()?;

        let order = core.spec.order.clone();
        let client = core.client.clone();
        let retry = core.retry;
        let remote_patch = patch.clone();
        let remote = async move { retry.run(|| client.update(id, remote_patch.clone())).await };

        let result = optimistic::mutate(
            &core.state,
            |state| {
                if let Some(row) = state.items.iter_mut().find(|r| r.id == id) {
                    if let (Some(obj), Some(fields)) =
                        (row.payload.as_object_mut(), patch.as_object())
                    {
                        for (k, v) in fields {
                            obj.insert(k.clone(), v.clone());
                        }
                    }
                    // Minimal bump; the authoritative timestamp arrives with
                    // the server response.
                    row.updated_at += 1;
                }
                order.sort(&mut state.items);
            },
            remote,
            |state, record: &Record| {
                Core::replace_into(&mut state.items, record.clone(), &order);
            },
        )
        .await;

        core.after_mutation("update", &result);
        result
    }

    /// Deletes an item optimistically. A `not_found` from the backend means
    /// the row was already gone (read-after-delete race) and counts as
    /// success.
    pub async fn delete_item(&self, id: RecordId) -> SyncResult<()> {
        let core = &self.core;
        core.ensure_live()?;

        let client = core.client.clone();
        let retry = core.retry;
        let remote = async move {
            match retry.run(|| client.delete(id)).await {
                Err(SyncError::Remote(err)) if err.code == ErrorCode::NotFound => {
                    debug!(%id, "row already deleted");
                    Ok(())
                }
                other => other,
            }
        };

        let result = optimistic::mutate(
            &core.state,
            |state| {
                state.items.retain(|r| r.id != id);
            },
            remote,
            |_, _| {},
        )
        .await;

        core.after_mutation("delete", &result);
        result
    }

    /// Advances a status field through a fixed cycle (e.g. `incomplete ->
    /// completed -> failed -> incomplete`). A current value outside the
    /// cycle restarts it at the first state.
    ///
    /// `pointer` must address a top-level payload field (`"/status"`);
    /// shallow patches cannot target nested objects.
    pub async fn toggle_status(
        &self,
        id: RecordId,
        pointer: &str,
        cycle: &[&str],
    ) -> SyncResult<Record> {
        let field = pointer.strip_prefix('/').unwrap_or(pointer);
        if field.is_empty() || field.contains('/') {
            return Err(SyncError::Remote(
                RemoteError::new(
                    ErrorCode::ValidationError,
                    self.core.spec.collection,
                    "toggle",
                )
                .with_detail("status pointer must address a top-level field"),
            ));
        }

        let current = self
            .core
            .state
            .lock()
            .unwrap()
            .items
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.get_str(pointer).unwrap_or_default().to_string());
        let Some(current) = current else {
            return Err(SyncError::Remote(RemoteError::new(
                ErrorCode::NotFound,
                self.core.spec.collection,
                "toggle",
            )));
        };

        let next = cycle
            .iter()
            .position(|s| *s == current)
            .map_or(cycle.first().copied().unwrap_or_default(), |i| {
                cycle[(i + 1) % cycle.len()]
            });

        let patch = serde_json::json!({ field: next });
        self.update_item(id, patch).await
    }

    /// Tears the collection down: no further merges, no cache writes, the
    /// subscription closes synchronously. Expired cache entries are swept
    /// opportunistically on the way out.
    pub fn close(&self) {
        if self.core.alive.swap(false, Ordering::SeqCst) {
            self.subscription.close();
            {
                let mut state = self.core.state.lock().unwrap();
                state.phase = Phase::Closed;
            }
            self.core.publish();
            self.core.runtime.cache().sweep_expired();
        }
    }

    /// Whether the collection is still live.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.core.alive.load(Ordering::SeqCst)
    }
}

impl Drop for SyncedCollection {
    fn drop(&mut self) {
        self.close();
    }
}
