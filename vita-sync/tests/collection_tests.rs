//! End-to-end behavior of synced collections over the in-memory backend:
//! fetch and cache, optimistic mutation and rollback, push merges, session
//! teardown.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use vita_cache::CacheKey;
use vita_remote::mock::InMemoryBackend;
use vita_remote::{RemoteBackend, Session};
use vita_sync::{DomainSpec, Phase, SyncError, SyncRuntime, SyncedCollection};
use vita_types::{ChangeEvent, ErrorCode, OwnerKey, Record, RecordId, UserId};

fn setup() -> (Arc<InMemoryBackend>, Arc<SyncRuntime>, UserId) {
    let backend = Arc::new(InMemoryBackend::new());
    let user = UserId::new();
    let runtime = SyncRuntime::new(backend.clone(), Session::signed_in(user));
    (backend, runtime, user)
}

async fn seed(
    backend: &InMemoryBackend,
    collection: &str,
    owner: OwnerKey,
    payload: serde_json::Value,
) -> Record {
    backend.insert(collection, owner, payload).await.unwrap()
}

/// Drives background tasks (initial fetch, push dispatch) to completion on
/// the current-thread runtime.
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn wait_ready(col: &SyncedCollection) {
    for _ in 0..200 {
        if col.phase() == Phase::Ready {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("collection never became ready, phase {:?}", col.phase());
}

fn titles(col: &SyncedCollection) -> Vec<String> {
    col.items()
        .iter()
        .map(|r| r.get_str("/title").unwrap_or("").to_string())
        .collect()
}

// ── Fetch and cache ──

#[tokio::test(start_paused = true)]
async fn initial_fetch_populates_items_in_natural_order() {
    let (backend, runtime, user) = setup();
    let owner = OwnerKey::user(user);
    seed(&backend, "activities", owner, json!({"date": "2025-03-02", "time": "09:00", "title": "Run"})).await;
    seed(&backend, "activities", owner, json!({"date": "2025-03-01", "time": "18:00", "title": "Swim"})).await;
    seed(&backend, "activities", owner, json!({"date": "2025-03-01", "time": "07:30", "title": "Yoga"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    assert_eq!(titles(&col), vec!["Yoga", "Swim", "Run"]);
    assert!(col.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn remount_within_ttl_is_served_from_cache() {
    let (backend, runtime, user) = setup();
    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;

    let col1 = SyncedCollection::open(runtime.clone(), DomainSpec::activities()).unwrap();
    wait_ready(&col1).await;
    assert_eq!(backend.call_count("activities", "query"), 1);
    drop(col1);

    let col2 = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col2).await;

    assert_eq!(backend.call_count("activities", "query"), 1);
    assert_eq!(col2.items().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn refetch_bypasses_cache_and_cooldown() {
    let (backend, runtime, user) = setup();
    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    assert_eq!(backend.call_count("activities", "query"), 1);

    col.refetch().await.unwrap();
    assert_eq!(backend.call_count("activities", "query"), 2);
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_keeps_last_items_and_surfaces_a_reduced_error() {
    let (backend, runtime, user) = setup();
    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    backend.fail_next("activities", "query", ErrorCode::ValidationError);
    let err = col.refetch().await.unwrap_err();

    assert!(matches!(err, SyncError::Remote(_)));
    assert_eq!(col.phase(), Phase::Error);
    assert_eq!(col.items().len(), 1);
    let info = col.error().unwrap();
    assert_eq!(info.operation, "fetch");
    // Reduced message only; raw backend detail never crosses the boundary.
    assert_eq!(info.message, "Please check the entered values.");
}

#[tokio::test(start_paused = true)]
async fn transient_fetch_failures_are_retried() {
    let (backend, runtime, user) = setup();
    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    backend.fail_next("activities", "query", ErrorCode::TransientUnavailable);
    col.refetch().await.unwrap();

    // Initial fetch, the failed attempt, the successful retry.
    assert_eq!(backend.call_count("activities", "query"), 3);
    assert_eq!(col.phase(), Phase::Ready);
}

#[tokio::test(start_paused = true)]
async fn exhausted_fetch_retries_surface_the_last_failure() {
    let (backend, runtime, _) = setup();
    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    for _ in 0..3 {
        backend.fail_next("activities", "query", ErrorCode::TransientUnavailable);
    }
    let err = col.refetch().await.unwrap_err();

    match err {
        SyncError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert_eq!(last.code, ErrorCode::TransientUnavailable);
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
}

// ── Optimistic mutation ──

#[tokio::test(start_paused = true)]
async fn add_item_adopts_the_server_assigned_row() {
    let (backend, runtime, _) = setup();
    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    let record = col
        .add_item(json!({"date": "2025-03-01", "time": "08:00", "title": "Row"}))
        .await
        .unwrap();

    let items = col.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, record.id);
    assert_eq!(backend.call_count("activities", "insert"), 1);
    assert_eq!(backend.rows("activities").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_add_rolls_the_items_back_exactly() {
    let (backend, runtime, user) = setup();
    let owner = OwnerKey::user(user);
    seed(&backend, "activities", owner, json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;
    seed(&backend, "activities", owner, json!({"date": "2025-03-02", "time": "09:00", "title": "Swim"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    let before = col.items();

    backend.fail_next("activities", "insert", ErrorCode::ValidationError);
    let err = col
        .add_item(json!({"date": "2025-03-03", "time": "10:00", "title": "Bad"}))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Remote(_)));
    assert_eq!(col.items(), before);
    assert_eq!(col.error().unwrap().operation, "add");
}

#[tokio::test(start_paused = true)]
async fn update_item_patches_the_payload_shallowly() {
    let (backend, runtime, user) = setup();
    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    let id = col.items()[0].id;

    let updated = col.update_item(id, json!({"title": "Long run"})).await.unwrap();
    settle().await;

    assert_eq!(updated.get_str("/title"), Some("Long run"));
    let items = col.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get_str("/title"), Some("Long run"));
    // Untouched fields survive the patch.
    assert_eq!(items[0].get_str("/date"), Some("2025-03-01"));
}

#[tokio::test(start_paused = true)]
async fn failed_update_rolls_back_and_keeps_the_original_row() {
    let (backend, runtime, user) = setup();
    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    let before = col.items();
    let id = before[0].id;

    backend.fail_next("activities", "update", ErrorCode::PermissionDenied);
    let err = col.update_item(id, json!({"title": "Nope"})).await.unwrap_err();

    assert!(matches!(err, SyncError::Remote(_)));
    assert_eq!(col.items(), before);
}

#[tokio::test(start_paused = true)]
async fn transient_update_failures_are_retried() {
    let (backend, runtime, user) = setup();
    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    let id = col.items()[0].id;

    backend.fail_next("activities", "update", ErrorCode::TransientUnavailable);
    let updated = col.update_item(id, json!({"title": "Second try"})).await.unwrap();

    assert_eq!(updated.get_str("/title"), Some("Second try"));
    assert_eq!(backend.call_count("activities", "update"), 2);
}

#[tokio::test(start_paused = true)]
async fn delete_item_removes_the_row() {
    let (backend, runtime, user) = setup();
    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    let id = col.items()[0].id;

    col.delete_item(id).await.unwrap();

    assert!(col.items().is_empty());
    assert!(backend.rows("activities").is_empty());
}

#[tokio::test(start_paused = true)]
async fn delete_of_an_unknown_id_is_a_noop() {
    let (_, runtime, _) = setup();
    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    // The backend answers not_found; the row was already gone.
    col.delete_item(RecordId::new()).await.unwrap();
    assert!(col.items().is_empty());
}

#[tokio::test(start_paused = true)]
async fn side_effect_failure_does_not_fail_the_primary_add() {
    let (_, runtime, _) = setup();
    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    let record = col
        .add_item_with_side_effect(
            json!({"date": "2025-03-01", "time": "08:00", "title": "Run"}),
            async { Err(SyncError::Closed) },
        )
        .await
        .unwrap();

    assert!(col.items().iter().any(|r| r.id == record.id));
}

// ── Keyed domains (upsert) ──

#[tokio::test(start_paused = true)]
async fn keyed_add_replaces_the_existing_entry() {
    let (backend, runtime, _) = setup();
    backend.set_unique_key("mood_logs", &["/log_date"]);

    let col = SyncedCollection::open(runtime, DomainSpec::mood_logs()).unwrap();
    wait_ready(&col).await;

    col.add_item(json!({"log_date": "2025-03-01", "mood": "tired"})).await.unwrap();
    col.add_item(json!({"log_date": "2025-03-01", "mood": "great"})).await.unwrap();
    settle().await;

    let items = col.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get_str("/mood"), Some("great"));
    assert_eq!(backend.rows("mood_logs").len(), 1);
    assert_eq!(backend.call_count("mood_logs", "insert"), 1);
    assert_eq!(backend.call_count("mood_logs", "update"), 1);
}

#[tokio::test(start_paused = true)]
async fn keyed_add_is_safe_to_retry() {
    let (backend, runtime, _) = setup();
    backend.set_unique_key("mood_logs", &["/log_date"]);

    let col = SyncedCollection::open(runtime, DomainSpec::mood_logs()).unwrap();
    wait_ready(&col).await;

    backend.fail_next("mood_logs", "insert", ErrorCode::TransientUnavailable);
    col.add_item(json!({"log_date": "2025-03-02", "mood": "ok"})).await.unwrap();

    assert_eq!(backend.call_count("mood_logs", "insert"), 2);
    assert_eq!(backend.rows("mood_logs").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn toggling_status_three_times_issues_exactly_three_updates() {
    let (backend, runtime, user) = setup();
    seed(
        &backend,
        "activities",
        OwnerKey::user(user),
        json!({"date": "2025-03-01", "time": "08:00", "title": "Run", "status": "incomplete"}),
    )
    .await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    let id = col.items()[0].id;

    let cycle = ["incomplete", "completed", "failed"];
    for _ in 0..3 {
        col.toggle_status(id, "/status", &cycle).await.unwrap();
    }

    assert_eq!(backend.call_count("activities", "update"), 3);
    // A full cycle lands back where it started.
    assert_eq!(col.items()[0].get_str("/status"), Some("incomplete"));
}

#[tokio::test(start_paused = true)]
async fn toggle_rejects_non_top_level_pointers() {
    let (backend, runtime, user) = setup();
    seed(
        &backend,
        "activities",
        OwnerKey::user(user),
        json!({"date": "2025-03-01", "time": "08:00", "title": "Run", "status": "incomplete"}),
    )
    .await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    let id = col.items()[0].id;

    let err = col
        .toggle_status(id, "/details/status", &["incomplete", "completed"])
        .await
        .unwrap_err();

    match err {
        SyncError::Remote(err) => assert_eq!(err.code, ErrorCode::ValidationError),
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert_eq!(backend.call_count("activities", "update"), 0);
}

// ── Push merges ──

#[tokio::test(start_paused = true)]
async fn push_insert_from_another_writer_merges_in() {
    let (backend, runtime, user) = setup();
    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Pushed"})).await;
    settle().await;

    assert_eq!(titles(&col), vec!["Pushed"]);
}

#[tokio::test(start_paused = true)]
async fn duplicate_push_delivery_is_idempotent() {
    let (backend, runtime, user) = setup();
    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    let record = seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Once"})).await;
    settle().await;
    backend.replay_event("activities", ChangeEvent::Insert(record.clone()));
    backend.replay_event("activities", ChangeEvent::Insert(record));
    settle().await;

    assert_eq!(col.items().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_push_never_clobbers_a_newer_row() {
    let (backend, runtime, user) = setup();
    let original = seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Old"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    col.update_item(original.id, json!({"title": "New"})).await.unwrap();

    // Re-deliver the pre-update row, as an out-of-order channel would.
    backend.replay_event("activities", ChangeEvent::Update(original));
    settle().await;

    assert_eq!(col.items()[0].get_str("/title"), Some("New"));
}

#[tokio::test(start_paused = true)]
async fn push_delete_of_an_unknown_id_is_a_noop() {
    let (backend, runtime, user) = setup();
    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    backend.replay_event("activities", ChangeEvent::Delete(RecordId::new()));
    settle().await;

    assert_eq!(col.items().len(), 1);
}

// ── Conversation scope ──

#[tokio::test(start_paused = true)]
async fn conversation_scope_matches_either_id_order() {
    let (backend, runtime, user) = setup();
    let counterpart = UserId::new();
    let stranger = UserId::new();
    // Seeded with the ids reversed; canonical ordering makes it the same scope.
    seed(&backend, "messages", OwnerKey::pair(counterpart, user), json!({"sent_at": "2025-03-01T10:00:00Z", "body": "hi"})).await;
    seed(&backend, "messages", OwnerKey::pair(user, stranger), json!({"sent_at": "2025-03-01T11:00:00Z", "body": "other thread"})).await;

    let col = SyncedCollection::open_conversation(runtime, counterpart).unwrap();
    wait_ready(&col).await;

    let items = col.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get_str("/body"), Some("hi"));
}

// ── Session lifecycle ──

#[tokio::test]
async fn open_requires_a_signed_in_session() {
    let backend = Arc::new(InMemoryBackend::new());
    let runtime = SyncRuntime::new(backend, Session::new());

    match SyncedCollection::open(runtime, DomainSpec::activities()) {
        Err(err) => assert_eq!(err, SyncError::SignedOut),
        Ok(_) => panic!("open should require a session"),
    }
}

#[tokio::test(start_paused = true)]
async fn sign_out_clears_cached_state_synchronously() {
    let (backend, runtime, user) = setup();
    let owner = OwnerKey::user(user);
    seed(&backend, "activities", owner, json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;

    let col = SyncedCollection::open(runtime.clone(), DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    let key = CacheKey::list(owner, "activities");
    assert!(runtime.cache().get(&key).is_some());

    runtime.sign_out();
    assert!(runtime.cache().get(&key).is_none());

    // A stale instance's late result must not repopulate the registries.
    let _ = col.refetch().await;
    assert!(runtime.cache().get(&key).is_none());
}

#[tokio::test(start_paused = true)]
async fn user_switch_yields_only_the_new_users_rows() {
    let (backend, runtime, first) = setup();
    let second = UserId::new();
    seed(&backend, "activities", OwnerKey::user(first), json!({"date": "2025-03-01", "time": "08:00", "title": "First's run"})).await;
    seed(&backend, "activities", OwnerKey::user(second), json!({"date": "2025-03-02", "time": "09:00", "title": "Second's swim"})).await;

    let col = SyncedCollection::open(runtime.clone(), DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    assert_eq!(titles(&col), vec!["First's run"]);
    drop(col);

    runtime.sign_out();
    runtime.sign_in(second);

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;
    assert_eq!(titles(&col), vec!["Second's swim"]);
}

// ── Teardown ──

#[tokio::test(start_paused = true)]
async fn closed_collection_rejects_operations() {
    let (_, runtime, _) = setup();
    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    col.close();
    assert_eq!(col.phase(), Phase::Closed);
    assert!(col.is_closed());

    let err = col.add_item(json!({"title": "x"})).await.unwrap_err();
    assert_eq!(err, SyncError::Closed);
    let err = col.refetch().await.unwrap_err();
    assert_eq!(err, SyncError::Closed);
}

#[tokio::test(start_paused = true)]
async fn closed_collection_ignores_push_events() {
    let (backend, runtime, user) = setup();
    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    wait_ready(&col).await;

    col.close();
    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Late"})).await;
    settle().await;

    assert!(col.items().is_empty());
}

// ── Observability ──

#[tokio::test(start_paused = true)]
async fn snapshots_are_published_to_watchers() {
    let (backend, runtime, user) = setup();
    seed(&backend, "activities", OwnerKey::user(user), json!({"date": "2025-03-01", "time": "08:00", "title": "Run"})).await;

    let col = SyncedCollection::open(runtime, DomainSpec::activities()).unwrap();
    let rx = col.subscribe();
    wait_ready(&col).await;

    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.phase, Phase::Ready);
    assert_eq!(snapshot.items.len(), 1);
    assert!(snapshot.error.is_none());
}
