//! Request de-duplication and cooldown.

use crate::cache::CacheKey;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use vita_types::{RemoteError, RemoteResult};

type SharedCall<T> = Shared<BoxFuture<'static, Result<T, RemoteError>>>;

struct Completion<T> {
    at: Instant,
    value: T,
}

struct Inner<T> {
    /// In-flight calls by key. The generation distinguishes a live entry
    /// from a stale one that was replaced.
    pending: HashMap<CacheKey, (u64, SharedCall<T>)>,
    /// Last successful result per key, for the cooldown window.
    completed: HashMap<CacheKey, Completion<T>>,
    next_generation: u64,
}

/// Serializes logically identical requests.
///
/// For one key at most one underlying call is in flight; concurrent callers
/// await the same shared future and settle together. A successful result is
/// remembered, and a repeat request within the caller's cooldown window is
/// answered from it without a new call. `force_refresh` bypasses the cooldown
/// but still joins an in-flight call rather than duplicating it.
pub struct RequestCoordinator<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
                completed: HashMap::new(),
                next_generation: 0,
            }),
        }
    }

    /// Runs `operation` under the coordination policy for `key`.
    ///
    /// The operation future only executes if no equivalent call is in flight
    /// and the cooldown window has passed (or `force_refresh` is set).
    /// Abandoned in-flight entries (whose awaiters all dropped before the
    /// call settled) are resumed by the next caller; entries left behind
    /// settled are simply replaced.
    pub async fn coordinate<F>(
        &self,
        key: CacheKey,
        cooldown: Duration,
        force_refresh: bool,
        operation: F,
    ) -> RemoteResult<T>
    where
        F: Future<Output = RemoteResult<T>> + Send + 'static,
    {
        let (generation, call) = {
            let mut inner = self.inner.lock().unwrap();

            // Join the in-flight call; all callers settle together.
            let joined = if let Some((generation, existing)) = inner.pending.get(&key) {
                if existing.peek().is_none() {
                    Some((*generation, existing.clone()))
                } else {
                    // Settled leftover from an abandoned caller.
                    inner.pending.remove(&key);
                    None
                }
            } else {
                None
            };

            match joined {
                Some(pair) => pair,
                None => {
                    if !force_refresh {
                        if let Some(done) = inner.completed.get(&key) {
                            if done.at.elapsed() < cooldown {
                                debug!(?key, "served from cooldown cache");
                                return Ok(done.value.clone());
                            }
                        }
                    }

                    inner.next_generation += 1;
                    let generation = inner.next_generation;
                    let call: SharedCall<T> = operation.boxed().shared();
                    inner.pending.insert(key.clone(), (generation, call.clone()));
                    (generation, call)
                }
            }
        };

        let result = call.await;
        self.settle(&key, generation, &result);
        result
    }

    /// Removes the pending entry (if still ours) and records a success for
    /// the cooldown window. Every awaiter runs this; the first one wins and
    /// repeats are no-ops. A call whose pending entry is gone was abandoned
    /// by `clear` (sign-out) and must not repopulate the completed map.
    fn settle(&self, key: &CacheKey, generation: u64, result: &RemoteResult<T>) {
        let mut inner = self.inner.lock().unwrap();
        let still_ours = inner
            .pending
            .get(key)
            .is_some_and(|(current, _)| *current == generation);
        if !still_ours {
            return;
        }
        inner.pending.remove(key);
        if let Ok(value) = result {
            inner.completed.insert(
                key.clone(),
                Completion {
                    at: Instant::now(),
                    value: value.clone(),
                },
            );
        }
    }

    /// Forgets the completed result for a key, so the next request issues a
    /// fresh call regardless of cooldown.
    pub fn forget(&self, key: &CacheKey) {
        self.inner.lock().unwrap().completed.remove(key);
    }

    /// Abandons all pending entries and completed results. Called on
    /// sign-out; in-flight futures may still settle, but nothing will be
    /// served from them.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.pending.is_empty() || !inner.completed.is_empty() {
            debug!(
                pending = inner.pending.len(),
                completed = inner.completed.len(),
                "clearing request coordinator"
            );
        }
        inner.pending.clear();
        inner.completed.clear();
    }

    /// Number of in-flight entries (for tests and diagnostics).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }
}
