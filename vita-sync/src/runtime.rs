//! Process-wide sync runtime.
//!
//! Owns the registries every collection shares: the entity cache, the
//! request coordinator, and the session. Lifecycle: created once at app
//! start, lazily populated by collection fetches, fully cleared on sign-out.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use vita_cache::{EntityCache, RequestCoordinator};
use vita_remote::{RemoteBackend, Session};
use vita_types::{Record, UserId};

/// Default TTL for cache entries whose domain does not set one.
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);

/// Shared state for all synced collections in the process.
pub struct SyncRuntime {
    backend: Arc<dyn RemoteBackend>,
    session: Session,
    cache: EntityCache<Vec<Record>>,
    coordinator: RequestCoordinator<Vec<Record>>,
    watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SyncRuntime {
    /// Creates a runtime over a backend and session. A background task
    /// watches the session and clears the registries on every epoch change,
    /// covering sign-outs triggered outside [`SyncRuntime::sign_out`].
    #[must_use]
    pub fn new(backend: Arc<dyn RemoteBackend>, session: Session) -> Arc<Self> {
        let runtime = Arc::new(Self {
            backend,
            session,
            cache: EntityCache::new(DEFAULT_CACHE_TTL),
            coordinator: RequestCoordinator::new(),
            watcher: std::sync::Mutex::new(None),
        });

        let weak = Arc::downgrade(&runtime);
        let mut rx = runtime.session.watch();
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(runtime) = Weak::upgrade(&weak) else {
                    return;
                };
                runtime.clear_registries();
            }
        });
        *runtime.watcher.lock().unwrap() = Some(handle);
        runtime
    }

    /// The backend collections are accessed through.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn RemoteBackend> {
        self.backend.clone()
    }

    /// The session provider.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The process-wide list cache.
    #[must_use]
    pub fn cache(&self) -> &EntityCache<Vec<Record>> {
        &self.cache
    }

    /// The process-wide request coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &RequestCoordinator<Vec<Record>> {
        &self.coordinator
    }

    /// Signs a user in.
    pub fn sign_in(&self, user: UserId) {
        self.session.sign_in(user);
    }

    /// Signs out. The registries are cleared synchronously before this
    /// returns; no cached row of the previous user survives into the next
    /// session, and results of still-in-flight requests are discarded on
    /// arrival (their session epoch no longer matches).
    pub fn sign_out(&self) {
        self.session.sign_out();
        self.clear_registries();
        info!("session terminated, registries cleared");
    }

    fn clear_registries(&self) {
        self.cache.clear();
        self.coordinator.clear();
    }
}

impl Drop for SyncRuntime {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().unwrap().take() {
            handle.abort();
        }
    }
}
