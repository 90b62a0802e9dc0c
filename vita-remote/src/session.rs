//! Session/identity provider surface.
//!
//! The sync layer observes the session to scope queries and to tear down all
//! process-wide state on sign-out. Each sign-in or sign-out bumps a session
//! epoch; results of requests started under an older epoch are discarded when
//! they arrive, so a slow in-flight request for user A can never populate
//! state after a fast switch to user B.

use tokio::sync::watch;
use vita_types::UserId;

/// A snapshot of the session at one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// The signed-in user, if any.
    pub user: Option<UserId>,
    /// Monotonically increasing; bumped on every sign-in and sign-out.
    pub epoch: u64,
}

/// The session provider. Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct Session {
    tx: watch::Sender<SessionState>,
}

impl Session {
    /// Creates a signed-out session at epoch 0.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState {
            user: None,
            epoch: 0,
        });
        Self { tx }
    }

    /// Creates a session already signed in as `user` (epoch 1).
    #[must_use]
    pub fn signed_in(user: UserId) -> Self {
        let session = Self::new();
        session.sign_in(user);
        session
    }

    /// Signs a user in, bumping the epoch.
    pub fn sign_in(&self, user: UserId) {
        self.tx.send_modify(|state| {
            state.user = Some(user);
            state.epoch += 1;
        });
    }

    /// Signs out, bumping the epoch. Observers (the sync runtime) clear all
    /// caches before the session is considered terminated.
    pub fn sign_out(&self) {
        self.tx.send_modify(|state| {
            state.user = None;
            state.epoch += 1;
        });
    }

    /// The currently signed-in user.
    #[must_use]
    pub fn current_user(&self) -> Option<UserId> {
        self.tx.borrow().user
    }

    /// The current session epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.tx.borrow().epoch
    }

    /// The current state snapshot.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Subscribes to session changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
