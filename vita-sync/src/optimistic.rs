//! Optimistic local mutation with exact rollback.
//!
//! The local state is patched synchronously so the UI reflects the change
//! immediately; the remote call then either confirms it (with authoritative
//! server-assigned fields replacing the local guess) or fails, in which case
//! the pre-mutation snapshot is restored exactly.
//!
//! Concurrent mutations on one row are not serialized here; overlapping
//! calls on the same id are the caller's bug to avoid.

use crate::error::SyncResult;
use std::future::Future;
use std::sync::Mutex;

/// Applies `local_patch` to `state`, runs `remote_call`, and on success
/// reconciles the state with the authoritative result. On failure the state
/// is restored to the snapshot taken before the patch and the error
/// propagates.
pub async fn mutate<S, T, Fut>(
    state: &Mutex<S>,
    local_patch: impl FnOnce(&mut S),
    remote_call: Fut,
    reconcile: impl FnOnce(&mut S, &T),
) -> SyncResult<T>
where
    S: Clone,
    Fut: Future<Output = SyncResult<T>>,
{
    let snapshot = {
        let mut guard = state.lock().unwrap();
        let snapshot = guard.clone();
        local_patch(&mut guard);
        snapshot
    };

    match remote_call.await {
        Ok(value) => {
            let mut guard = state.lock().unwrap();
            reconcile(&mut guard, &value);
            Ok(value)
        }
        Err(err) => {
            *state.lock().unwrap() = snapshot;
            Err(err)
        }
    }
}
