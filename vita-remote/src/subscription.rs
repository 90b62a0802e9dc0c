//! Push-channel subscription lifecycle.
//!
//! A `ChangeSubscription` owns a background task that consumes one backend
//! push channel and dispatches typed events to a handler. Teardown is
//! deterministic: `close()` (or drop) stops dispatch immediately and the task
//! releases its backend channel on the way out, so neither an event reaching
//! a torn-down handler nor a leaked channel entry can outlive the owner.

use crate::backend::RemoteBackend;
use crate::filter::Filter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use vita_types::{ChangeEvent, Record, RecordId};

/// Delay before re-opening a dropped push channel.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Receives typed push events for one subscribed collection.
///
/// Handlers run on the subscription task between suspension points; they must
/// be synchronous and idempotent (the channel is at-least-once).
pub trait ChangeHandler: Send + Sync {
    /// A row matching the filter was inserted.
    fn on_insert(&self, record: Record);
    /// A row matching the filter was updated.
    fn on_update(&self, record: Record);
    /// A row was deleted.
    fn on_delete(&self, id: RecordId);
}

/// An open subscription. Closes on drop.
pub struct ChangeSubscription {
    closed: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl ChangeSubscription {
    /// Opens a subscription and starts dispatching events to `handler`.
    ///
    /// The push channel is best-effort: if the transport drops, the task
    /// silently re-subscribes after a short delay. Missed events are covered
    /// by cache TTLs and explicit refetches.
    #[must_use]
    pub fn open(
        backend: Arc<dyn RemoteBackend>,
        collection: impl Into<String>,
        filter: Filter,
        handler: Arc<dyn ChangeHandler>,
    ) -> Self {
        let collection = collection.into();
        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = closed.clone();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            loop {
                if closed_flag.load(Ordering::SeqCst) {
                    return;
                }

                match backend.subscribe(&collection, filter.clone()).await {
                    Ok(mut stream) => {
                        debug!(collection = %collection, "push channel open");
                        loop {
                            tokio::select! {
                                // Shutdown signal, or the owner dropped.
                                _ = shutdown_rx.changed() => {
                                    backend.unsubscribe(stream.token).await;
                                    return;
                                }
                                event = stream.events.recv() => match event {
                                    Some(event) => {
                                        if closed_flag.load(Ordering::SeqCst) {
                                            backend.unsubscribe(stream.token).await;
                                            return;
                                        }
                                        dispatch(handler.as_ref(), event);
                                    }
                                    // Sender side gone: transport drop.
                                    None => break,
                                },
                            }
                        }
                        backend.unsubscribe(stream.token).await;
                        debug!(collection = %collection, "push channel dropped");
                    }
                    Err(err) => {
                        debug!(collection = %collection, %err, "subscribe failed");
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    () = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        });

        Self { closed, shutdown }
    }

    /// Stops event dispatch immediately. The task wakes, releases its backend
    /// channel, and exits; no handler runs after this returns.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown.send(true);
        }
    }

    /// Whether the subscription has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

fn dispatch(handler: &dyn ChangeHandler, event: ChangeEvent) {
    match event {
        ChangeEvent::Insert(record) => handler.on_insert(record),
        ChangeEvent::Update(record) => handler.on_update(record),
        ChangeEvent::Delete(id) => handler.on_delete(id),
    }
}
