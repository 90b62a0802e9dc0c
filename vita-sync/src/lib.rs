//! Synced collections over a remote backend.
//!
//! This crate ties the lower layers together into the surface the app
//! consumes: a [`SyncRuntime`] holding the process-wide registries, a
//! [`DomainSpec`] catalog describing each collection, and
//! [`SyncedCollection`] instances that keep an owner-scoped item list
//! optimistic, push-merged, cached, and retried.

pub mod collection;
pub mod domain;
pub mod error;
pub mod optimistic;
pub mod retry;
pub mod runtime;

pub use collection::{Phase, Snapshot, SyncedCollection};
pub use domain::DomainSpec;
pub use error::{ErrorInfo, SyncError, SyncResult};
pub use retry::RetryPolicy;
pub use runtime::SyncRuntime;
