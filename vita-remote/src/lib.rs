//! Remote collection access for the Vita sync core.
//!
//! This crate is the boundary to the backend-as-a-service holding all
//! business data. It provides:
//!
//! - **Backend**: the `RemoteBackend` trait abstracting query/insert/update/
//!   delete plus the row-level push channel, so the sync layer works against
//!   any backend (and against the in-memory mock in tests)
//! - **Client**: `CollectionClient`, a thin typed wrapper over one named
//!   collection, defensively scoped to a single owner key
//! - **Subscription**: `ChangeSubscription`, a handler-driven push channel
//!   consumer with deterministic teardown and silent reconnect
//! - **Session**: the identity provider surface (current user, sign-in/out
//!   events, session epochs)
//!
//! The push channel is a freshness optimization, not a correctness
//! guarantee: cache TTLs and explicit refetches remain the source of truth.

mod backend;
mod client;
mod filter;
pub mod mock;
mod session;
mod subscription;

pub use backend::{ChangeStream, RemoteBackend, SubscriptionToken};
pub use client::CollectionClient;
pub use filter::{Condition, Direction, Filter, Op, OrderBy, SortKey};
pub use session::{Session, SessionState};
pub use subscription::{ChangeHandler, ChangeSubscription};
