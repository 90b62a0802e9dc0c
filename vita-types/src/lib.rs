//! Core type definitions for the Vita sync layer.
//!
//! This crate defines the fundamental, domain-agnostic types shared by the
//! synchronization components:
//! - Record and user identifiers (UUID v7)
//! - Owner scoping keys
//! - The generic `Record` shape every collection instantiates
//! - Push-channel change events
//! - The backend error taxonomy
//!
//! Domain-specific payload shapes (activities, meals, mood logs, messages,
//! workout plans, ...) are plain JSON payloads inside a `Record`; nothing in
//! the sync core depends on their structure.

mod change;
mod error;
mod ids;
mod owner;
mod record;

pub use change::ChangeEvent;
pub use error::{ErrorCode, RemoteError, RemoteResult};
pub use ids::{RecordId, UserId};
pub use owner::OwnerKey;
pub use record::{now_millis, Record};
