//! Process-wide caching and request coordination.
//!
//! Two registries shared by every hook instance in the process:
//!
//! - **EntityCache**: a TTL-keyed store of fetched values. Expired entries
//!   are never served, regardless of when the sweep last ran.
//! - **RequestCoordinator**: collapses the "debounce + in-flight de-dup +
//!   short-TTL cache" pattern into one policy: concurrent callers of one key
//!   share a single underlying call, and repeat fetches within a cooldown
//!   window are answered from the last completed result.
//!
//! Both are scoped to the running session and must be cleared on sign-out
//! so no cached value of one user survives into another's session.

mod cache;
mod coordinator;

pub use cache::{CacheKey, EntityCache};
pub use coordinator::RequestCoordinator;
