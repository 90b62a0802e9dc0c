//! Owner scoping keys.
//!
//! Every query and mutation in the sync layer is constrained to an owner
//! scope. Most collections scope by a single user id; conversations scope by
//! a (user, counterpart) pair so both participants resolve the same key.

use crate::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The scoping key a query or mutation is constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "ids")]
pub enum OwnerKey {
    /// Scoped to a single user's rows.
    User(UserId),
    /// Scoped to a conversation between two users. Stored in canonical order
    /// so either participant produces the same key.
    Pair(UserId, UserId),
}

impl OwnerKey {
    /// Creates a single-user scope.
    #[must_use]
    pub const fn user(id: UserId) -> Self {
        Self::User(id)
    }

    /// Creates a conversation scope. The two ids are ordered canonically so
    /// `pair(a, b) == pair(b, a)`.
    #[must_use]
    pub fn pair(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self::Pair(a, b)
        } else {
            Self::Pair(b, a)
        }
    }

    /// Returns true if the given user participates in this scope.
    #[must_use]
    pub fn includes(&self, user: &UserId) -> bool {
        match self {
            Self::User(u) => u == user,
            Self::Pair(a, b) => a == user || b == user,
        }
    }

    /// The primary user of the scope (the single user, or the canonically
    /// first participant of a pair).
    #[must_use]
    pub fn primary(&self) -> UserId {
        match self {
            Self::User(u) => *u,
            Self::Pair(a, _) => *a,
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(u) => write!(f, "user:{u}"),
            Self::Pair(a, b) => write!(f, "pair:{a}:{b}"),
        }
    }
}
