//! Type-safe identifiers for rooms, users, shops, orders, and messages.
//!
//! The messaging backend keys everything by database sequence values, so
//! each identifier is a newtype over `i64` providing type safety: a room
//! id cannot be confused with a user id at a call site.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw backend identifier.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw backend identifier.
            #[must_use]
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

numeric_id!(
    /// Unique identifier for a conversation room.
    ///
    /// Assigned server-side when two parties first make contact. Used as
    /// the dictionary key in the store, subscription target, and event
    /// discriminator.
    RoomId
);

numeric_id!(
    /// Unique identifier for a user account (buyer or seller).
    UserId
);

numeric_id!(
    /// Unique identifier for a shop.
    ShopId
);

numeric_id!(
    /// Unique identifier for an order a room may be tied to.
    OrderId
);

numeric_id!(
    /// Server-assigned identifier for a confirmed message.
    ///
    /// Absent on optimistic local messages until the server echoes the
    /// confirmation back.
    MessageId
);
