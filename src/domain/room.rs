//! Conversation rooms and the local identity of the current user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{OrderId, RoomId, ShopId, UserId};
use super::message::SenderRole;

/// A persistent conversation context between a buyer and a shop.
///
/// Rooms are created server-side on first contact; the client only
/// materializes a read-through cache of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Server-assigned room identifier.
    pub id: RoomId,
    /// The buyer participant.
    pub buyer_user_id: UserId,
    /// The shop participant.
    pub shop_id: ShopId,
    /// Order this conversation is tied to, if any.
    #[serde(default)]
    pub order_id: Option<OrderId>,
    /// Server creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Returns `true` if `user_id` acting as `role` is a participant.
    #[must_use]
    pub fn involves(&self, user_id: UserId, role: SenderRole, shop_id: Option<ShopId>) -> bool {
        match role {
            SenderRole::Buyer => self.buyer_user_id == user_id,
            SenderRole::Seller => shop_id.is_some_and(|shop| self.shop_id == shop),
        }
    }
}

/// Who this client instance is acting as.
///
/// Drives room-list fetches (buyers list by user id, sellers by shop id),
/// outbound frame attribution, and read tracking.
#[derive(Debug, Clone, Copy)]
pub struct ChatIdentity {
    /// The authenticated user.
    pub user_id: UserId,
    /// Which side of conversations this user is on.
    pub role: SenderRole,
    /// The shop the user operates, required for the seller role.
    pub shop_id: Option<ShopId>,
}

impl ChatIdentity {
    /// Identity for a buyer account.
    #[must_use]
    pub const fn buyer(user_id: UserId) -> Self {
        Self {
            user_id,
            role: SenderRole::Buyer,
            shop_id: None,
        }
    }

    /// Identity for a seller operating `shop_id`.
    #[must_use]
    pub const fn seller(user_id: UserId, shop_id: ShopId) -> Self {
        Self {
            user_id,
            role: SenderRole::Seller,
            shop_id: Some(shop_id),
        }
    }
}
