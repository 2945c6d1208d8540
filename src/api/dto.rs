//! Data Transfer Objects for the collaborator REST interface.
//!
//! List endpoints return the backend's standard page envelope
//! (`content`, `totalPages`, `totalElements`, `size`, `number`).
//! History pages reuse the push-path message shape from
//! [`crate::transport::frame::MessageFrame`].

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::{OrderId, Room, RoomId, ShopId, UserId};
use crate::transport::frame::MessageFrame;

/// One page of a paged list response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    /// The items on this page.
    pub content: Vec<T>,
    /// Total number of pages.
    pub total_pages: u32,
    /// Total number of items across all pages.
    pub total_elements: u64,
    /// Requested page size.
    pub size: u32,
    /// Zero-based page number.
    pub number: u32,
}

impl<T> PageResponse<T> {
    /// Returns `true` when later pages exist.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.number + 1 < self.total_pages
    }
}

/// A room as returned by the room-list and room-lookup endpoints,
/// with the denormalized listing fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    /// Room identifier.
    pub id: RoomId,
    /// The buyer participant.
    pub buyer_user_id: UserId,
    /// The shop participant.
    pub shop_id: ShopId,
    /// Order the room is tied to, if any.
    #[serde(default)]
    pub order_id: Option<OrderId>,
    /// Server creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Newest message, when the listing includes it.
    #[serde(default)]
    pub last_message: Option<MessageFrame>,
    /// Unread count, when the listing includes it.
    #[serde(default)]
    pub unread_count: Option<u32>,
}

impl RoomDto {
    /// Extracts the room metadata.
    #[must_use]
    pub fn room(&self) -> Room {
        Room {
            id: self.id,
            buyer_user_id: self.buyer_user_id,
            shop_id: self.shop_id,
            order_id: self.order_id,
            created_at: self.created_at,
        }
    }
}
