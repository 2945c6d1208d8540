//! Messages and their delivery lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dedup::DedupKey;
use super::ids::{MessageId, RoomId, UserId};

/// Which side of the conversation a sender is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderRole {
    /// The customer side of the room.
    Buyer,
    /// The shop side of the room.
    Seller,
}

impl SenderRole {
    /// Returns the wire representation (`"BUYER"` / `"SELLER"`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "BUYER",
            Self::Seller => "SELLER",
        }
    }
}

/// Lifecycle tag tracked per outbound message until resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Created locally, not yet confirmed by the server.
    Pending,
    /// Confirmed by the server echo.
    Sent,
    /// Transmission attempts exhausted; kept in place for an explicit
    /// user retry or discard.
    Failed,
}

/// A single message in a room's ordered list.
///
/// Locally originated messages start without a server id and carry their
/// [`DedupKey`] from creation; messages from the other party or from
/// history fetches arrive confirmed and keyless.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// Server-assigned id, absent until confirmed.
    pub id: Option<MessageId>,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Sending user.
    pub sender_id: UserId,
    /// Sender's side of the conversation.
    pub sender_role: SenderRole,
    /// Body text.
    pub content: String,
    /// Attachment references (upload URLs).
    pub attachments: Vec<String>,
    /// Per-room local sequence number assigned at creation time,
    /// independent of the server id.
    pub local_seq: u64,
    /// Delivery lifecycle tag.
    pub delivery: DeliveryState,
    /// Whether the counterpart has read the message.
    pub is_read: bool,
    /// Server timestamp once confirmed, client clock estimate before.
    pub created_at: DateTime<Utc>,
    /// Deduplication identity, present on locally originated messages.
    #[serde(skip)]
    pub dedup_key: Option<DedupKey>,
}

impl Message {
    /// Creates an optimistic local message awaiting confirmation.
    #[must_use]
    pub fn pending(
        room_id: RoomId,
        sender_id: UserId,
        sender_role: SenderRole,
        content: String,
        attachments: Vec<String>,
        local_seq: u64,
        dedup_key: DedupKey,
    ) -> Self {
        Self {
            id: None,
            room_id,
            sender_id,
            sender_role,
            content,
            attachments,
            local_seq,
            delivery: DeliveryState::Pending,
            is_read: false,
            created_at: Utc::now(),
            dedup_key: Some(dedup_key),
        }
    }

    /// Returns `true` while the message awaits server confirmation.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.delivery, DeliveryState::Pending)
    }

    /// Returns `true` once the server has confirmed the message.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.id.is_some()
    }
}
