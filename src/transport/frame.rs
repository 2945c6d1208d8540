//! Wire schema: envelope frames and chat payloads.
//!
//! The broker speaks a JSON envelope over the websocket: the client
//! issues `subscribe`/`unsubscribe`/`publish` frames, the broker pushes
//! `message` frames tagged with the subscription they belong to. Chat
//! payloads ride inside the envelope: sends go to a fixed application
//! destination, inbound delivery arrives on room-scoped topics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MessageId, RoomId, SenderRole, UserId, dedup};
use crate::error::ChatError;

/// Application destination for outbound sends.
pub const SEND_DESTINATION: &str = "/app/chat.send";

/// Application destination for outbound read receipts.
pub const READ_DESTINATION: &str = "/app/chat.read";

/// Returns the inbound topic for a room.
#[must_use]
pub fn room_topic(room_id: RoomId) -> String {
    format!("/topic/chat/{room_id}")
}

/// Client → broker envelope frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Open a subscription to a topic under a client-assigned id.
    Subscribe {
        /// Client-assigned subscription id, unique per connection.
        id: u64,
        /// Topic to subscribe to.
        topic: String,
    },
    /// Close a previously opened subscription.
    Unsubscribe {
        /// The subscription id to close.
        id: u64,
    },
    /// Deliver a payload to an application destination.
    Publish {
        /// Correlation id for logs and broker receipts.
        id: String,
        /// Application destination.
        destination: String,
        /// JSON payload.
        body: serde_json::Value,
    },
}

/// Broker → client envelope frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerFrame {
    /// A payload delivered on a subscription.
    Message {
        /// The subscription the payload belongs to.
        subscription: u64,
        /// The topic it was published on.
        topic: String,
        /// JSON payload.
        body: serde_json::Value,
    },
}

/// Outbound send payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendFrame {
    /// Target room.
    pub room_id: RoomId,
    /// Sending user.
    pub sender_user_id: UserId,
    /// Sender's side of the conversation.
    pub role: SenderRole,
    /// Body text.
    pub content: String,
    /// Attachment references.
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl ChatSendFrame {
    /// Hashes this frame's content the same way dedup keys do.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        dedup::content_hash(&self.content, &self.attachments)
    }
}

/// Outbound read-receipt payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatReadFrame {
    /// Room whose messages were read.
    pub room_id: RoomId,
    /// The user who read them.
    pub user_id: UserId,
}

/// Inbound confirmed-message payload.
///
/// The same shape the history REST endpoint returns, so one type serves
/// both the push path and the paged fetch path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageFrame {
    /// Server-assigned message id.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Sending user.
    pub sender_user_id: UserId,
    /// Sender's side of the conversation.
    pub sender_role: SenderRole,
    /// Body text.
    pub content: String,
    /// Attachment references.
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Whether the counterpart has read the message.
    #[serde(default)]
    pub is_read: bool,
    /// Server timestamp.
    pub created_at: DateTime<Utc>,
}

impl MessageFrame {
    /// Hashes this frame's content the same way dedup keys do.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        dedup::content_hash(&self.content, &self.attachments)
    }
}

impl From<MessageFrame> for crate::domain::Message {
    fn from(frame: MessageFrame) -> Self {
        Self {
            id: Some(frame.id),
            room_id: frame.room_id,
            sender_id: frame.sender_user_id,
            sender_role: frame.sender_role,
            content: frame.content,
            attachments: frame.attachments,
            local_seq: 0,
            delivery: crate::domain::DeliveryState::Sent,
            is_read: frame.is_read,
            created_at: frame.created_at,
            dedup_key: None,
        }
    }
}

/// Read notice broadcast on a room topic when a participant marks the
/// room read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadNotice {
    /// Room whose messages were read.
    pub room_id: RoomId,
    /// The user who read them.
    pub user_id: UserId,
}

/// A decoded chat payload from a room topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundChatFrame {
    /// A confirmed message (own echo or from the other party).
    Message(MessageFrame),
    /// A participant read the room.
    Read(ReadNotice),
}

impl InboundChatFrame {
    /// Decodes a room-topic payload.
    ///
    /// Read notices are distinguished by a `"type": "READ"` tag; every
    /// other object is parsed as a message frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Protocol`] if the payload matches neither
    /// shape. The caller logs and discards the frame; no store mutation
    /// occurs.
    pub fn decode(body: &serde_json::Value) -> Result<Self, ChatError> {
        if body.get("type").and_then(|t| t.as_str()) == Some("READ") {
            let notice: ReadNotice = serde_json::from_value(body.clone())
                .map_err(|e| ChatError::Protocol(format!("bad read notice: {e}")))?;
            return Ok(Self::Read(notice));
        }
        let frame: MessageFrame = serde_json::from_value(body.clone())
            .map_err(|e| ChatError::Protocol(format!("bad message frame: {e}")))?;
        Ok(Self::Message(frame))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn room_topic_embeds_room_id() {
        assert_eq!(room_topic(RoomId::new(7)), "/topic/chat/7");
    }

    #[test]
    fn send_frame_serializes_camel_case() {
        let frame = ChatSendFrame {
            room_id: RoomId::new(7),
            sender_user_id: UserId::new(1),
            role: SenderRole::Buyer,
            content: "hello".to_string(),
            attachments: Vec::new(),
        };
        let value = serde_json::to_value(&frame).unwrap_or_default();
        assert_eq!(value.get("roomId"), Some(&json!(7)));
        assert_eq!(value.get("senderUserId"), Some(&json!(1)));
        assert_eq!(value.get("role"), Some(&json!("BUYER")));
    }

    #[test]
    fn decode_message_frame() {
        let body = json!({
            "id": 42,
            "roomId": 7,
            "senderUserId": 2,
            "senderRole": "SELLER",
            "content": "your order shipped",
            "attachments": [],
            "isRead": false,
            "createdAt": "2024-05-01T10:00:00Z"
        });
        let decoded = InboundChatFrame::decode(&body);
        let Ok(InboundChatFrame::Message(frame)) = decoded else {
            panic!("expected message frame");
        };
        assert_eq!(frame.id, MessageId::new(42));
        assert_eq!(frame.sender_role, SenderRole::Seller);
    }

    #[test]
    fn decode_read_notice() {
        let body = json!({"type": "READ", "roomId": 7, "userId": 2});
        let decoded = InboundChatFrame::decode(&body);
        let Ok(InboundChatFrame::Read(notice)) = decoded else {
            panic!("expected read notice");
        };
        assert_eq!(notice.room_id, RoomId::new(7));
        assert_eq!(notice.user_id, UserId::new(2));
    }

    #[test]
    fn decode_rejects_malformed_payload() {
        let body = json!({"id": "not-a-number"});
        assert!(InboundChatFrame::decode(&body).is_err());
    }

    #[test]
    fn envelope_round_trip() {
        let frame = ClientFrame::Subscribe {
            id: 3,
            topic: room_topic(RoomId::new(9)),
        };
        let json = serde_json::to_string(&frame).unwrap_or_default();
        assert!(json.contains("\"type\":\"subscribe\""));
        let back: Option<ClientFrame> = serde_json::from_str(&json).ok();
        assert_eq!(back, Some(frame));
    }

    #[test]
    fn missing_attachments_defaults_empty() {
        let body = json!({
            "id": 1,
            "roomId": 7,
            "senderUserId": 2,
            "senderRole": "BUYER",
            "content": "hi",
            "createdAt": "2024-05-01T10:00:00Z"
        });
        let Ok(InboundChatFrame::Message(frame)) = InboundChatFrame::decode(&body) else {
            panic!("expected message frame");
        };
        assert!(frame.attachments.is_empty());
    }
}
