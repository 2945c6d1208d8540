//! Store events delivered to observers.
//!
//! Every externally visible state change in the conversation core emits a
//! [`ChatEvent`] through the [`super::EventBus`]. UI collaborators
//! subscribe once and re-render from store snapshots; the events carry
//! just enough data to decide what to refresh.

use serde::Serialize;

use super::connection::ConnectionState;
use super::ids::RoomId;
use super::message::Message;

/// Event emitted after every externally visible state change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The connection lifecycle state changed.
    ConnectionChanged {
        /// The new state.
        state: ConnectionState,
    },

    /// The room list was (re)loaded or a room's denormalized listing
    /// fields changed.
    RoomsUpdated,

    /// A room-list fetch failed; the previous list is kept.
    RoomsLoadFailed {
        /// Human-readable failure description.
        error: String,
    },

    /// A room's message list changed (merge, confirmation, history load,
    /// retry, or discard).
    MessagesUpdated {
        /// The affected room.
        room_id: RoomId,
    },

    /// A room-history fetch failed; the room stays in the failed load
    /// state until retried.
    MessagesLoadFailed {
        /// The affected room.
        room_id: RoomId,
        /// Human-readable failure description.
        error: String,
    },

    /// A message from the other party was merged into a room.
    MessageReceived {
        /// The affected room.
        room_id: RoomId,
        /// The merged message.
        message: Message,
    },

    /// A pending local message was confirmed by the server echo.
    MessageConfirmed {
        /// The affected room.
        room_id: RoomId,
        /// Local sequence number of the confirmed message.
        local_seq: u64,
    },

    /// An outbound message exhausted its transmission attempts.
    SendFailed {
        /// The affected room.
        room_id: RoomId,
        /// Local sequence number of the failed message.
        local_seq: u64,
    },

    /// A room's unread counter changed.
    UnreadChanged {
        /// The affected room.
        room_id: RoomId,
        /// The new unread count.
        unread: u32,
    },
}

impl ChatEvent {
    /// Returns the room this event concerns, if it is room-scoped.
    #[must_use]
    pub const fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::MessagesUpdated { room_id }
            | Self::MessagesLoadFailed { room_id, .. }
            | Self::MessageReceived { room_id, .. }
            | Self::MessageConfirmed { room_id, .. }
            | Self::SendFailed { room_id, .. }
            | Self::UnreadChanged { room_id, .. } => Some(*room_id),
            Self::ConnectionChanged { .. } | Self::RoomsUpdated | Self::RoomsLoadFailed { .. } => {
                None
            }
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::ConnectionChanged { .. } => "connection_changed",
            Self::RoomsUpdated => "rooms_updated",
            Self::RoomsLoadFailed { .. } => "rooms_load_failed",
            Self::MessagesUpdated { .. } => "messages_updated",
            Self::MessagesLoadFailed { .. } => "messages_load_failed",
            Self::MessageReceived { .. } => "message_received",
            Self::MessageConfirmed { .. } => "message_confirmed",
            Self::SendFailed { .. } => "send_failed",
            Self::UnreadChanged { .. } => "unread_changed",
        }
    }
}
