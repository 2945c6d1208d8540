//! Read tracking: receipts for the active room, optimistic badges.
//!
//! When the active room holds unread messages from the other party, one
//! read-receipt intent goes out through the dispatcher and the unread
//! counter drops to zero immediately, regardless of network state. A
//! receipt that later fails to send is not rolled back: a false "read"
//! on this client is preferable to a stale unread badge, and the next
//! activity in the room re-emits the receipt.

use crate::domain::{RoomId, UserId};
use crate::transport::frame::ChatReadFrame;

use super::room_state::RoomState;

/// Derives read receipts from active-room changes and merged inbound
/// messages.
#[derive(Debug, Clone, Copy)]
pub struct ReadTracker {
    user_id: UserId,
}

impl ReadTracker {
    /// Creates a tracker acting for `user_id`.
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    /// Decides whether a receipt should be emitted for `room_id` given
    /// the current active-room pointer.
    #[must_use]
    pub fn receipt_needed(
        &self,
        active_room: Option<RoomId>,
        room_id: RoomId,
        state: &RoomState,
    ) -> Option<ChatReadFrame> {
        if active_room != Some(room_id) || state.unread_count == 0 {
            return None;
        }
        Some(ChatReadFrame {
            room_id,
            user_id: self.user_id,
        })
    }

    /// Applies the optimistic local effect of an emitted receipt:
    /// the unread counter drops to zero and the other party's messages
    /// are flagged read. Returns `true` when anything changed.
    pub fn apply_optimistic(&self, state: &mut RoomState) -> bool {
        let mut changed = state.unread_count != 0;
        state.unread_count = 0;
        for message in &mut state.messages {
            if message.sender_id != self.user_id && !message.is_read {
                message.is_read = true;
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    const ME: UserId = UserId::new(1);
    const ROOM: RoomId = RoomId::new(7);

    #[test]
    fn no_receipt_for_inactive_room() {
        let tracker = ReadTracker::new(ME);
        let mut state = RoomState::new();
        state.unread_count = 3;

        assert!(tracker.receipt_needed(None, ROOM, &state).is_none());
        assert!(
            tracker
                .receipt_needed(Some(RoomId::new(8)), ROOM, &state)
                .is_none()
        );
    }

    #[test]
    fn no_receipt_without_unread() {
        let tracker = ReadTracker::new(ME);
        let state = RoomState::new();
        assert!(tracker.receipt_needed(Some(ROOM), ROOM, &state).is_none());
    }

    #[test]
    fn receipt_for_active_room_with_unread() {
        let tracker = ReadTracker::new(ME);
        let mut state = RoomState::new();
        state.unread_count = 3;

        let receipt = tracker.receipt_needed(Some(ROOM), ROOM, &state);
        assert_eq!(
            receipt,
            Some(ChatReadFrame {
                room_id: ROOM,
                user_id: ME,
            })
        );
    }

    #[test]
    fn optimistic_zeroing_is_idempotent() {
        let tracker = ReadTracker::new(ME);
        let mut state = RoomState::new();
        state.unread_count = 2;

        assert!(tracker.apply_optimistic(&mut state));
        assert_eq!(state.unread_count, 0);
        assert!(!tracker.apply_optimistic(&mut state));
    }
}
