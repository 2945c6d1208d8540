//! Merge algorithm: reconciling confirmed frames with optimistic state.
//!
//! Confirmed inbound messages are matched against pending local entries
//! by dedup identity; on match the pending entry is replaced in place,
//! preserving its list position. Unmatched messages are inserted in
//! server-timestamp order ahead of the pending tail. Re-delivery of a
//! known server id is idempotently ignored. All functions here are pure
//! over [`RoomState`], so tests drive them with synthetic frames.

use crate::domain::{DedupKey, DeliveryState, Message, UserId};
use crate::transport::frame::MessageFrame;

use super::room_state::RoomState;

/// What merging one confirmed frame did to the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A pending local message was confirmed in place.
    ConfirmedPending {
        /// List position of the confirmed entry (unchanged).
        index: usize,
        /// The entry's local sequence number.
        local_seq: u64,
        /// The dedup key attached at creation, for intent cleanup.
        key: Option<DedupKey>,
    },
    /// The message originated elsewhere and was inserted in timestamp
    /// order.
    Inserted {
        /// Insertion position.
        index: usize,
    },
    /// The server id is already present; the re-delivery was ignored.
    Duplicate,
}

/// Merges one confirmed frame into the room.
pub fn merge_confirmed(state: &mut RoomState, frame: MessageFrame) -> MergeOutcome {
    if state.messages.iter().any(|m| m.id == Some(frame.id)) {
        return MergeOutcome::Duplicate;
    }

    // Echo match: the earliest unconfirmed local message with the same
    // sender and content is the one this frame confirms.
    let hash = frame.content_hash();
    let echo_index = state.messages.iter().position(|m| {
        !m.is_confirmed()
            && m.sender_id == frame.sender_user_id
            && m.dedup_key
                .is_some_and(|k| k.matches_echo(frame.sender_user_id, hash))
    });

    if let Some(index) = echo_index {
        let Some(message) = state.messages.get_mut(index) else {
            return MergeOutcome::Duplicate;
        };
        message.id = Some(frame.id);
        message.created_at = frame.created_at;
        message.delivery = DeliveryState::Sent;
        message.is_read = frame.is_read;
        let outcome = MergeOutcome::ConfirmedPending {
            index,
            local_seq: message.local_seq,
            key: message.dedup_key,
        };
        state.refresh_last_message();
        return outcome;
    }

    // No match: insert among the confirmed region in timestamp order,
    // ahead of the pending tail.
    let boundary = state
        .messages
        .iter()
        .position(|m| !m.is_confirmed())
        .unwrap_or(state.messages.len());
    let index = state
        .messages
        .iter()
        .take(boundary)
        .position(|m| m.created_at > frame.created_at)
        .unwrap_or(boundary);
    state.messages.insert(index, Message::from(frame));
    state.refresh_last_message();
    MergeOutcome::Inserted { index }
}

/// Merges a fetched history page into the room.
///
/// The backend returns pages newest-first; insertion is order-agnostic,
/// so each frame is merged individually. Returns how many frames were
/// new to the room.
pub fn apply_history(state: &mut RoomState, frames: Vec<MessageFrame>) -> usize {
    let mut merged = 0;
    for frame in frames {
        if !matches!(merge_confirmed(state, frame), MergeOutcome::Duplicate) {
            merged += 1;
        }
    }
    merged
}

/// Applies a read notice: `reader` has read the room, so every message
/// authored by someone else is now read. Returns `true` when any flag
/// changed.
pub fn apply_read_notice(state: &mut RoomState, reader: UserId) -> bool {
    let mut changed = false;
    for message in &mut state.messages {
        if message.sender_id != reader && !message.is_read {
            message.is_read = true;
            changed = true;
        }
    }
    if changed {
        state.refresh_last_message();
    }
    changed
}

/// Marks the unconfirmed message carrying `key` as failed.
///
/// Returns its local sequence number, or `None` when no such message
/// exists (already confirmed or discarded).
pub fn mark_send_failed(state: &mut RoomState, key: &DedupKey) -> Option<u64> {
    let message = state
        .messages
        .iter_mut()
        .find(|m| !m.is_confirmed() && m.dedup_key.as_ref() == Some(key))?;
    message.delivery = DeliveryState::Failed;
    Some(message.local_seq)
}

/// Removes a failed message the user chose to discard.
///
/// Returns `true` when a message was removed.
pub fn discard_failed(state: &mut RoomState, local_seq: u64) -> bool {
    let Some(index) = state
        .messages
        .iter()
        .position(|m| m.delivery == DeliveryState::Failed && m.local_seq == local_seq)
    else {
        return false;
    };
    let _ = state.messages.remove(index);
    state.refresh_last_message();
    true
}
