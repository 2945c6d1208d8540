//! Per-room cached state: messages, load machine, unread counter.

use crate::domain::{Message, Room, RoomId, UserId};

/// Load lifecycle of a room's message history.
///
/// Re-entrant load requests while `Loading` are coalesced into the
/// in-flight fetch rather than issuing a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// History never fetched.
    NotLoaded,
    /// A fetch is in flight.
    Loading,
    /// History fetched successfully.
    Loaded,
    /// The last fetch failed; retryable.
    LoadFailed,
}

/// The store's cached state for one room.
#[derive(Debug)]
pub struct RoomState {
    /// Room metadata from the backend; `None` until the room list (or a
    /// room lookup) has delivered it.
    pub meta: Option<Room>,
    /// Ordered message list: confirmed messages by server timestamp,
    /// pending ones appended after the last confirmed in local-sequence
    /// order.
    pub messages: Vec<Message>,
    /// History load machine.
    pub load: LoadState,
    /// Denormalized unread count for listing; messages from the other
    /// party not yet read here.
    pub unread_count: u32,
    /// Denormalized newest message for listing.
    pub last_message: Option<Message>,
    next_local_seq: u64,
}

impl RoomState {
    /// Creates an empty, unloaded room state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            meta: None,
            messages: Vec::new(),
            load: LoadState::NotLoaded,
            unread_count: 0,
            last_message: None,
            next_local_seq: 0,
        }
    }

    /// Allocates the next per-room local sequence number.
    pub fn alloc_seq(&mut self) -> u64 {
        let seq = self.next_local_seq;
        self.next_local_seq += 1;
        seq
    }

    /// Transitions toward `Loading`.
    ///
    /// Returns `false` when a fetch is already in flight and the caller
    /// must coalesce into it.
    pub fn begin_load(&mut self) -> bool {
        if self.load == LoadState::Loading {
            return false;
        }
        self.load = LoadState::Loading;
        true
    }

    /// Resolves the in-flight load.
    pub fn finish_load(&mut self, ok: bool) {
        self.load = if ok {
            LoadState::Loaded
        } else {
            LoadState::LoadFailed
        };
    }

    /// Recomputes the unread counter from the message list: messages
    /// authored by the other party and not yet read.
    pub fn recount_unread(&mut self, self_user: UserId) {
        let count = self
            .messages
            .iter()
            .filter(|m| m.sender_id != self_user && !m.is_read)
            .count();
        self.unread_count = u32::try_from(count).unwrap_or(u32::MAX);
    }

    /// Refreshes the denormalized newest-message field.
    pub fn refresh_last_message(&mut self) {
        self.last_message = self.messages.last().cloned();
    }

    /// Finds a locally originated message by its sequence number.
    pub fn find_by_seq(&mut self, local_seq: u64) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| !m.is_confirmed() && m.local_seq == local_seq)
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing snapshot of one room handed to observers.
#[derive(Debug, Clone)]
pub struct RoomSummary {
    /// Room identifier.
    pub room_id: RoomId,
    /// Room metadata, when known.
    pub meta: Option<Room>,
    /// Newest message, when any.
    pub last_message: Option<Message>,
    /// Unread count for the badge.
    pub unread_count: u32,
    /// History load state.
    pub load: LoadState,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonic() {
        let mut state = RoomState::new();
        assert_eq!(state.alloc_seq(), 0);
        assert_eq!(state.alloc_seq(), 1);
        assert_eq!(state.alloc_seq(), 2);
    }

    #[test]
    fn reentrant_load_is_coalesced() {
        let mut state = RoomState::new();
        assert!(state.begin_load());
        assert!(!state.begin_load());
        state.finish_load(true);
        assert_eq!(state.load, LoadState::Loaded);
        // A refresh from Loaded is a fresh fetch.
        assert!(state.begin_load());
        state.finish_load(false);
        assert_eq!(state.load, LoadState::LoadFailed);
        // LoadFailed is retryable.
        assert!(state.begin_load());
    }
}
