//! Per-room subscription registry.
//!
//! Tracks which rooms are of interest and which subscription handle, if
//! any, currently serves each of them. Intent is authoritative: the
//! desired set survives reconnects, while handles are scoped to one
//! connection epoch and rebuilt on every successful connect.

use std::collections::{HashMap, HashSet};

use crate::domain::RoomId;
use crate::transport::SubscriptionId;

use super::manager::SubscriptionHandle;

/// Outcome of a completed subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The handle is now the room's live subscription.
    Applied,
    /// Interest was withdrawn (or another handle won) while the request
    /// was in flight; the caller must unsubscribe the handle.
    Cancel,
    /// The handle belongs to a superseded connection epoch; drop it.
    Stale,
}

/// Registry of desired rooms and their live subscription handles.
///
/// Invariant: at most one live handle per room at any time, and a
/// handle from a superseded epoch is never used to deliver anything.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    desired: HashSet<RoomId>,
    active: HashMap<RoomId, SubscriptionHandle>,
    in_flight: HashSet<RoomId>,
    /// Current connection epoch; `None` while disconnected.
    epoch: Option<u64>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a room as desired.
    ///
    /// Returns `true` when the caller should issue a subscribe request
    /// now (connected, with no live or in-flight subscription); the
    /// room is then accounted as in flight until
    /// [`Self::subscribe_completed`] or [`Self::subscribe_failed`].
    pub fn ensure(&mut self, room_id: RoomId) -> bool {
        self.desired.insert(room_id);
        if self.epoch.is_none()
            || self.active.contains_key(&room_id)
            || self.in_flight.contains(&room_id)
        {
            return false;
        }
        self.in_flight.insert(room_id);
        true
    }

    /// Marks a room as no longer desired.
    ///
    /// Returns the live handle the caller must unsubscribe, if any. A
    /// subscribe still in flight is left to complete; its handle is
    /// cancelled when it lands.
    pub fn release(&mut self, room_id: RoomId) -> Option<SubscriptionHandle> {
        self.desired.remove(&room_id);
        self.active.remove(&room_id)
    }

    /// Records a successful connect and rotates the epoch.
    ///
    /// All handles and in-flight requests from the previous epoch are
    /// discarded. Returns the desired rooms to subscribe, each now
    /// accounted as in flight.
    pub fn connected(&mut self, epoch: u64) -> Vec<RoomId> {
        self.epoch = Some(epoch);
        self.active.clear();
        self.in_flight.clear();
        let rooms: Vec<RoomId> = self.desired.iter().copied().collect();
        self.in_flight.extend(rooms.iter().copied());
        rooms
    }

    /// Records the loss of the connection. Handles die with the link.
    pub fn disconnected(&mut self) {
        self.epoch = None;
        self.active.clear();
        self.in_flight.clear();
    }

    /// Applies a completed subscribe request.
    pub fn subscribe_completed(
        &mut self,
        room_id: RoomId,
        handle: SubscriptionHandle,
    ) -> SubscribeOutcome {
        self.in_flight.remove(&room_id);
        if self.epoch != Some(handle.epoch) {
            return SubscribeOutcome::Stale;
        }
        if !self.desired.contains(&room_id) {
            return SubscribeOutcome::Cancel;
        }
        if self.active.contains_key(&room_id) {
            // A handle already serves this room; keep the first one.
            return SubscribeOutcome::Cancel;
        }
        self.active.insert(room_id, handle);
        SubscribeOutcome::Applied
    }

    /// Clears the in-flight accounting after a failed subscribe. The
    /// room stays desired and is retried on the next connect.
    pub fn subscribe_failed(&mut self, room_id: RoomId) {
        self.in_flight.remove(&room_id);
    }

    /// Admission check for an inbound frame: returns the room served by
    /// the given subscription, or `None` when the frame is tagged with
    /// a stale or unknown handle and must be dropped.
    #[must_use]
    pub fn room_for(&self, id: SubscriptionId, epoch: u64) -> Option<RoomId> {
        if self.epoch != Some(epoch) {
            return None;
        }
        self.active
            .iter()
            .find(|(_, handle)| handle.id == id && handle.epoch == epoch)
            .map(|(room_id, _)| *room_id)
    }

    /// Returns the live handle for a room, if any.
    #[must_use]
    pub fn handle_for(&self, room_id: RoomId) -> Option<SubscriptionHandle> {
        self.active.get(&room_id).copied()
    }

    /// Number of rooms currently desired.
    #[must_use]
    pub fn desired_count(&self) -> usize {
        self.desired.len()
    }

    /// Number of live handles.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn handle(id: u64, epoch: u64) -> SubscriptionHandle {
        SubscriptionHandle {
            id: SubscriptionId::new(id),
            epoch,
        }
    }

    #[test]
    fn ensure_while_disconnected_defers_subscribe() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.ensure(RoomId::new(7)));
        assert_eq!(registry.desired_count(), 1);

        let rooms = registry.connected(1);
        assert_eq!(rooms, vec![RoomId::new(7)]);
    }

    #[test]
    fn ensure_while_connected_subscribes_once() {
        let mut registry = SubscriptionRegistry::new();
        registry.connected(1);
        assert!(registry.ensure(RoomId::new(7)));
        // Second ensure while in flight does not re-issue.
        assert!(!registry.ensure(RoomId::new(7)));

        let outcome = registry.subscribe_completed(RoomId::new(7), handle(1, 1));
        assert_eq!(outcome, SubscribeOutcome::Applied);
        assert_eq!(registry.active_count(), 1);
        // Third ensure with a live handle does not re-issue either.
        assert!(!registry.ensure(RoomId::new(7)));
    }

    #[test]
    fn release_during_in_flight_cancels_completion() {
        let mut registry = SubscriptionRegistry::new();
        registry.connected(1);
        assert!(registry.ensure(RoomId::new(7)));
        assert!(registry.release(RoomId::new(7)).is_none());

        let outcome = registry.subscribe_completed(RoomId::new(7), handle(1, 1));
        assert_eq!(outcome, SubscribeOutcome::Cancel);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn release_then_ensure_yields_exactly_one_handle() {
        let mut registry = SubscriptionRegistry::new();
        registry.connected(1);
        assert!(registry.ensure(RoomId::new(7)));
        registry.subscribe_completed(RoomId::new(7), handle(1, 1));

        let released = registry.release(RoomId::new(7));
        assert_eq!(released, Some(handle(1, 1)));
        assert!(registry.ensure(RoomId::new(7)));
        let outcome = registry.subscribe_completed(RoomId::new(7), handle(2, 1));
        assert_eq!(outcome, SubscribeOutcome::Applied);

        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.handle_for(RoomId::new(7)), Some(handle(2, 1)));
    }

    #[test]
    fn stale_epoch_completion_is_dropped() {
        let mut registry = SubscriptionRegistry::new();
        registry.connected(1);
        assert!(registry.ensure(RoomId::new(7)));

        // Reconnect happens while the subscribe is in flight.
        let rooms = registry.connected(2);
        assert_eq!(rooms, vec![RoomId::new(7)]);

        let outcome = registry.subscribe_completed(RoomId::new(7), handle(1, 1));
        assert_eq!(outcome, SubscribeOutcome::Stale);

        let outcome = registry.subscribe_completed(RoomId::new(7), handle(1, 2));
        assert_eq!(outcome, SubscribeOutcome::Applied);
    }

    #[test]
    fn frames_on_stale_handles_are_refused() {
        let mut registry = SubscriptionRegistry::new();
        registry.connected(1);
        registry.ensure(RoomId::new(7));
        registry.subscribe_completed(RoomId::new(7), handle(3, 1));

        assert_eq!(
            registry.room_for(SubscriptionId::new(3), 1),
            Some(RoomId::new(7))
        );
        // Same id tagged with an older epoch is dropped.
        assert_eq!(registry.room_for(SubscriptionId::new(3), 0), None);
        // Unknown id is dropped.
        assert_eq!(registry.room_for(SubscriptionId::new(9), 1), None);
    }

    #[test]
    fn reconnect_resubscribes_all_desired_rooms() {
        let mut registry = SubscriptionRegistry::new();
        registry.connected(1);
        registry.ensure(RoomId::new(1));
        registry.ensure(RoomId::new(2));
        registry.subscribe_completed(RoomId::new(1), handle(1, 1));
        registry.subscribe_completed(RoomId::new(2), handle(2, 1));

        registry.disconnected();
        assert_eq!(registry.active_count(), 0);

        let mut rooms = registry.connected(2);
        rooms.sort();
        assert_eq!(rooms, vec![RoomId::new(1), RoomId::new(2)]);
    }
}
