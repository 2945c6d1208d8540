//! Conversation store: rooms, merged message lists, read tracking.
//!
//! The store is the authoritative client-side state. It runs as a
//! single-writer actor (see [`core`]); the merge algorithm in [`merge`]
//! reconciles optimistic local messages with server-confirmed state,
//! and [`read_tracker`] derives read receipts from the active-room
//! pointer.

pub(crate) mod core;
pub mod merge;
pub mod read_tracker;
pub mod room_state;

pub use merge::MergeOutcome;
pub use read_tracker::ReadTracker;
pub use room_state::{LoadState, RoomState, RoomSummary};
