//! First-class deduplication keys and the time-boxed dedup window.
//!
//! A [`DedupKey`] is attached to a message at creation time and carried
//! unchanged for the message's whole life, so later comparisons never
//! depend on re-hashing the same inputs the same way. The
//! [`DedupWindow`] is a ring of `(key, expiry)` pairs swept lazily on
//! each use, bounding growth without a background timer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use super::ids::{RoomId, UserId};

/// Identity of an outbound send, derived once at message creation.
///
/// Two sends collide only when room, sender, content, and the per-room
/// local sequence number all match, i.e. when the same created message
/// is issued to the dispatcher twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    /// Room the send targets.
    pub room_id: RoomId,
    /// Sending user.
    pub sender_id: UserId,
    /// Hash over body text and attachment list.
    pub content_hash: u64,
    /// Per-room local sequence number assigned at creation.
    pub local_seq: u64,
}

impl DedupKey {
    /// Derives the key for a new outbound message.
    #[must_use]
    pub fn new(
        room_id: RoomId,
        sender_id: UserId,
        content: &str,
        attachments: &[String],
        local_seq: u64,
    ) -> Self {
        Self {
            room_id,
            sender_id,
            content_hash: content_hash(content, attachments),
            local_seq,
        }
    }

    /// Returns `true` if an inbound confirmation with the given sender
    /// and content could be the echo of this key's message.
    ///
    /// Inbound frames carry no local sequence number, so echo matching
    /// uses the remaining components only.
    #[must_use]
    pub fn matches_echo(&self, sender_id: UserId, content_hash: u64) -> bool {
        self.sender_id == sender_id && self.content_hash == content_hash
    }
}

/// Hashes message content and attachments into the 64-bit key component.
///
/// First eight bytes of SHA-256 over the body and each attachment
/// reference, length-prefixed to keep the encoding unambiguous.
#[must_use]
pub fn content_hash(content: &str, attachments: &[String]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update((content.len() as u64).to_be_bytes());
    hasher.update(content.as_bytes());
    for attachment in attachments {
        hasher.update((attachment.len() as u64).to_be_bytes());
        hasher.update(attachment.as_bytes());
    }
    let digest = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(digest.get(..8).unwrap_or(&[0u8; 8]));
    u64::from_be_bytes(first)
}

/// Short-lived set of recently issued dedup keys.
///
/// Guards against the same intent being issued twice in rapid
/// succession. Entries expire after the configured window; expired
/// entries are swept from the front on every call, so the ring never
/// grows beyond the number of sends inside one window.
#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    entries: VecDeque<(DedupKey, Instant)>,
}

impl DedupWindow {
    /// Creates a window with the given duration.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
        }
    }

    /// Records `key` at `now` unless it is already present and fresh.
    ///
    /// Returns `false` when the key was seen inside the window (the
    /// caller must suppress the duplicate), `true` when it was recorded.
    pub fn check_and_insert(&mut self, key: DedupKey, now: Instant) -> bool {
        self.sweep(now);
        if self.entries.iter().any(|(seen, _)| *seen == key) {
            return false;
        }
        self.entries.push_back((key, now + self.window));
        true
    }

    /// Number of live entries after sweeping at `now`.
    pub fn len(&mut self, now: Instant) -> usize {
        self.sweep(now);
        self.entries.len()
    }

    /// Returns `true` if no live entries remain at `now`.
    pub fn is_empty(&mut self, now: Instant) -> bool {
        self.len(now) == 0
    }

    fn sweep(&mut self, now: Instant) {
        while let Some((_, expiry)) = self.entries.front() {
            if *expiry > now {
                break;
            }
            self.entries.pop_front();
        }
    }
}
