//! Outbound dispatcher: per-room queues, deduplication, bounded retry.
//!
//! Send and read-receipt intents are held in ordered per-room queues
//! while the connection is down and flushed in original order on
//! reconnect. A time-boxed window of recently issued dedup keys refuses
//! re-issuing an identical key, so a duplicate submission never yields
//! a second transmission. Intents for the same room transmit in enqueue
//! order; intents for different rooms have no relative ordering.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::domain::{DedupKey, DedupWindow, RoomId};
use crate::transport::frame::{
    ChatReadFrame, ChatSendFrame, READ_DESTINATION, SEND_DESTINATION,
};

/// What an intent carries over the wire.
#[derive(Debug, Clone)]
pub enum IntentKind {
    /// An outbound message send.
    Send {
        /// The wire payload.
        frame: ChatSendFrame,
        /// Identity attached at message creation.
        key: DedupKey,
    },
    /// An outbound read receipt.
    MarkRead {
        /// The wire payload.
        frame: ChatReadFrame,
    },
}

/// A send or read-receipt request awaiting transmission.
///
/// Destroyed on confirmed delivery (sends), successful transmission
/// (read receipts), or after exceeding the retry limit.
#[derive(Debug, Clone)]
pub struct OutboundIntent {
    /// Correlation id for logs and delivery callbacks.
    pub intent_id: Uuid,
    /// The payload.
    pub kind: IntentKind,
    /// Transmission attempts so far.
    pub attempts: u32,
    /// Epoch of the connection the intent was last transmitted on.
    /// Cleared when the transmission is known to have failed.
    transmitted_epoch: Option<u64>,
}

impl OutboundIntent {
    fn room_id(&self) -> RoomId {
        match &self.kind {
            IntentKind::Send { frame, .. } => frame.room_id,
            IntentKind::MarkRead { frame } => frame.room_id,
        }
    }

    fn send_key(&self) -> Option<DedupKey> {
        match &self.kind {
            IntentKind::Send { key, .. } => Some(*key),
            IntentKind::MarkRead { .. } => None,
        }
    }
}

/// One transmission the caller must perform over the live connection.
#[derive(Debug, Clone)]
pub struct PreparedTransmit {
    /// Correlation id to report the outcome back with.
    pub intent_id: Uuid,
    /// Room the intent belongs to.
    pub room_id: RoomId,
    /// Application destination.
    pub destination: &'static str,
    /// JSON payload.
    pub body: serde_json::Value,
}

/// Result of draining the queues for transmission.
#[derive(Debug, Default)]
pub struct DrainResult {
    /// Intents to transmit now, per-room FIFO order preserved.
    pub transmits: Vec<PreparedTransmit>,
    /// Sends whose retry budget ran out; their messages become failed.
    pub exhausted: Vec<DedupKey>,
    /// Read receipts dropped after exhausting retries.
    pub dropped_reads: usize,
}

/// Outcome of reporting a failed transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The intent stays queued and will be retried on the next flush.
    Requeued,
    /// A send ran out of attempts; its message becomes failed.
    SendExhausted(DedupKey),
    /// A read receipt ran out of attempts and was dropped.
    ReadExhausted,
}

/// Accepts send and mark-read intents, deduplicates, queues, retries.
#[derive(Debug)]
pub struct OutboundDispatcher {
    queues: BTreeMap<RoomId, VecDeque<OutboundIntent>>,
    window: DedupWindow,
    retry_limit: u32,
}

impl OutboundDispatcher {
    /// Creates a dispatcher with the given dedup window and per-intent
    /// retry limit.
    #[must_use]
    pub fn new(dedup_window: Duration, retry_limit: u32) -> Self {
        Self {
            queues: BTreeMap::new(),
            window: DedupWindow::new(dedup_window),
            retry_limit: retry_limit.max(1),
        }
    }

    /// Enqueues a send intent unless its key was already issued inside
    /// the dedup window.
    ///
    /// Returns `false` when the duplicate was suppressed; the caller
    /// must not surface a second message for it.
    pub fn enqueue_send(&mut self, frame: ChatSendFrame, key: DedupKey, now: Instant) -> bool {
        if !self.window.check_and_insert(key, now) {
            tracing::debug!(room_id = %frame.room_id, "suppressing duplicate send");
            return false;
        }
        let room_id = frame.room_id;
        self.queues
            .entry(room_id)
            .or_default()
            .push_back(OutboundIntent {
                intent_id: Uuid::new_v4(),
                kind: IntentKind::Send { frame, key },
                attempts: 0,
                transmitted_epoch: None,
            });
        true
    }

    /// Enqueues a read-receipt intent.
    pub fn enqueue_mark_read(&mut self, frame: ChatReadFrame) {
        self.queues
            .entry(frame.room_id)
            .or_default()
            .push_back(OutboundIntent {
                intent_id: Uuid::new_v4(),
                kind: IntentKind::MarkRead { frame },
                attempts: 0,
                transmitted_epoch: None,
            });
    }

    /// Collects every intent that should be transmitted on the given
    /// connection epoch, preserving per-room enqueue order.
    ///
    /// Sends already transmitted on this epoch are skipped (they await
    /// their confirmation echo); sends transmitted on an older epoch
    /// are retransmitted. Each prepared transmission consumes one
    /// attempt; intents out of attempts are removed and reported.
    pub fn drain_ready(&mut self, epoch: u64) -> DrainResult {
        let mut result = DrainResult::default();

        for queue in self.queues.values_mut() {
            let mut index = 0;
            while index < queue.len() {
                let Some(intent) = queue.get_mut(index) else {
                    break;
                };
                if intent.transmitted_epoch == Some(epoch) {
                    index += 1;
                    continue;
                }
                if intent.attempts >= self.retry_limit {
                    match intent.send_key() {
                        Some(key) => result.exhausted.push(key),
                        None => result.dropped_reads += 1,
                    }
                    let _ = queue.remove(index);
                    continue;
                }
                intent.attempts += 1;
                intent.transmitted_epoch = Some(epoch);
                let (destination, body) = match &intent.kind {
                    IntentKind::Send { frame, .. } => (
                        SEND_DESTINATION,
                        serde_json::to_value(frame).unwrap_or_default(),
                    ),
                    IntentKind::MarkRead { frame } => (
                        READ_DESTINATION,
                        serde_json::to_value(frame).unwrap_or_default(),
                    ),
                };
                result.transmits.push(PreparedTransmit {
                    intent_id: intent.intent_id,
                    room_id: intent.room_id(),
                    destination,
                    body,
                });
                index += 1;
            }
        }

        self.queues.retain(|_, queue| !queue.is_empty());
        result
    }

    /// Records a successful transmission.
    ///
    /// Read receipts are done at this point; sends stay queued awaiting
    /// their confirmation echo (and are retransmitted on a later epoch
    /// if the echo never arrives).
    pub fn delivery_succeeded(&mut self, intent_id: Uuid) {
        for queue in self.queues.values_mut() {
            if let Some(index) = queue.iter().position(|i| i.intent_id == intent_id) {
                let is_read = queue
                    .get(index)
                    .is_some_and(|i| matches!(i.kind, IntentKind::MarkRead { .. }));
                if is_read {
                    let _ = queue.remove(index);
                }
                break;
            }
        }
        self.queues.retain(|_, queue| !queue.is_empty());
    }

    /// Records a failed transmission.
    ///
    /// Returns `None` when the intent is no longer tracked (e.g. its
    /// confirmation echo raced the failure report).
    pub fn delivery_failed(&mut self, intent_id: Uuid) -> Option<DeliveryFailure> {
        for queue in self.queues.values_mut() {
            let Some(index) = queue.iter().position(|i| i.intent_id == intent_id) else {
                continue;
            };
            let Some(intent) = queue.get_mut(index) else {
                continue;
            };
            if intent.attempts >= self.retry_limit {
                let outcome = match intent.send_key() {
                    Some(key) => DeliveryFailure::SendExhausted(key),
                    None => DeliveryFailure::ReadExhausted,
                };
                let _ = queue.remove(index);
                self.queues.retain(|_, q| !q.is_empty());
                return Some(outcome);
            }
            intent.transmitted_epoch = None;
            return Some(DeliveryFailure::Requeued);
        }
        None
    }

    /// Destroys the send intent matching a confirmation echo.
    ///
    /// Returns `true` when an intent was removed.
    pub fn confirm(&mut self, key: &DedupKey) -> bool {
        let Some(queue) = self.queues.get_mut(&key.room_id) else {
            return false;
        };
        let Some(index) = queue
            .iter()
            .position(|i| i.send_key().as_ref() == Some(key))
        else {
            return false;
        };
        let _ = queue.remove(index);
        if queue.is_empty() {
            self.queues.remove(&key.room_id);
        }
        true
    }

    /// Returns `true` when a send intent carrying `key` is still queued.
    #[must_use]
    pub fn has_intent(&self, key: &DedupKey) -> bool {
        self.queues
            .get(&key.room_id)
            .is_some_and(|queue| queue.iter().any(|i| i.send_key().as_ref() == Some(key)))
    }

    /// Number of intents queued for a room.
    #[must_use]
    pub fn queued_for(&self, room_id: RoomId) -> usize {
        self.queues.get(&room_id).map_or(0, VecDeque::len)
    }

    /// Returns `true` when no intents are queued anywhere.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{SenderRole, UserId};

    fn send_frame(room: i64, content: &str) -> ChatSendFrame {
        ChatSendFrame {
            room_id: RoomId::new(room),
            sender_user_id: UserId::new(1),
            role: SenderRole::Buyer,
            content: content.to_string(),
            attachments: Vec::new(),
        }
    }

    fn key_for(frame: &ChatSendFrame, seq: u64) -> DedupKey {
        DedupKey::new(
            frame.room_id,
            frame.sender_user_id,
            &frame.content,
            &frame.attachments,
            seq,
        )
    }

    fn dispatcher() -> OutboundDispatcher {
        OutboundDispatcher::new(Duration::from_secs(2), 3)
    }

    #[test]
    fn queued_sends_flush_in_enqueue_order() {
        let mut d = dispatcher();
        let now = Instant::now();
        for (seq, content) in ["first", "second", "third"].iter().enumerate() {
            let frame = send_frame(7, content);
            let key = key_for(&frame, seq as u64);
            assert!(d.enqueue_send(frame, key, now));
        }

        let drained = d.drain_ready(1);
        let contents: Vec<String> = drained
            .transmits
            .iter()
            .map(|t| {
                t.body
                    .get("content")
                    .and_then(|c| c.as_str())
                    .unwrap_or("")
                    .to_string()
            })
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn identical_key_within_window_is_suppressed() {
        let mut d = dispatcher();
        let now = Instant::now();
        let frame = send_frame(7, "hello");
        let key = key_for(&frame, 0);

        assert!(d.enqueue_send(frame.clone(), key, now));
        assert!(!d.enqueue_send(frame, key, now + Duration::from_millis(300)));
        assert_eq!(d.queued_for(RoomId::new(7)), 1);
    }

    #[test]
    fn distinct_sequence_numbers_are_distinct_sends() {
        let mut d = dispatcher();
        let now = Instant::now();
        let frame = send_frame(7, "hello");

        assert!(d.enqueue_send(frame.clone(), key_for(&frame, 0), now));
        assert!(d.enqueue_send(frame.clone(), key_for(&frame, 1), now));
        assert_eq!(d.queued_for(RoomId::new(7)), 2);
    }

    #[test]
    fn transmitted_send_awaits_confirmation() {
        let mut d = dispatcher();
        let frame = send_frame(7, "hello");
        let key = key_for(&frame, 0);
        d.enqueue_send(frame, key, Instant::now());

        let first = d.drain_ready(1);
        assert_eq!(first.transmits.len(), 1);
        let Some(transmit) = first.transmits.first() else {
            panic!("expected one transmit");
        };
        d.delivery_succeeded(transmit.intent_id);

        // Still queued awaiting the echo; not retransmitted on the same
        // epoch.
        assert_eq!(d.queued_for(RoomId::new(7)), 1);
        assert!(d.drain_ready(1).transmits.is_empty());

        // A new epoch retransmits it.
        assert_eq!(d.drain_ready(2).transmits.len(), 1);

        // The echo destroys the intent.
        assert!(d.confirm(&key));
        assert!(d.is_idle());
    }

    #[test]
    fn read_receipt_is_done_after_transmission() {
        let mut d = dispatcher();
        d.enqueue_mark_read(ChatReadFrame {
            room_id: RoomId::new(7),
            user_id: UserId::new(1),
        });

        let drained = d.drain_ready(1);
        assert_eq!(drained.transmits.len(), 1);
        let Some(transmit) = drained.transmits.first() else {
            panic!("expected one transmit");
        };
        assert_eq!(transmit.destination, READ_DESTINATION);
        d.delivery_succeeded(transmit.intent_id);
        assert!(d.is_idle());
    }

    #[test]
    fn send_exhausts_after_retry_limit() {
        let mut d = OutboundDispatcher::new(Duration::from_secs(2), 2);
        let frame = send_frame(7, "doomed");
        let key = key_for(&frame, 0);
        d.enqueue_send(frame, key, Instant::now());

        for epoch in 1..=2 {
            let drained = d.drain_ready(epoch);
            assert_eq!(drained.transmits.len(), 1);
            let Some(transmit) = drained.transmits.first() else {
                panic!("expected one transmit");
            };
            let failure = d.delivery_failed(transmit.intent_id);
            if epoch < 2 {
                assert_eq!(failure, Some(DeliveryFailure::Requeued));
            } else {
                assert_eq!(failure, Some(DeliveryFailure::SendExhausted(key)));
            }
        }
        assert!(d.is_idle());
    }

    #[test]
    fn exhausted_send_is_reported_at_drain_too() {
        let mut d = OutboundDispatcher::new(Duration::from_secs(2), 1);
        let frame = send_frame(7, "doomed");
        let key = key_for(&frame, 0);
        d.enqueue_send(frame, key, Instant::now());

        // Transmitted once on epoch 1, never confirmed, link lost.
        assert_eq!(d.drain_ready(1).transmits.len(), 1);

        // On the next epoch the attempt budget (1) is spent.
        let drained = d.drain_ready(2);
        assert!(drained.transmits.is_empty());
        assert_eq!(drained.exhausted, vec![key]);
        assert!(d.is_idle());
    }

    #[test]
    fn rooms_are_independent_queues() {
        let mut d = dispatcher();
        let now = Instant::now();
        let a = send_frame(1, "room one");
        let b = send_frame(2, "room two");
        d.enqueue_send(a.clone(), key_for(&a, 0), now);
        d.enqueue_send(b.clone(), key_for(&b, 0), now);

        assert_eq!(d.queued_for(RoomId::new(1)), 1);
        assert_eq!(d.queued_for(RoomId::new(2)), 1);
        assert_eq!(d.drain_ready(1).transmits.len(), 2);
    }
}
