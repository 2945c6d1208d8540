//! The conversation store core: a single-writer actor.
//!
//! All store mutation runs on one task that processes user commands,
//! inbound frames, and connection events sequentially, so the merge
//! logic never races with itself and no locking is needed. REST fetches
//! and wire transmissions are spawned out and post their results back
//! into the same command channel; the loop itself never blocks.

use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::api::{ChatApi, RoomDto};
use crate::config::ChatConfig;
use crate::conn::manager::LinkEvent;
use crate::conn::{ConnectionManager, SubscriptionHandle, SubscriptionRegistry};
use crate::dispatch::{DeliveryFailure, OutboundDispatcher};
use crate::domain::{
    ChatEvent, ChatIdentity, ConnectionState, DedupKey, DeliveryState, EventBus, Message, OrderId,
    Room, RoomId, SenderRole, ShopId, UserId,
};
use crate::error::ChatError;
use crate::transport::frame::{
    ChatReadFrame, ChatSendFrame, InboundChatFrame, MessageFrame, room_topic,
};

use super::merge::{self, MergeOutcome};
use super::read_tracker::ReadTracker;
use super::room_state::{RoomState, RoomSummary};

/// Commands processed by the store task.
pub(crate) enum StoreCommand {
    /// Fetch (or refresh) the room list.
    LoadRooms,
    /// Fetch (or refresh) a room's history.
    LoadMessages(RoomId),
    /// Move the active-room pointer.
    SetActiveRoom(Option<RoomId>),
    /// Create an optimistic message and enqueue its send intent.
    Send {
        room_id: RoomId,
        content: String,
        attachments: Vec<String>,
        reply: oneshot::Sender<Message>,
    },
    /// Emit a read receipt for a room unconditionally.
    MarkRead(RoomId),
    /// Re-enqueue a failed message.
    RetryMessage { room_id: RoomId, local_seq: u64 },
    /// Drop a failed message from the list.
    DiscardMessage { room_id: RoomId, local_seq: u64 },
    /// Look up or create the room with a shop.
    EnsureRoom {
        shop_id: ShopId,
        order_id: Option<OrderId>,
        reply: oneshot::Sender<Result<Room, ChatError>>,
    },
    /// Withdraw interest in a room's inbound delivery.
    ReleaseRoom(RoomId),
    /// Snapshot the room list.
    Rooms {
        reply: oneshot::Sender<Vec<RoomSummary>>,
    },
    /// Snapshot a room's message list.
    Messages {
        room_id: RoomId,
        reply: oneshot::Sender<Vec<Message>>,
    },
    /// Stop the store task and close the connection.
    Shutdown,

    // Completions posted back by spawned tasks.
    RoomsFetched(Result<Vec<RoomDto>, ChatError>),
    MessagesFetched {
        room_id: RoomId,
        result: Result<Vec<MessageFrame>, ChatError>,
    },
    RoomResolved {
        result: Result<RoomDto, ChatError>,
        reply: oneshot::Sender<Result<Room, ChatError>>,
    },
    FlushCompleted(Vec<(uuid::Uuid, RoomId, Result<(), ChatError>)>),
}

enum Flow {
    Continue,
    Stop,
}

/// The single-writer store actor.
pub(crate) struct StoreCore {
    identity: ChatIdentity,
    config: ChatConfig,
    api: ChatApi,
    conn: ConnectionManager,
    events: EventBus,
    self_tx: mpsc::UnboundedSender<StoreCommand>,
    rooms: BTreeMap<RoomId, RoomState>,
    active_room: Option<RoomId>,
    registry: SubscriptionRegistry,
    dispatcher: OutboundDispatcher,
    tracker: ReadTracker,
    epoch: u64,
    conn_state: ConnectionState,
    rooms_loading: bool,
    flushing: bool,
    flush_dirty: bool,
}

impl StoreCore {
    /// Spawns the store task. Returns the command channel the client
    /// facade talks through.
    pub(crate) fn spawn(
        identity: ChatIdentity,
        config: ChatConfig,
        api: ChatApi,
        conn: ConnectionManager,
        events: EventBus,
        link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> mpsc::UnboundedSender<StoreCommand> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let dispatcher =
            OutboundDispatcher::new(config.dedup_window(), config.send_retry_limit);
        let core = Self {
            tracker: ReadTracker::new(identity.user_id),
            identity,
            config,
            api,
            conn,
            events,
            self_tx: cmd_tx.clone(),
            rooms: BTreeMap::new(),
            active_room: None,
            registry: SubscriptionRegistry::new(),
            dispatcher,
            epoch: 0,
            conn_state: ConnectionState::Disconnected,
            rooms_loading: false,
            flushing: false,
            flush_dirty: false,
        };
        tokio::spawn(core.run(cmd_rx, link_rx));
        cmd_tx
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<StoreCommand>,
        mut link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        loop {
            // Commands drain first so user intents issued before a frame
            // arrived are applied before that frame is merged.
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(self.handle_command(cmd), Flow::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                event = link_rx.recv() => {
                    match event {
                        Some(event) => self.handle_link_event(event),
                        None => break,
                    }
                }
            }
        }
        tracing::debug!("store task stopped");
    }

    fn handle_command(&mut self, cmd: StoreCommand) -> Flow {
        match cmd {
            StoreCommand::LoadRooms => self.load_rooms(),
            StoreCommand::LoadMessages(room_id) => self.load_messages(room_id),
            StoreCommand::SetActiveRoom(room_id) => self.set_active_room(room_id),
            StoreCommand::Send {
                room_id,
                content,
                attachments,
                reply,
            } => self.send(room_id, content, attachments, reply),
            StoreCommand::MarkRead(room_id) => self.emit_receipt(room_id),
            StoreCommand::RetryMessage { room_id, local_seq } => {
                self.retry_message(room_id, local_seq);
            }
            StoreCommand::DiscardMessage { room_id, local_seq } => {
                self.discard_message(room_id, local_seq);
            }
            StoreCommand::EnsureRoom {
                shop_id,
                order_id,
                reply,
            } => self.ensure_room(shop_id, order_id, reply),
            StoreCommand::ReleaseRoom(room_id) => {
                if let Some(handle) = self.registry.release(room_id) {
                    self.conn.unsubscribe(handle);
                }
            }
            StoreCommand::Rooms { reply } => {
                let _ = reply.send(self.room_summaries());
            }
            StoreCommand::Messages { room_id, reply } => {
                let messages = self
                    .rooms
                    .get(&room_id)
                    .map(|s| s.messages.clone())
                    .unwrap_or_default();
                let _ = reply.send(messages);
            }
            StoreCommand::Shutdown => {
                self.conn.close();
                return Flow::Stop;
            }
            StoreCommand::RoomsFetched(result) => self.rooms_fetched(result),
            StoreCommand::MessagesFetched { room_id, result } => {
                self.messages_fetched(room_id, result);
            }
            StoreCommand::RoomResolved { result, reply } => self.room_resolved(result, reply),
            StoreCommand::FlushCompleted(results) => self.flush_completed(results),
        }
        Flow::Continue
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::State { state, epoch } => {
                self.conn_state = state;
                self.epoch = epoch;
                self.events.publish(ChatEvent::ConnectionChanged { state });
                if state.is_connected() {
                    let rooms = self.registry.connected(epoch);
                    tracing::debug!(epoch, rooms = rooms.len(), "rebuilding subscriptions");
                    self.issue_subscribes(rooms);
                    self.trigger_flush();
                } else {
                    self.registry.disconnected();
                }
            }
            LinkEvent::SubscribeResult {
                room_id,
                epoch,
                result,
            } => self.subscribe_resolved(room_id, epoch, result),
            LinkEvent::Inbound { epoch, frame } => {
                if epoch != self.epoch {
                    tracing::debug!(epoch, current = self.epoch, "dropping frame from old epoch");
                    return;
                }
                let Some(room_id) = self.registry.room_for(frame.subscription, epoch) else {
                    tracing::debug!(
                        subscription = %frame.subscription,
                        "dropping frame on stale subscription"
                    );
                    return;
                };
                match InboundChatFrame::decode(&frame.body) {
                    Ok(InboundChatFrame::Message(message)) => {
                        if message.room_id != room_id {
                            tracing::warn!(
                                expected = %room_id,
                                got = %message.room_id,
                                "frame room does not match its subscription, discarding"
                            );
                            return;
                        }
                        self.ingest_message(message);
                    }
                    Ok(InboundChatFrame::Read(notice)) => self.ingest_read_notice(
                        room_id,
                        notice.user_id,
                    ),
                    Err(error) => {
                        tracing::warn!(category = error.category(), %error, "discarding inbound frame");
                    }
                }
            }
        }
    }

    // ---- inbound ----------------------------------------------------

    fn ingest_message(&mut self, frame: MessageFrame) {
        let room_id = frame.room_id;
        let from_other = frame.sender_user_id != self.identity.user_id;
        let unread_push = from_other && !frame.is_read;
        let state = self.rooms.entry(room_id).or_default();

        match merge::merge_confirmed(state, frame) {
            MergeOutcome::ConfirmedPending { local_seq, key, .. } => {
                if let Some(key) = key {
                    let _ = self.dispatcher.confirm(&key);
                }
                tracing::debug!(%room_id, local_seq, "pending message confirmed");
                self.events
                    .publish(ChatEvent::MessageConfirmed { room_id, local_seq });
                self.events.publish(ChatEvent::MessagesUpdated { room_id });
            }
            MergeOutcome::Inserted { index } => {
                let merged = state.messages.get(index).cloned();
                if unread_push {
                    state.unread_count = state.unread_count.saturating_add(1);
                    let unread = state.unread_count;
                    self.events
                        .publish(ChatEvent::UnreadChanged { room_id, unread });
                }
                if let Some(message) = merged {
                    self.events
                        .publish(ChatEvent::MessageReceived { room_id, message });
                }
                self.events.publish(ChatEvent::MessagesUpdated { room_id });
                self.events.publish(ChatEvent::RoomsUpdated);
                self.maybe_emit_receipt(room_id);
            }
            MergeOutcome::Duplicate => {}
        }
    }

    fn ingest_read_notice(&mut self, room_id: RoomId, reader: UserId) {
        let self_user = self.identity.user_id;
        let Some(state) = self.rooms.get_mut(&room_id) else {
            return;
        };
        let changed = merge::apply_read_notice(state, reader);
        state.recount_unread(self_user);
        let unread = state.unread_count;
        if changed {
            tracing::debug!(%room_id, %reader, "read notice applied");
            self.events.publish(ChatEvent::MessagesUpdated { room_id });
            self.events
                .publish(ChatEvent::UnreadChanged { room_id, unread });
        }
    }

    // ---- user operations --------------------------------------------

    fn load_rooms(&mut self) {
        if self.rooms_loading {
            return;
        }
        self.rooms_loading = true;
        let api = self.api.clone();
        let identity = self.identity;
        let size = self.config.room_page_size;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = match identity.role {
                SenderRole::Buyer => api
                    .rooms_for_buyer(identity.user_id, 0, size)
                    .await
                    .map(|page| page.content),
                SenderRole::Seller => match identity.shop_id {
                    Some(shop_id) => api
                        .rooms_for_seller(shop_id, 0, size)
                        .await
                        .map(|page| page.content),
                    None => Err(ChatError::InvalidIdentity(
                        "seller identity without a shop".to_string(),
                    )),
                },
            };
            let _ = tx.send(StoreCommand::RoomsFetched(result));
        });
    }

    fn rooms_fetched(&mut self, result: Result<Vec<RoomDto>, ChatError>) {
        self.rooms_loading = false;
        match result {
            Ok(dtos) => {
                let mut room_ids = Vec::with_capacity(dtos.len());
                for dto in dtos {
                    room_ids.push(dto.id);
                    self.ingest_room_dto(dto);
                }
                for room_id in room_ids {
                    self.ensure_subscription(room_id);
                }
                self.events.publish(ChatEvent::RoomsUpdated);
            }
            Err(error) => {
                tracing::warn!(category = error.category(), %error, "room list fetch failed");
                self.events.publish(ChatEvent::RoomsLoadFailed {
                    error: error.to_string(),
                });
            }
        }
    }

    fn ingest_room_dto(&mut self, dto: RoomDto) {
        let state = self.rooms.entry(dto.id).or_default();
        state.meta = Some(dto.room());
        // Local message state, once loaded, is the better truth for the
        // denormalized listing fields.
        if state.messages.is_empty() {
            if let Some(unread) = dto.unread_count {
                state.unread_count = unread;
            }
            state.last_message = dto.last_message.map(Message::from);
        }
    }

    fn load_messages(&mut self, room_id: RoomId) {
        let state = self.rooms.entry(room_id).or_default();
        if !state.begin_load() {
            return;
        }
        self.ensure_subscription(room_id);
        let api = self.api.clone();
        let size = self.config.message_page_size;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = api
                .messages(room_id, 0, size)
                .await
                .map(|page| page.content);
            let _ = tx.send(StoreCommand::MessagesFetched { room_id, result });
        });
    }

    fn messages_fetched(&mut self, room_id: RoomId, result: Result<Vec<MessageFrame>, ChatError>) {
        let self_user = self.identity.user_id;
        match result {
            Ok(frames) => {
                let Some(state) = self.rooms.get_mut(&room_id) else {
                    return;
                };
                let merged = merge::apply_history(state, frames);
                state.finish_load(true);
                state.recount_unread(self_user);
                tracing::debug!(%room_id, merged, "history loaded");
                self.events.publish(ChatEvent::MessagesUpdated { room_id });
                self.events.publish(ChatEvent::RoomsUpdated);
                self.maybe_emit_receipt(room_id);
            }
            Err(error) => {
                if let Some(state) = self.rooms.get_mut(&room_id) {
                    state.finish_load(false);
                }
                tracing::warn!(%room_id, category = error.category(), %error, "history fetch failed");
                self.events.publish(ChatEvent::MessagesLoadFailed {
                    room_id,
                    error: error.to_string(),
                });
            }
        }
    }

    fn set_active_room(&mut self, room_id: Option<RoomId>) {
        self.active_room = room_id;
        if let Some(room_id) = room_id {
            self.ensure_subscription(room_id);
            self.maybe_emit_receipt(room_id);
        }
    }

    fn send(
        &mut self,
        room_id: RoomId,
        content: String,
        attachments: Vec<String>,
        reply: oneshot::Sender<Message>,
    ) {
        let sender = self.identity.user_id;
        let role = self.identity.role;
        let state = self.rooms.entry(room_id).or_default();
        let local_seq = state.alloc_seq();
        let key = DedupKey::new(room_id, sender, &content, &attachments, local_seq);
        let frame = ChatSendFrame {
            room_id,
            sender_user_id: sender,
            role,
            content: content.clone(),
            attachments: attachments.clone(),
        };

        if self.dispatcher.enqueue_send(frame, key, Instant::now()) {
            let message = Message::pending(
                room_id,
                sender,
                role,
                content,
                attachments,
                local_seq,
                key,
            );
            state.messages.push(message.clone());
            state.refresh_last_message();
            let _ = reply.send(message);
            self.events.publish(ChatEvent::MessagesUpdated { room_id });
            self.events.publish(ChatEvent::RoomsUpdated);
            self.ensure_subscription(room_id);
            self.trigger_flush();
        } else {
            // Duplicate issue of an existing message; surface that one.
            let existing = state
                .messages
                .iter()
                .find(|m| m.dedup_key == Some(key))
                .cloned();
            let fallback = || {
                Message::pending(room_id, sender, role, content, attachments, local_seq, key)
            };
            let _ = reply.send(existing.unwrap_or_else(fallback));
        }
    }

    fn retry_message(&mut self, room_id: RoomId, local_seq: u64) {
        let sender_role = self.identity.role;
        let Some(state) = self.rooms.get_mut(&room_id) else {
            return;
        };
        let Some(message) = state.find_by_seq(local_seq) else {
            return;
        };
        if message.delivery != DeliveryState::Failed {
            return;
        }
        let Some(key) = message.dedup_key else {
            return;
        };
        let frame = ChatSendFrame {
            room_id,
            sender_user_id: message.sender_id,
            role: sender_role,
            content: message.content.clone(),
            attachments: message.attachments.clone(),
        };
        let accepted = self.dispatcher.enqueue_send(frame, key, Instant::now())
            || self.dispatcher.has_intent(&key);
        if !accepted {
            return;
        }
        message.delivery = DeliveryState::Pending;
        tracing::debug!(%room_id, local_seq, "failed message re-enqueued");
        self.events.publish(ChatEvent::MessagesUpdated { room_id });
        self.trigger_flush();
    }

    fn discard_message(&mut self, room_id: RoomId, local_seq: u64) {
        let Some(state) = self.rooms.get_mut(&room_id) else {
            return;
        };
        if merge::discard_failed(state, local_seq) {
            self.events.publish(ChatEvent::MessagesUpdated { room_id });
            self.events.publish(ChatEvent::RoomsUpdated);
        }
    }

    fn ensure_room(
        &mut self,
        shop_id: ShopId,
        order_id: Option<OrderId>,
        reply: oneshot::Sender<Result<Room, ChatError>>,
    ) {
        if self.identity.role != SenderRole::Buyer {
            let _ = reply.send(Err(ChatError::InvalidIdentity(
                "only buyers open rooms by shop".to_string(),
            )));
            return;
        }
        let api = self.api.clone();
        let buyer_id = self.identity.user_id;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = api.get_or_create_room(buyer_id, shop_id, order_id).await;
            let _ = tx.send(StoreCommand::RoomResolved { result, reply });
        });
    }

    fn room_resolved(
        &mut self,
        result: Result<RoomDto, ChatError>,
        reply: oneshot::Sender<Result<Room, ChatError>>,
    ) {
        match result {
            Ok(dto) => {
                let room = dto.room();
                self.ingest_room_dto(dto);
                self.ensure_subscription(room.id);
                self.events.publish(ChatEvent::RoomsUpdated);
                let _ = reply.send(Ok(room));
            }
            Err(error) => {
                let _ = reply.send(Err(error));
            }
        }
    }

    // ---- read receipts ----------------------------------------------

    fn maybe_emit_receipt(&mut self, room_id: RoomId) {
        let Some(state) = self.rooms.get(&room_id) else {
            return;
        };
        if self
            .tracker
            .receipt_needed(self.active_room, room_id, state)
            .is_none()
        {
            return;
        }
        self.emit_receipt(room_id);
    }

    fn emit_receipt(&mut self, room_id: RoomId) {
        let frame = ChatReadFrame {
            room_id,
            user_id: self.identity.user_id,
        };
        self.dispatcher.enqueue_mark_read(frame);
        if let Some(state) = self.rooms.get_mut(&room_id)
            && self.tracker.apply_optimistic(state)
        {
            self.events
                .publish(ChatEvent::UnreadChanged { room_id, unread: 0 });
            self.events.publish(ChatEvent::MessagesUpdated { room_id });
        }
        self.trigger_flush();
    }

    // ---- subscriptions ----------------------------------------------

    fn ensure_subscription(&mut self, room_id: RoomId) {
        if self.registry.ensure(room_id) {
            self.issue_subscribes(vec![room_id]);
        }
    }

    fn issue_subscribes(&self, rooms: Vec<RoomId>) {
        for room_id in rooms {
            self.conn.request_subscribe(room_topic(room_id), room_id);
        }
    }

    fn subscribe_resolved(
        &mut self,
        room_id: RoomId,
        epoch: u64,
        result: Result<SubscriptionHandle, ChatError>,
    ) {
        match result {
            Ok(handle) => match self.registry.subscribe_completed(room_id, handle) {
                crate::conn::SubscribeOutcome::Applied => {}
                crate::conn::SubscribeOutcome::Cancel => self.conn.unsubscribe(handle),
                crate::conn::SubscribeOutcome::Stale => {}
            },
            Err(error) => {
                tracing::debug!(%room_id, epoch, %error, "subscribe failed, deferring to reconnect");
                self.registry.subscribe_failed(room_id);
            }
        }
    }

    // ---- outbound flushing ------------------------------------------

    fn trigger_flush(&mut self) {
        if !self.conn_state.is_connected() {
            return;
        }
        if self.flushing {
            self.flush_dirty = true;
            return;
        }
        let drained = self.dispatcher.drain_ready(self.epoch);
        for key in drained.exhausted {
            self.fail_send(key);
        }
        if drained.dropped_reads > 0 {
            tracing::warn!(
                dropped = drained.dropped_reads,
                "read receipts dropped after retry limit"
            );
        }
        if drained.transmits.is_empty() {
            return;
        }
        self.flushing = true;
        let conn = self.conn.clone();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let mut results = Vec::with_capacity(drained.transmits.len());
            for transmit in drained.transmits {
                let outcome = conn.publish(transmit.destination, transmit.body).await;
                results.push((transmit.intent_id, transmit.room_id, outcome));
            }
            let _ = tx.send(StoreCommand::FlushCompleted(results));
        });
    }

    fn flush_completed(&mut self, results: Vec<(uuid::Uuid, RoomId, Result<(), ChatError>)>) {
        self.flushing = false;
        for (intent_id, room_id, outcome) in results {
            match outcome {
                Ok(()) => self.dispatcher.delivery_succeeded(intent_id),
                Err(error) => {
                    tracing::debug!(%room_id, %error, "transmission failed");
                    match self.dispatcher.delivery_failed(intent_id) {
                        Some(DeliveryFailure::SendExhausted(key)) => self.fail_send(key),
                        Some(DeliveryFailure::ReadExhausted) => {
                            tracing::warn!(%room_id, "read receipt dropped after retry limit");
                        }
                        Some(DeliveryFailure::Requeued) | None => {}
                    }
                }
            }
        }
        if self.flush_dirty {
            self.flush_dirty = false;
            self.trigger_flush();
        }
    }

    fn fail_send(&mut self, key: DedupKey) {
        let Some(state) = self.rooms.get_mut(&key.room_id) else {
            return;
        };
        if let Some(local_seq) = merge::mark_send_failed(state, &key) {
            tracing::warn!(room_id = %key.room_id, local_seq, "send failed after retries");
            self.events.publish(ChatEvent::SendFailed {
                room_id: key.room_id,
                local_seq,
            });
            self.events.publish(ChatEvent::MessagesUpdated {
                room_id: key.room_id,
            });
        }
    }

    // ---- snapshots --------------------------------------------------

    fn room_summaries(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|(room_id, state)| RoomSummary {
                room_id: *room_id,
                meta: state.meta.clone(),
                last_message: state.last_message.clone(),
                unread_count: state.unread_count,
                load: state.load,
            })
            .collect();
        // Most recently active rooms first, matching the listing UI.
        summaries.sort_by(|a, b| {
            let at = a.last_message.as_ref().map(|m| m.created_at);
            let bt = b.last_message.as_ref().map(|m| m.created_at);
            bt.cmp(&at).then_with(|| a.room_id.cmp(&b.room_id))
        });
        summaries
    }
}
