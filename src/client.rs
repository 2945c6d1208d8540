//! The public facade wiring configuration, transport, API, and store.
//!
//! A [`ChatClient`] is an explicit, constructed instance with a
//! process-wide lifecycle: [`ChatClient::open`] at startup,
//! [`ChatClient::close`] at shutdown. Multiple isolated instances can
//! coexist (each owns its connection and store), which is what makes
//! the core testable against scripted transports.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::api::ChatApi;
use crate::config::ChatConfig;
use crate::conn::{ConnectionManager, ReconnectPolicy};
use crate::domain::{
    ChatEvent, ChatIdentity, ConnectionState, EventBus, Message, OrderId, Room, RoomId, ShopId,
};
use crate::error::ChatError;
use crate::store::RoomSummary;
use crate::store::core::{StoreCommand, StoreCore};
use crate::transport::{Transport, WsTransport};

/// Client for the real-time conversation layer.
///
/// Cheap to clone; all clones share the same connection and store.
#[derive(Debug, Clone)]
pub struct ChatClient {
    cmd_tx: mpsc::UnboundedSender<StoreCommand>,
    conn: ConnectionManager,
    events: EventBus,
}

impl ChatClient {
    /// Creates a client over the production websocket transport and
    /// REST API from `config`.
    #[must_use]
    pub fn new(config: ChatConfig, identity: ChatIdentity) -> Self {
        let transport = Arc::new(WsTransport::new(
            config.ws_url.clone(),
            config.heartbeat_interval(),
        ));
        let api = ChatApi::new(config.api_base_url.clone());
        Self::with_parts(config, identity, transport, api)
    }

    /// Creates a client over an explicit transport and API client.
    ///
    /// This is the seam tests use to drive the core with a scripted
    /// in-memory transport.
    #[must_use]
    pub fn with_parts(
        config: ChatConfig,
        identity: ChatIdentity,
        transport: Arc<dyn Transport>,
        api: ChatApi,
    ) -> Self {
        let policy = ReconnectPolicy {
            base_delay: std::time::Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: std::time::Duration::from_millis(config.reconnect_max_delay_ms),
            max_attempts: config.reconnect_max_attempts,
        };
        let events = EventBus::new(config.event_bus_capacity);
        let (conn, link_rx) = ConnectionManager::spawn(transport, policy);
        let cmd_tx = StoreCore::spawn(
            identity,
            config,
            api,
            conn.clone(),
            events.clone(),
            link_rx,
        );
        Self {
            cmd_tx,
            conn,
            events,
        }
    }

    /// Begins connection attempts to the messaging backend.
    pub fn open(&self) {
        self.conn.open();
    }

    /// Tears the connection down and stops retrying until the next
    /// [`Self::open`]. Cached state and queued intents are kept.
    pub fn close(&self) {
        self.conn.close();
    }

    /// Stops the store task and closes the connection. The client is
    /// unusable afterwards.
    pub fn shutdown(self) {
        let _ = self.cmd_tx.send(StoreCommand::Shutdown);
    }

    /// Returns the current connection lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Subscribes to store events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Fetches (or refreshes) the room list for the configured
    /// identity. Completion is signalled through
    /// [`ChatEvent::RoomsUpdated`] or [`ChatEvent::RoomsLoadFailed`].
    pub fn load_rooms(&self) {
        let _ = self.cmd_tx.send(StoreCommand::LoadRooms);
    }

    /// Fetches (or refreshes) a room's history. Re-entrant calls while
    /// a fetch is in flight are coalesced. Completion is signalled
    /// through [`ChatEvent::MessagesUpdated`] or
    /// [`ChatEvent::MessagesLoadFailed`].
    pub fn load_messages(&self, room_id: RoomId) {
        let _ = self.cmd_tx.send(StoreCommand::LoadMessages(room_id));
    }

    /// Moves the active-room pointer. The active room drives
    /// subscription pre-warming and read-receipt emission.
    pub fn set_active_room(&self, room_id: Option<RoomId>) {
        let _ = self.cmd_tx.send(StoreCommand::SetActiveRoom(room_id));
    }

    /// Sends a message, returning the optimistic pending entry
    /// immediately. Delivery progress is surfaced through events and
    /// the message's delivery state in later snapshots.
    ///
    /// # Errors
    ///
    /// [`ChatError::ChannelClosed`] when the store has shut down.
    pub async fn send(
        &self,
        room_id: RoomId,
        content: impl Into<String>,
        attachments: Vec<String>,
    ) -> Result<Message, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(StoreCommand::Send {
                room_id,
                content: content.into(),
                attachments,
                reply,
            })
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)
    }

    /// Emits a read receipt for a room and zeroes its unread counter
    /// immediately, regardless of network state.
    pub fn mark_read(&self, room_id: RoomId) {
        let _ = self.cmd_tx.send(StoreCommand::MarkRead(room_id));
    }

    /// Re-enqueues a failed message for transmission.
    pub fn retry_message(&self, room_id: RoomId, local_seq: u64) {
        let _ = self
            .cmd_tx
            .send(StoreCommand::RetryMessage { room_id, local_seq });
    }

    /// Removes a failed message the user chose to discard.
    pub fn discard_message(&self, room_id: RoomId, local_seq: u64) {
        let _ = self
            .cmd_tx
            .send(StoreCommand::DiscardMessage { room_id, local_seq });
    }

    /// Looks up or creates the room with a shop (buyer identities
    /// only), optionally tied to an order.
    ///
    /// # Errors
    ///
    /// [`ChatError::InvalidIdentity`] for seller identities,
    /// [`ChatError::Http`] / [`ChatError::Api`] when the lookup fails,
    /// [`ChatError::ChannelClosed`] when the store has shut down.
    pub async fn ensure_room(
        &self,
        shop_id: ShopId,
        order_id: Option<OrderId>,
    ) -> Result<Room, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(StoreCommand::EnsureRoom {
                shop_id,
                order_id,
                reply,
            })
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)?
    }

    /// Withdraws interest in a room's inbound delivery. Cached state
    /// and queued intents for the room are kept.
    pub fn release_room(&self, room_id: RoomId) {
        let _ = self.cmd_tx.send(StoreCommand::ReleaseRoom(room_id));
    }

    /// Snapshots the room list, most recently active first.
    pub async fn rooms(&self) -> Vec<RoomSummary> {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(StoreCommand::Rooms { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Snapshots a room's ordered message list.
    pub async fn messages(&self, room_id: RoomId) -> Vec<Message> {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(StoreCommand::Messages { room_id, reply })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}
