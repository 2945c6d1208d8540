//! Transport layer: the wire schema and the channel to the broker.
//!
//! [`Transport`] is the factory seam the connection manager dials
//! through; each successful dial yields a [`TransportLink`], the live
//! bidirectional channel. Production uses the websocket implementation;
//! tests drive the core with a scripted in-memory transport.

pub mod frame;
pub mod websocket;

use std::fmt;

use async_trait::async_trait;

use crate::error::ChatError;

pub use websocket::WsTransport;

/// Identifier of one subscription on one live link.
///
/// Ids are client-assigned and unique only within their link; the
/// connection epoch disambiguates across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wraps a raw subscription id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inbound envelope frame delivered on a live link.
#[derive(Debug, Clone)]
pub struct ServerFrame {
    /// The subscription the payload arrived on.
    pub subscription: SubscriptionId,
    /// The topic it was published on.
    pub topic: String,
    /// JSON payload.
    pub body: serde_json::Value,
}

/// Factory for live links to the messaging backend.
///
/// The connection manager owns one `Transport` and dials it on every
/// (re)connect attempt.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    /// Establishes a new link.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] when the dial or handshake
    /// fails; the connection manager schedules a backed-off retry.
    async fn connect(&self) -> Result<Box<dyn TransportLink>, ChatError>;
}

/// One live, message-framed, bidirectional channel to the broker.
///
/// Exclusively owned by the connection manager; all other components
/// reach the wire through its command channel.
#[async_trait]
pub trait TransportLink: fmt::Debug + Send {
    /// Opens a subscription to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] if the frame cannot be sent.
    async fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId, ChatError>;

    /// Closes a subscription previously opened on this link.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] if the frame cannot be sent.
    async fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), ChatError>;

    /// Publishes a payload to an application destination.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] if the frame cannot be sent.
    async fn publish(
        &mut self,
        destination: &str,
        body: serde_json::Value,
    ) -> Result<(), ChatError>;

    /// Waits for the next inbound frame.
    ///
    /// `None` means the link is gone (peer close or fatal transport
    /// error) and the connection manager should start reconnecting.
    /// `Some(Err(..))` carries a per-frame protocol error: the caller
    /// logs it, discards the frame, and keeps the link.
    async fn next_frame(&mut self) -> Option<Result<ServerFrame, ChatError>>;

    /// Closes the link gracefully.
    async fn close(&mut self);
}
