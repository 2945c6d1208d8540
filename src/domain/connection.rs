//! Connection lifecycle state.

use serde::Serialize;

/// Lifecycle state of the single transport connection.
///
/// Transitions are driven only by the connection manager; every other
/// component observes the state and never manipulates the transport
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no attempts scheduled. Initial state, and the
    /// terminal state after an explicit close.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Transport established and usable.
    Connected,
    /// Connection lost; retrying with backoff.
    Reconnecting,
    /// Retry budget exhausted; automatic attempts stopped until the
    /// connection is explicitly reopened.
    Failed,
}

impl ConnectionState {
    /// Returns `true` while the transport can carry frames.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns the state as a static string slice for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}
