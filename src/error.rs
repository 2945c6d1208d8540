//! Client error types for the conversation core.
//!
//! [`ChatError`] is the central error type. Variants follow the failure
//! taxonomy of the messaging layer: transport errors are recovered
//! automatically by the connection manager and never surface as fatal,
//! protocol errors discard the offending frame, and send failures are
//! surfaced per-message through its delivery state.

/// Client-side error enum for the conversation core.
///
/// # Taxonomy
///
/// | Category  | Variants                          | Recovery                      |
/// |-----------|-----------------------------------|-------------------------------|
/// | Transport | `Transport`, `NotConnected`       | automatic reconnect           |
/// | Protocol  | `Protocol`                        | frame discarded, logged       |
/// | REST      | `Http`, `Api`                     | room stays `LoadFailed`       |
/// | Local     | `InvalidIdentity`, `ChannelClosed` | caller bug or shutdown       |
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The underlying transport failed (connection drop, handshake failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// An operation required a live connection but none is established.
    #[error("not connected to the messaging backend")]
    NotConnected,

    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    Protocol(String),

    /// The REST collaborator request failed at the HTTP layer.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The REST collaborator returned a non-success status.
    #[error("api error: status {status}: {message}")]
    Api {
        /// HTTP status code returned by the backend.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The configured identity cannot perform the operation (e.g. a
    /// seller identity without a shop id).
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// The store or connection task has shut down.
    #[error("conversation core has shut down")]
    ChannelClosed,
}

impl ChatError {
    /// Returns `true` if the failure is expected to clear on its own
    /// (connectivity) or through an ordinary user retry (REST fetch).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::NotConnected | Self::Http(_) | Self::Api { .. }
        )
    }

    /// Returns the taxonomy category as a static string, used as a
    /// structured logging field.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) | Self::NotConnected => "transport",
            Self::Protocol(_) => "protocol",
            Self::Http(_) | Self::Api { .. } => "rest",
            Self::InvalidIdentity(_) | Self::ChannelClosed => "local",
        }
    }
}
