//! Client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`) under the `CHAT_` prefix. Every knob
//! falls back to a default matching the backend's development setup.

use std::time::Duration;

/// Top-level configuration for the conversation client.
///
/// Loaded once at startup via [`ChatConfig::from_env`], or built with
/// [`ChatConfig::default`] in tests.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// WebSocket endpoint of the messaging backend.
    pub ws_url: String,

    /// Base URL of the collaborator REST API (room list / history).
    pub api_base_url: String,

    /// Initial reconnect delay in milliseconds. Doubles per failed
    /// attempt up to [`Self::reconnect_max_delay_ms`].
    pub reconnect_base_delay_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds.
    pub reconnect_max_delay_ms: u64,

    /// Consecutive failed attempts after which the connection parks in
    /// the failed state until explicitly reopened.
    pub reconnect_max_attempts: u32,

    /// Duration of the outbound deduplication window in milliseconds.
    pub dedup_window_ms: u64,

    /// Transmission attempts per outbound intent before the associated
    /// message is marked failed.
    pub send_retry_limit: u32,

    /// Seconds between heartbeat pings on the websocket transport.
    pub heartbeat_interval_secs: u64,

    /// Capacity of the event-bus broadcast channel.
    pub event_bus_capacity: usize,

    /// Page size for room-list fetches.
    pub room_page_size: u32,

    /// Page size for room-history fetches.
    pub message_page_size: u32,
}

impl ChatConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to development defaults when a variable is not set or
    /// does not parse. Calls `dotenvy::dotenv().ok()` to optionally load
    /// a `.env` file.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            ws_url: std::env::var("CHAT_WS_URL")
                .unwrap_or_else(|_| "ws://localhost:8080/api/ws-chat".to_string()),
            api_base_url: std::env::var("CHAT_API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080/api".to_string()),
            reconnect_base_delay_ms: parse_env("CHAT_RECONNECT_BASE_DELAY_MS", 1_000),
            reconnect_max_delay_ms: parse_env("CHAT_RECONNECT_MAX_DELAY_MS", 30_000),
            reconnect_max_attempts: parse_env("CHAT_RECONNECT_MAX_ATTEMPTS", 5),
            dedup_window_ms: parse_env("CHAT_DEDUP_WINDOW_MS", 2_000),
            send_retry_limit: parse_env("CHAT_SEND_RETRY_LIMIT", 3),
            heartbeat_interval_secs: parse_env("CHAT_HEARTBEAT_INTERVAL_SECS", 10),
            event_bus_capacity: parse_env("CHAT_EVENT_BUS_CAPACITY", 1_024),
            room_page_size: parse_env("CHAT_ROOM_PAGE_SIZE", 20),
            message_page_size: parse_env("CHAT_MESSAGE_PAGE_SIZE", 50),
        }
    }

    /// Returns the dedup window as a [`Duration`].
    #[must_use]
    pub const fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// Returns the heartbeat interval as a [`Duration`].
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8080/api/ws-chat".to_string(),
            api_base_url: "http://localhost:8080/api".to_string(),
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: 5,
            dedup_window_ms: 2_000,
            send_retry_limit: 3,
            heartbeat_interval_secs: 10,
            event_bus_capacity: 1_024,
            room_page_size: 20,
            message_page_size: 50,
        }
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
