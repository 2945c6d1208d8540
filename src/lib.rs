//! # marketplace-chat
//!
//! Real-time buyer-to-seller conversation client for the marketplace
//! messaging backend.
//!
//! The crate owns one persistent bidirectional channel to the backend
//! broker, multiplexed across many conversation rooms. It survives
//! disconnects with bounded exponential backoff, rebuilds room
//! subscriptions transparently across reconnects, deduplicates and
//! retries outbound sends, and merges optimistic local messages with
//! server-confirmed state while tracking read position.
//!
//! ## Architecture
//!
//! ```text
//! UI collaborators
//!     │
//!     ├── ChatClient (client)
//!     │
//!     ├── ConversationStore actor (store/)
//!     │       ├── SubscriptionRegistry (conn/)
//!     │       ├── OutboundDispatcher (dispatch)
//!     │       └── ReadTracker (store/)
//!     │
//!     ├── ConnectionManager (conn/)
//!     │       └── Transport / WsTransport (transport/)
//!     │
//!     └── ChatApi, REST room list & history (api/)
//! ```
//!
//! All store mutation runs on a single actor task; inbound frames,
//! connection events, and user intents are processed sequentially, so
//! the merge logic needs no locking and is driven from one intake
//! point.

pub mod api;
pub mod client;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod store;
pub mod transport;

pub use client::ChatClient;
pub use config::ChatConfig;
pub use domain::{ChatEvent, ChatIdentity, ConnectionState};
pub use error::ChatError;
