//! Domain layer: identifiers, rooms, messages, dedup keys, and events.
//!
//! This module contains the client-side data model: typed ids over the
//! backend's numeric identifiers, the message and room aggregates with
//! their delivery lifecycle, first-class deduplication keys, and the
//! event system observers subscribe to.

pub mod connection;
pub mod dedup;
pub mod event;
pub mod event_bus;
pub mod ids;
pub mod message;
pub mod room;

pub use connection::ConnectionState;
pub use dedup::{DedupKey, DedupWindow};
pub use event::ChatEvent;
pub use event_bus::EventBus;
pub use ids::{MessageId, OrderId, RoomId, ShopId, UserId};
pub use message::{DeliveryState, Message, SenderRole};
pub use room::{ChatIdentity, Room};
