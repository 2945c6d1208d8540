//! Connection layer: transport ownership, reconnection, subscriptions.
//!
//! [`ConnectionManager`] exclusively owns the live transport link and
//! drives the connection lifecycle with bounded exponential backoff.
//! [`SubscriptionRegistry`] tracks which rooms are of interest and
//! rebuilds their subscriptions transparently across reconnects.

pub mod manager;
pub mod registry;

pub use manager::{ConnectionManager, ReconnectPolicy, SubscriptionHandle};
pub use registry::{SubscribeOutcome, SubscriptionRegistry};
