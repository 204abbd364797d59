//! # vigil-realtime
//!
//! Real-time delivery for the Vigil dashboard core.
//!
//! - [`ConnectionManager`]: the single WebSocket, with heartbeat, jittered
//!   exponential reconnect and liveness checks
//! - [`EventBus`]: in-process pub/sub keyed by event type, with a `*` wildcard
//! - [`MessageStore`]: TTL- and capacity-bounded buffer that republishes to the bus
//! - [`subscriptions`]: entity-scoped, projected subscriptions for UI consumers
//! - [`RealtimeContext`]: the three above, wired together

#![deny(unsafe_code)]

pub mod bus;
pub mod connection;
pub mod context;
pub mod store;
pub mod subscriptions;

pub use bus::{EventBus, EventStream, SubscribeOptions, SubscriptionHandle};
pub use connection::{
    ConnectionError, ConnectionHandlers, ConnectionManager, ConnectionState, ConnectionStatus,
};
pub use context::RealtimeContext;
pub use store::MessageStore;
pub use subscriptions::{
    DiscoveryProgress, Notification, ProjectedEvent, ScanProgress, ScopedSubscription,
    node_discovery_subscription, node_scan_subscription, notification_subscription,
};
