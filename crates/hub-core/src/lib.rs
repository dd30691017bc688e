//! # hub-core
//!
//! Shared state of the hub: live connections, topic membership, and event
//! fan-out.
//!
//! - [`ConnectionRegistry`]: connections plus the topic subscription index,
//!   guarded by a single critical section
//! - [`Broadcaster`]: builds event envelopes and publishes them to subscribers
//! - [`Topic`]: the fixed set of event topics clients may subscribe to

#![deny(unsafe_code)]

pub mod broadcast;
pub mod connection;
pub mod error;
pub mod event;
pub mod ids;
pub mod registry;
pub mod topic;

pub use broadcast::Broadcaster;
pub use connection::Connection;
pub use error::HubError;
pub use event::EventEnvelope;
pub use ids::ConnectionId;
pub use registry::{ConnectionHandle, ConnectionRegistry, DeliveryReport};
pub use topic::Topic;
