//! Configuration and notification surface of the routing subsystem

pub mod config;
pub mod events;

pub use config::{LinkModel, LinkWeights, RoutingConfig};
pub use events::{AdjacencyEvent, EventHandlers, RoutingEvent, SubscriptionHandle};
