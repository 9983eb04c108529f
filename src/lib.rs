//! # ipcp-routing
//!
//! Link-state routing subsystem for the IPC Processes of a recursive
//! network architecture.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ipcp_routing::{LinkStatePolicy, MemoryFabric, RoutingConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fabric = MemoryFabric::new();
//!     let (endpoint, inbox) = fabric.endpoint(1);
//!
//!     let policy = LinkStatePolicy::builder()
//!         .with_address(1)
//!         .with_config(RoutingConfig::default().with_loop_free_alternates(true))
//!         .with_transport(Arc::new(endpoint))
//!         .build()?;
//!     policy.attach_inbox(inbox);
//!     policy.start()?;
//!
//!     policy.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod api;
pub mod error;
pub mod network;
pub mod protocol;
pub mod routing;

// Re-export main types
pub use api::{
    AdjacencyEvent, EventHandlers, LinkModel, LinkWeights, RoutingConfig, RoutingEvent,
    SubscriptionHandle,
};
pub use error::{ConfigError, Error, NetworkError, ProtocolError, Result, RoutingError};
pub use network::{InMemoryTree, ManagementTree, MemoryFabric, NeighborTransport};
pub use protocol::{FlowStateRecord, RoutingMessage};
pub use routing::{
    Address, EcmpDijkstra, FlowStateDatabase, FlowStateObject, ForwardingTable,
    ForwardingTableSink, LinkStatePolicy, LinkStatePolicyBuilder, LoopFreeAlternates, PortId,
    PullOutcome, RoutingAlgorithm,
};
