//! Link-state routing for an IPC Process
//!
//! Every node describes its own adjacencies as flow state objects, floods
//! them to its neighbors and keeps a replica of everybody else's in a flow
//! state database. From that replica it computes shortest paths and
//! publishes a forwarding table.
//!
//! # Architecture
//!
//! - **FlowStateDatabase**: versioned store of flow state objects, with
//!   aging, withdrawal and flood bookkeeping
//! - **Dissemination**: split-horizon batching of outgoing changes, intake of
//!   remote records and full-state pulls during enrollment
//! - **RoutingAlgorithm**: ECMP Dijkstra, optionally with loop-free
//!   alternates, over a [`RoutingGraph`] built per QoS class
//! - **LinkStatePolicy**: the orchestrator reacting to adjacency events,
//!   messages, management tree writes and periodic ticks
//!
//! # Example
//!
//! ```no_run
//! use ipcp_routing::network::MemoryFabric;
//! use ipcp_routing::routing::LinkStatePolicy;
//! use std::sync::Arc;
//!
//! # async fn example() -> ipcp_routing::error::Result<()> {
//! let fabric = MemoryFabric::new();
//! let (endpoint, inbox) = fabric.endpoint(1);
//!
//! let policy = LinkStatePolicy::builder()
//!     .with_address(1)
//!     .with_transport(Arc::new(endpoint))
//!     .build()?;
//! policy.attach_inbox(inbox);
//! policy.start()?;
//!
//! policy.adjacency_up(2, 1, 1)?;
//! let table = policy.current_forwarding_table();
//! # let _ = table;
//! # Ok(())
//! # }
//! ```
//!
//! # Timing
//!
//! Three background tasks drive a running policy: the aging tick, the
//! propagation tick and the recomputation worker. Recomputations requested
//! while one is running are coalesced into a single follow-up run.

mod algorithm;
mod database;
mod dissemination;
mod flow_state;
mod forwarding_table;
mod graph;
mod policy;
mod scheduler;

pub use algorithm::{EcmpDijkstra, LoopFreeAlternates, RoutingAlgorithm};
pub use database::{FlowStateDatabase, FlowStateSnapshot, PendingFlood, UpdateOutcome};
pub use dissemination::{
    batch_objects, build_outgoing_update, on_remote_update, OutgoingUpdate, PullOutcome,
    RemoteUpdateReport,
};
pub use flow_state::{
    Address, FlowState, FlowStateObject, FsoKey, PortId, QosId, SequenceNumber, DEFAULT_QOS_ID,
    OBJECT_NAME_PREFIX,
};
pub use forwarding_table::{ForwardingTable, ForwardingTableSink, NextHop, RoutingTableEntry};
pub use graph::RoutingGraph;
pub use policy::{AdjacencyState, LinkStatePolicy, LinkStatePolicyBuilder};
pub use scheduler::SchedulerHandle;
