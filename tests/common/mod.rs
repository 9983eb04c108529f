//! Common test helpers and utilities
//!
//! A `Cluster` runs several policies in one process, wired together through
//! a `MemoryFabric`. Tests run with paused time, so `settle` fast-forwards
//! through propagation and aging ticks.

#![allow(dead_code)]

use ipcp_routing::network::{InMemoryTree, ManagementTree, MemoryFabric, NeighborTransport};
use ipcp_routing::routing::{
    Address, ForwardingTable, ForwardingTableSink, LinkStatePolicy, PortId,
};
use ipcp_routing::{RoutingConfig, RoutingEvent};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Sink keeping every table it was handed
#[derive(Default)]
pub struct RecordingSink {
    tables: Mutex<Vec<Arc<ForwardingTable>>>,
}

impl RecordingSink {
    /// Number of tables received
    pub fn count(&self) -> usize {
        self.tables.lock().len()
    }

    /// Most recent table
    pub fn latest(&self) -> Option<Arc<ForwardingTable>> {
        self.tables.lock().last().cloned()
    }
}

impl ForwardingTableSink for RecordingSink {
    fn forwarding_table_updated(&self, table: Arc<ForwardingTable>) {
        self.tables.lock().push(table);
    }
}

/// One node of a cluster
pub struct TestNode {
    pub policy: Arc<LinkStatePolicy>,
    pub tree: Arc<InMemoryTree>,
    pub sink: Arc<RecordingSink>,
    pub events: Arc<Mutex<Vec<RoutingEvent>>>,
}

/// Policies connected through one in-memory fabric
pub struct Cluster {
    pub fabric: MemoryFabric,
    config: RoutingConfig,
    nodes: BTreeMap<Address, TestNode>,
}

impl Cluster {
    /// Create and start one policy per address
    pub fn start(addresses: &[Address], config: RoutingConfig) -> Self {
        let mut cluster = Self {
            fabric: MemoryFabric::new(),
            config,
            nodes: BTreeMap::new(),
        };
        for &address in addresses {
            cluster.add_node(address);
        }
        cluster
    }

    /// Create and start one more policy
    pub fn add_node(&mut self, address: Address) -> &TestNode {
        let (endpoint, inbox) = self.fabric.endpoint(address);
        let tree = Arc::new(InMemoryTree::new());
        let sink = Arc::new(RecordingSink::default());

        let policy = LinkStatePolicy::builder()
            .with_address(address)
            .with_config(self.config.clone())
            .with_transport(Arc::new(endpoint) as Arc<dyn NeighborTransport>)
            .with_management_tree(Arc::clone(&tree) as Arc<dyn ManagementTree>)
            .with_forwarding_sink(Arc::clone(&sink) as Arc<dyn ForwardingTableSink>)
            .build()
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        policy.subscribe(move |event| events_clone.lock().push(event));

        policy.attach_inbox(inbox);
        policy.start().unwrap();

        self.nodes.insert(
            address,
            TestNode {
                policy,
                tree,
                sink,
                events,
            },
        );
        &self.nodes[&address]
    }

    pub fn node(&self, address: Address) -> &TestNode {
        &self.nodes[&address]
    }

    pub fn policy(&self, address: Address) -> &Arc<LinkStatePolicy> {
        &self.node(address).policy
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.nodes.keys().copied().collect()
    }

    /// Wire `a:port_a <-> b:port_b` and bring the adjacency up on both ends
    pub fn link(&self, a: Address, port_a: PortId, b: Address, port_b: PortId) {
        self.fabric.connect(a, port_a, b, port_b);
        self.policy(a).adjacency_up(b, port_a, port_b).unwrap();
        self.policy(b).adjacency_up(a, port_b, port_a).unwrap();
    }

    /// Cut the link at `a:port_a` and take the adjacency down on both ends
    pub fn unlink(&self, a: Address, port_a: PortId, b: Address, port_b: PortId) {
        self.fabric.disconnect(a, port_a);
        self.policy(a).adjacency_down(port_a).unwrap();
        self.policy(b).adjacency_down(port_b).unwrap();
    }

    /// Stop a node without telling its neighbors
    pub async fn silence(&self, address: Address) {
        self.fabric.unregister(address);
        self.policy(address).shutdown().await;
    }

    pub async fn shutdown(&self) {
        for node in self.nodes.values() {
            node.policy.shutdown().await;
        }
    }
}

/// Short periods so tests cover many ticks quickly
pub fn fast_config() -> RoutingConfig {
    RoutingConfig::default()
        .with_age_tick_ms(100)
        .with_propagation_ms(20)
}

/// Let paused time run forward
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// First-hop ports and cost from `table` toward `destination` on the default QoS
pub fn route_of(table: &ForwardingTable, destination: Address) -> Option<(Vec<PortId>, u64)> {
    table
        .route(destination, ipcp_routing::routing::DEFAULT_QOS_ID)
        .map(|r| (r.next_hops.clone(), r.cost))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_config_is_valid() {
        assert!(fast_config().validate().is_ok());
    }
}
