//! Forwarding table published to the relaying component

use crate::routing::flow_state::{Address, PortId, QosId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One next hop toward a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NextHop {
    /// QoS class the hop was computed for
    pub qos_id: QosId,
    /// Local N-1 port
    pub port_id: PortId,
}

/// Route to one destination for one QoS class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTableEntry {
    /// Destination address
    pub destination: Address,
    /// QoS class
    pub qos_id: QosId,
    /// Total path weight
    pub cost: u64,
    /// Equal-cost first-hop ports, ascending
    pub next_hops: Vec<PortId>,
    /// Loop-free alternate ports, ascending
    pub alternates: Vec<PortId>,
}

/// Immutable destination to next-hop mapping
///
/// A table is built once from a complete set of routes and never mutated;
/// readers hold an `Arc` to whichever table was current when they asked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardingTable {
    generation: u64,
    routes: Vec<RoutingTableEntry>,
    next_hops: BTreeMap<Address, Vec<NextHop>>,
}

impl ForwardingTable {
    /// Table with no routes
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from computed routes
    ///
    /// `generation` is the database generation the routes were computed from.
    pub fn from_routes(generation: u64, mut routes: Vec<RoutingTableEntry>) -> Self {
        routes.sort_by_key(|r| (r.destination, r.qos_id));

        let mut next_hops: BTreeMap<Address, Vec<NextHop>> = BTreeMap::new();
        for route in &routes {
            let hops = next_hops.entry(route.destination).or_default();
            hops.extend(route.next_hops.iter().map(|&port_id| NextHop {
                qos_id: route.qos_id,
                port_id,
            }));
        }
        for hops in next_hops.values_mut() {
            hops.sort();
            hops.dedup();
        }

        Self {
            generation,
            routes,
            next_hops,
        }
    }

    /// Database generation this table reflects
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Every destination with its next hops, ordered by destination
    pub fn entries(&self) -> impl Iterator<Item = (Address, &[NextHop])> + '_ {
        self.next_hops
            .iter()
            .map(|(destination, hops)| (*destination, hops.as_slice()))
    }

    /// Next hops toward `destination`, empty if unreachable
    pub fn lookup(&self, destination: Address) -> &[NextHop] {
        self.next_hops
            .get(&destination)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The route toward `destination` for one QoS class
    pub fn route(&self, destination: Address, qos_id: QosId) -> Option<&RoutingTableEntry> {
        self.routes
            .binary_search_by_key(&(destination, qos_id), |r| (r.destination, r.qos_id))
            .ok()
            .map(|idx| &self.routes[idx])
    }

    /// Ports toward `destination` for one QoS class
    pub fn ports(&self, destination: Address, qos_id: QosId) -> &[PortId] {
        self.route(destination, qos_id)
            .map(|r| r.next_hops.as_slice())
            .unwrap_or(&[])
    }

    /// Loop-free alternates toward `destination` for one QoS class
    pub fn alternates(&self, destination: Address, qos_id: QosId) -> &[PortId] {
        self.route(destination, qos_id)
            .map(|r| r.alternates.as_slice())
            .unwrap_or(&[])
    }

    /// All routes, ordered by destination then QoS
    pub fn routes(&self) -> &[RoutingTableEntry] {
        &self.routes
    }

    /// Number of reachable destinations
    pub fn len(&self) -> usize {
        self.next_hops.len()
    }

    /// Whether no destination is reachable
    pub fn is_empty(&self) -> bool {
        self.next_hops.is_empty()
    }
}

/// Receives every newly computed forwarding table
///
/// Implemented by the relaying component. Called from the recomputation
/// path, so implementations must not block.
pub trait ForwardingTableSink: Send + Sync {
    /// A new table replaced the previous one
    fn forwarding_table_updated(&self, table: Arc<ForwardingTable>);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(destination: Address, qos_id: QosId, ports: &[PortId]) -> RoutingTableEntry {
        RoutingTableEntry {
            destination,
            qos_id,
            cost: 1,
            next_hops: ports.to_vec(),
            alternates: Vec::new(),
        }
    }

    #[test]
    fn test_lookup_merges_qos_classes() {
        let table = ForwardingTable::from_routes(
            3,
            vec![route(5, 2, &[4]), route(5, 1, &[2, 4]), route(6, 1, &[1])],
        );

        assert_eq!(table.generation(), 3);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.lookup(5),
            &[
                NextHop { qos_id: 1, port_id: 2 },
                NextHop { qos_id: 1, port_id: 4 },
                NextHop { qos_id: 2, port_id: 4 },
            ]
        );
        assert_eq!(table.ports(5, 2), &[4]);
        assert!(table.lookup(9).is_empty());
        assert!(table.route(6, 2).is_none());
    }

    #[test]
    fn test_entries_ordered_by_destination() {
        let table =
            ForwardingTable::from_routes(0, vec![route(9, 1, &[1]), route(2, 1, &[3])]);
        let destinations: Vec<Address> = table.entries().map(|(d, _)| d).collect();
        assert_eq!(destinations, vec![2, 9]);
    }

    #[test]
    fn test_empty_table() {
        let table = ForwardingTable::empty();
        assert!(table.is_empty());
        assert_eq!(table.entries().count(), 0);
        assert!(table.alternates(1, 1).is_empty());
    }
}
