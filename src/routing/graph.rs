//! Weighted topology graph built from a database snapshot

use crate::api::config::LinkModel;
use crate::routing::database::FlowStateSnapshot;
use crate::routing::flow_state::{Address, FlowStateObject, PortId, QosId};
use std::collections::{BTreeMap, BTreeSet};

/// Directed graph of usable adjacencies for one QoS class
///
/// Parallel links between the same pair of nodes collapse into one edge
/// with the minimum weight; the ports achieving that weight are kept.
#[derive(Debug, Clone, Default)]
pub struct RoutingGraph {
    qos_id: QosId,
    edges: BTreeMap<Address, BTreeMap<Address, Edge>>,
}

#[derive(Debug, Clone)]
struct Edge {
    weight: u64,
    ports: Vec<PortId>,
}

impl RoutingGraph {
    /// Build the graph for `qos_id` from a snapshot
    ///
    /// Only UP objects eligible for `qos_id` contribute. Each object weighs
    /// its cost times `multiplier`, never less than 1.
    pub fn build(
        snapshot: &FlowStateSnapshot,
        qos_id: QosId,
        multiplier: u64,
        model: LinkModel,
    ) -> Self {
        let usable: Vec<&FlowStateObject> = snapshot
            .iter()
            .filter(|o| o.is_up() && o.serves_qos(qos_id))
            .collect();

        let announced: BTreeSet<(Address, Address)> = usable
            .iter()
            .map(|o| (o.address, o.neighbor_address))
            .collect();

        let mut graph = Self {
            qos_id,
            edges: BTreeMap::new(),
        };

        for object in usable {
            if model == LinkModel::Bidirectional
                && !announced.contains(&(object.neighbor_address, object.address))
            {
                continue;
            }
            let weight = u64::from(object.cost).saturating_mul(multiplier).max(1);
            graph.insert(object.address, object.neighbor_address, weight, object.port_id);
        }

        graph
    }

    /// Add one link, keeping the cheapest
    pub fn insert(&mut self, from: Address, to: Address, weight: u64, port: PortId) {
        let edge = self
            .edges
            .entry(from)
            .or_default()
            .entry(to)
            .or_insert_with(|| Edge {
                weight,
                ports: Vec::new(),
            });

        if weight < edge.weight {
            edge.weight = weight;
            edge.ports.clear();
        }
        if weight == edge.weight && !edge.ports.contains(&port) {
            edge.ports.push(port);
            edge.ports.sort_unstable();
        }

        self.edges.entry(to).or_default();
    }

    /// QoS class this graph was built for
    pub fn qos_id(&self) -> QosId {
        self.qos_id
    }

    /// Whether `address` is a vertex
    pub fn contains(&self, address: Address) -> bool {
        self.edges.contains_key(&address)
    }

    /// All vertices, ascending
    pub fn vertices(&self) -> impl Iterator<Item = Address> + '_ {
        self.edges.keys().copied()
    }

    /// Outgoing edges of `address` with their weights
    pub fn neighbors(&self, address: Address) -> impl Iterator<Item = (Address, u64)> + '_ {
        self.edges
            .get(&address)
            .into_iter()
            .flat_map(|out| out.iter().map(|(to, edge)| (*to, edge.weight)))
    }

    /// Weight of the edge `from -> to`
    pub fn weight(&self, from: Address, to: Address) -> Option<u64> {
        self.edges.get(&from)?.get(&to).map(|e| e.weight)
    }

    /// Ports of `from` reaching `to` at minimum weight, ascending
    pub fn ports(&self, from: Address, to: Address) -> &[PortId] {
        self.edges
            .get(&from)
            .and_then(|out| out.get(&to))
            .map(|e| e.ports.as_slice())
            .unwrap_or(&[])
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of directed edges
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::flow_state::FlowState;

    fn link(a: Address, b: Address, pa: PortId, pb: PortId) -> Vec<FlowStateObject> {
        vec![
            FlowStateObject::new(a, b, pa, pb),
            FlowStateObject::new(b, a, pb, pa),
        ]
    }

    #[test]
    fn test_bidirectional_requires_both_ends() {
        let mut objects = link(1, 2, 1, 1);
        objects.push(FlowStateObject::new(2, 3, 2, 1));
        let snapshot = FlowStateSnapshot::from_objects(0, objects);

        let graph = RoutingGraph::build(&snapshot, 1, 1, LinkModel::Bidirectional);
        assert_eq!(graph.weight(1, 2), Some(1));
        assert_eq!(graph.weight(2, 3), None);
        assert_eq!(graph.vertices().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(graph.vertex_count(), 2);

        let graph = RoutingGraph::build(&snapshot, 1, 1, LinkModel::Directed);
        assert_eq!(graph.weight(2, 3), Some(1));
    }

    #[test]
    fn test_down_objects_contribute_nothing() {
        let mut objects = link(1, 2, 1, 1);
        objects[1].state = FlowState::Down;
        let snapshot = FlowStateSnapshot::from_objects(0, objects);

        let graph = RoutingGraph::build(&snapshot, 1, 1, LinkModel::Directed);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.weight(2, 1), None);
    }

    #[test]
    fn test_parallel_links_keep_cheapest_ports() {
        let mut objects = link(1, 2, 5, 1);
        objects.extend(link(1, 2, 3, 2));
        objects.push(FlowStateObject::new(1, 2, 7, 3).with_cost(4));
        let snapshot = FlowStateSnapshot::from_objects(0, objects);

        let graph = RoutingGraph::build(&snapshot, 1, 1, LinkModel::Directed);
        assert_eq!(graph.weight(1, 2), Some(1));
        assert_eq!(graph.ports(1, 2), &[3, 5]);
    }

    #[test]
    fn test_qos_filter_and_multiplier() {
        let mut objects = link(1, 2, 1, 1);
        objects.push(FlowStateObject::new(1, 3, 2, 1).with_qos_ids(vec![2]).with_cost(3));
        objects.push(FlowStateObject::new(3, 1, 1, 2).with_qos_ids(vec![2]).with_cost(3));
        let snapshot = FlowStateSnapshot::from_objects(0, objects);

        let best_effort = RoutingGraph::build(&snapshot, 1, 1, LinkModel::Bidirectional);
        assert!(!best_effort.contains(3));

        let premium = RoutingGraph::build(&snapshot, 2, 10, LinkModel::Bidirectional);
        assert_eq!(premium.qos_id(), 2);
        assert_eq!(premium.weight(1, 3), Some(30));
        assert_eq!(premium.weight(1, 2), Some(10));
    }
}
