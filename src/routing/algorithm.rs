//! Shortest-path computation
//!
//! [`EcmpDijkstra`] runs Dijkstra from the local node while tracking, for
//! every vertex, the set of the source's neighbors that start a shortest
//! path to it. Equal-cost paths merge their first-hop sets, so every
//! destination ends up with all of its equal-cost next hops.
//!
//! [`LoopFreeAlternates`] decorates another algorithm and adds backup ports
//! through neighbors that cannot loop traffic back through the source.

use crate::error::RoutingError;
use crate::routing::flow_state::{Address, PortId};
use crate::routing::forwarding_table::RoutingTableEntry;
use crate::routing::graph::RoutingGraph;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

/// Turns a topology graph into routes from one source
pub trait RoutingAlgorithm: Send + Sync {
    /// Shortest distance from `source` to every reachable vertex
    ///
    /// The source itself is included at distance 0.
    fn shortest_distances(&self, graph: &RoutingGraph, source: Address) -> BTreeMap<Address, u64>;

    /// Routes from `source` to every other reachable vertex
    ///
    /// Entries carry the graph's QoS class and are ordered by destination.
    fn compute_routing_table(
        &self,
        graph: &RoutingGraph,
        source: Address,
    ) -> Result<Vec<RoutingTableEntry>, RoutingError>;
}

/// Equal-cost multipath Dijkstra
#[derive(Debug, Clone, Copy, Default)]
pub struct EcmpDijkstra;

struct ShortestPaths {
    distances: BTreeMap<Address, u64>,
    first_hops: BTreeMap<Address, BTreeSet<Address>>,
}

fn dijkstra(graph: &RoutingGraph, source: Address) -> Result<ShortestPaths, RoutingError> {
    let mut distances = BTreeMap::from([(source, 0u64)]);
    let mut first_hops: BTreeMap<Address, BTreeSet<Address>> = BTreeMap::new();
    let mut heap = BinaryHeap::from([Reverse((0u64, source))]);

    while let Some(Reverse((dist, vertex))) = heap.pop() {
        if distances.get(&vertex).is_some_and(|&best| dist > best) {
            continue;
        }

        for (next, weight) in graph.neighbors(vertex) {
            if weight == 0 {
                return Err(RoutingError::InvariantViolated {
                    reason: format!("zero weight on edge {} -> {}", vertex, next),
                });
            }
            if next == source {
                continue;
            }

            let candidate = dist.saturating_add(weight);
            let via: BTreeSet<Address> = if vertex == source {
                BTreeSet::from([next])
            } else {
                first_hops.get(&vertex).cloned().unwrap_or_default()
            };

            match distances.get(&next) {
                Some(&best) if candidate > best => {},
                Some(&best) if candidate == best => {
                    first_hops.entry(next).or_default().extend(via);
                },
                _ => {
                    distances.insert(next, candidate);
                    first_hops.insert(next, via);
                    heap.push(Reverse((candidate, next)));
                },
            }
        }
    }

    Ok(ShortestPaths {
        distances,
        first_hops,
    })
}

impl RoutingAlgorithm for EcmpDijkstra {
    fn shortest_distances(&self, graph: &RoutingGraph, source: Address) -> BTreeMap<Address, u64> {
        dijkstra(graph, source)
            .map(|paths| paths.distances)
            .unwrap_or_else(|_| BTreeMap::from([(source, 0)]))
    }

    fn compute_routing_table(
        &self,
        graph: &RoutingGraph,
        source: Address,
    ) -> Result<Vec<RoutingTableEntry>, RoutingError> {
        let paths = dijkstra(graph, source)?;
        let mut entries = Vec::with_capacity(paths.distances.len().saturating_sub(1));

        for (&destination, &cost) in &paths.distances {
            if destination == source {
                continue;
            }

            let mut next_hops: Vec<PortId> = paths
                .first_hops
                .get(&destination)
                .into_iter()
                .flatten()
                .flat_map(|neighbor| graph.ports(source, *neighbor).iter().copied())
                .collect();
            next_hops.sort_unstable();
            next_hops.dedup();

            if next_hops.is_empty() {
                return Err(RoutingError::InvariantViolated {
                    reason: format!("destination {} is reachable but has no next hop", destination),
                });
            }

            entries.push(RoutingTableEntry {
                destination,
                qos_id: graph.qos_id(),
                cost,
                next_hops,
                alternates: Vec::new(),
            });
        }

        Ok(entries)
    }
}

/// Adds loop-free alternate ports to the routes of another algorithm
///
/// Neighbor N of source S is a loop-free alternate toward X when
/// `dist(N, X) < dist(N, S) + dist(S, X)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopFreeAlternates<A = EcmpDijkstra> {
    inner: A,
}

impl<A: RoutingAlgorithm> LoopFreeAlternates<A> {
    /// Wrap `inner`
    pub fn new(inner: A) -> Self {
        Self { inner }
    }
}

impl<A: RoutingAlgorithm> RoutingAlgorithm for LoopFreeAlternates<A> {
    fn shortest_distances(&self, graph: &RoutingGraph, source: Address) -> BTreeMap<Address, u64> {
        self.inner.shortest_distances(graph, source)
    }

    fn compute_routing_table(
        &self,
        graph: &RoutingGraph,
        source: Address,
    ) -> Result<Vec<RoutingTableEntry>, RoutingError> {
        let mut entries = self.inner.compute_routing_table(graph, source)?;
        let from_source = self.inner.shortest_distances(graph, source);

        let neighbor_trees: Vec<(Address, BTreeMap<Address, u64>)> = graph
            .neighbors(source)
            .map(|(neighbor, _)| (neighbor, self.inner.shortest_distances(graph, neighbor)))
            .collect();

        for entry in &mut entries {
            let target = entry.destination;
            let Some(&source_to_target) = from_source.get(&target) else {
                continue;
            };

            for (neighbor, tree) in &neighbor_trees {
                if *neighbor == target {
                    continue;
                }
                let (Some(&neighbor_to_target), Some(&neighbor_to_source)) =
                    (tree.get(&target), tree.get(&source))
                else {
                    continue;
                };

                if neighbor_to_target < neighbor_to_source.saturating_add(source_to_target) {
                    for &port in graph.ports(source, *neighbor) {
                        if !entry.next_hops.contains(&port) && !entry.alternates.contains(&port) {
                            entry.alternates.push(port);
                        }
                    }
                }
            }
            entry.alternates.sort_unstable();
        }

        Ok(entries)
    }
}
