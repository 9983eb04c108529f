//! In-memory transport and management tree
//!
//! `MemoryFabric` wires the ports of several local nodes together. Every
//! node gets an inbox channel; a message sent on a port lands in the inbox
//! of the node at the other end, tagged with that node's port.

use crate::error::NetworkError;
use crate::network::transport::{ManagementTree, NeighborTransport};
use crate::protocol::{FlowStateRecord, RoutingMessage};
use crate::routing::{Address, PortId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A message arriving at a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Receiving node's port
    pub port: PortId,
    /// The message
    pub message: RoutingMessage,
}

#[derive(Debug, Clone, Copy)]
struct LinkEnd {
    node: Address,
    port: PortId,
}

#[derive(Default)]
struct FabricInner {
    links: DashMap<(Address, PortId), LinkEnd>,
    inboxes: DashMap<Address, mpsc::UnboundedSender<Delivery>>,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// Registry of in-process nodes and the links between them
#[derive(Clone, Default)]
pub struct MemoryFabric {
    inner: Arc<FabricInner>,
}

impl MemoryFabric {
    /// Create an empty fabric
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and get its transport plus inbox
    ///
    /// Registering the same address again replaces the previous inbox.
    pub fn endpoint(
        &self,
        address: Address,
    ) -> (FabricEndpoint, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.inboxes.insert(address, tx);
        (
            FabricEndpoint {
                address,
                fabric: Arc::clone(&self.inner),
            },
            rx,
        )
    }

    /// Remove a node's inbox; messages to it are dropped from now on
    pub fn unregister(&self, address: Address) {
        self.inner.inboxes.remove(&address);
    }

    /// Create a bidirectional link `a:port_a <-> b:port_b`
    pub fn connect(&self, a: Address, port_a: PortId, b: Address, port_b: PortId) {
        self.inner
            .links
            .insert((a, port_a), LinkEnd { node: b, port: port_b });
        self.inner
            .links
            .insert((b, port_b), LinkEnd { node: a, port: port_a });
    }

    /// Tear down the link attached to `a:port_a`, both directions
    pub fn disconnect(&self, a: Address, port_a: PortId) {
        if let Some((_, far)) = self.inner.links.remove(&(a, port_a)) {
            self.inner.links.remove(&(far.node, far.port));
        }
    }

    /// Number of directed link ends
    pub fn link_count(&self) -> usize {
        self.inner.links.len()
    }

    /// Messages handed to an inbox so far
    pub fn messages_sent(&self) -> u64 {
        self.inner.messages_sent.load(Ordering::Relaxed)
    }

    /// Messages that found no link or inbox
    pub fn messages_dropped(&self) -> u64 {
        self.inner.messages_dropped.load(Ordering::Relaxed)
    }
}

/// One node's view of a [`MemoryFabric`]
#[derive(Clone)]
pub struct FabricEndpoint {
    address: Address,
    fabric: Arc<FabricInner>,
}

impl FabricEndpoint {
    /// Address this endpoint was registered for
    pub fn address(&self) -> Address {
        self.address
    }

    fn drop_message(&self, err: NetworkError) -> Result<(), NetworkError> {
        self.fabric.messages_dropped.fetch_add(1, Ordering::Relaxed);
        Err(err)
    }
}

impl NeighborTransport for FabricEndpoint {
    fn send_to_neighbor(&self, port: PortId, message: RoutingMessage) -> Result<(), NetworkError> {
        let far = match self.fabric.links.get(&(self.address, port)) {
            Some(end) => *end,
            None => return self.drop_message(NetworkError::NeighborUnreachable { port }),
        };

        let sent = self
            .fabric
            .inboxes
            .get(&far.node)
            .map(|inbox| inbox.send(Delivery { port: far.port, message }).is_ok())
            .unwrap_or(false);

        if !sent {
            return self.drop_message(NetworkError::SendFailed {
                port,
                reason: format!("inbox of node {} is closed", far.node),
            });
        }

        self.fabric.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn port_towards(&self, neighbor: Address) -> Option<PortId> {
        self.fabric
            .links
            .iter()
            .filter(|entry| entry.key().0 == self.address && entry.value().node == neighbor)
            .map(|entry| entry.key().1)
            .min()
    }
}

/// Management tree kept in a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryTree {
    objects: DashMap<String, FlowStateRecord>,
}

impl InMemoryTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the object called `name`
    pub fn get(&self, name: &str) -> Option<FlowStateRecord> {
        self.objects.get(name).map(|r| r.clone())
    }

    /// Object names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the tree is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ManagementTree for InMemoryTree {
    fn publish_object(&self, name: &str, record: &FlowStateRecord) {
        self.objects.insert(name.to_string(), record.clone());
    }

    fn delete_object(&self, name: &str) {
        self.objects.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fabric_delivers_with_far_port() {
        let fabric = MemoryFabric::new();
        let (a, _rx_a) = fabric.endpoint(1);
        let (_b, mut rx_b) = fabric.endpoint(2);
        fabric.connect(1, 10, 2, 20);

        a.send_to_neighbor(10, RoutingMessage::ReadRequest { invoke_id: 4 })
            .unwrap();

        let delivery = rx_b.recv().await.unwrap();
        assert_eq!(delivery.port, 20);
        assert_eq!(delivery.message, RoutingMessage::ReadRequest { invoke_id: 4 });
        assert_eq!(fabric.messages_sent(), 1);
    }

    #[tokio::test]
    async fn test_send_on_unknown_port_fails() {
        let fabric = MemoryFabric::new();
        let (a, _rx) = fabric.endpoint(1);

        let err = a
            .send_to_neighbor(3, RoutingMessage::ReadRequest { invoke_id: 1 })
            .unwrap_err();
        assert_eq!(err, NetworkError::NeighborUnreachable { port: 3 });
        assert_eq!(fabric.messages_dropped(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_both_ends() {
        let fabric = MemoryFabric::new();
        let (a, _rx_a) = fabric.endpoint(1);
        fabric.connect(1, 10, 2, 20);
        fabric.connect(1, 11, 2, 21);
        assert_eq!(a.port_towards(2), Some(10));

        fabric.disconnect(2, 20);
        assert_eq!(fabric.link_count(), 2);
        assert_eq!(a.port_towards(2), Some(11));
        assert_eq!(a.port_towards(3), None);
    }

    #[test]
    fn test_in_memory_tree() {
        let tree = InMemoryTree::new();
        let record = FlowStateRecord::from(&crate::routing::FlowStateObject::new(1, 2, 3, 4));

        tree.publish_object("/a", &record);
        tree.publish_object("/b", &record);
        assert_eq!(tree.names(), vec!["/a".to_string(), "/b".to_string()]);

        tree.delete_object("/a");
        tree.delete_object("/missing");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get("/b"), Some(record));
    }
}
