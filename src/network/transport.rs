//! Collaborator traits

use crate::error::NetworkError;
use crate::protocol::{FlowStateRecord, RoutingMessage};
use crate::routing::{Address, PortId};

/// Sends routing messages to adjacent IPC Processes
///
/// Sending is fire-and-forget: implementations hand the message off and
/// return without waiting for delivery. Replies come back through
/// `LinkStatePolicy::on_message_received`.
pub trait NeighborTransport: Send + Sync {
    /// Queue `message` on the N-1 flow bound to `port`
    fn send_to_neighbor(&self, port: PortId, message: RoutingMessage) -> Result<(), NetworkError>;

    /// A port currently reaching `neighbor`, if the transport knows one
    fn port_towards(&self, _neighbor: Address) -> Option<PortId> {
        None
    }
}

/// The management information tree of the local IPC Process
pub trait ManagementTree: Send + Sync {
    /// Create or update the object called `name`
    fn publish_object(&self, name: &str, record: &FlowStateRecord);

    /// Remove the object called `name`; unknown names are ignored
    fn delete_object(&self, name: &str);
}
