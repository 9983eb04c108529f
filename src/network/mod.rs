//! Network module
//!
//! The routing subsystem talks to the rest of the IPC Process through two
//! narrow traits: [`NeighborTransport`] carries routing messages to adjacent
//! nodes, [`ManagementTree`] mirrors flow state objects into the management
//! information tree. In-memory implementations connect several policies
//! inside one process for tests and demos.

mod memory;
mod transport;

pub use memory::{Delivery, FabricEndpoint, InMemoryTree, MemoryFabric};
pub use transport::{ManagementTree, NeighborTransport};
