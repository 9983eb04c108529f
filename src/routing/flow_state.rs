//! Flow state objects
//!
//! A flow state object (FSO) records one adjacency as seen by the node that
//! originated it: who is connected to whom, over which ports, whether the
//! link is usable and how fresh the information is.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing address of an IPC Process (0 is never assigned)
pub type Address = u32;

/// Local port number of an N-1 flow
pub type PortId = u32;

/// QoS class identifier
pub type QosId = u32;

/// Per-object version number
pub type SequenceNumber = u64;

/// QoS id used when link weights are uniform
pub const DEFAULT_QOS_ID: QosId = 1;

/// Prefix of the management tree names under which FSOs are published
pub const OBJECT_NAME_PREFIX: &str = "/routing/flow-states/";

/// Whether an adjacency is currently usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    /// The adjacency carries traffic
    Up,
    /// The adjacency was withdrawn
    Down,
}

impl FlowState {
    /// Build from the boolean form used on the wire
    pub fn from_up(up: bool) -> Self {
        if up {
            Self::Up
        } else {
            Self::Down
        }
    }

    /// Whether this is [`FlowState::Up`]
    pub fn is_up(self) -> bool {
        matches!(self, Self::Up)
    }
}

/// Identity of a flow state object inside a database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FsoKey {
    /// Originating node
    pub address: Address,
    /// Adjacent node
    pub neighbor_address: Address,
    /// Originator's local port
    pub port_id: PortId,
}

impl FsoKey {
    /// Create a key
    pub fn new(address: Address, neighbor_address: Address, port_id: PortId) -> Self {
        Self {
            address,
            neighbor_address,
            port_id,
        }
    }

    /// Name of the management tree object holding this FSO
    pub fn object_name(&self) -> String {
        format!(
            "{}{}-{}-{}",
            OBJECT_NAME_PREFIX, self.address, self.neighbor_address, self.port_id
        )
    }

    /// Parse a management tree object name back into a key
    pub fn from_object_name(name: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidObjectName {
            name: name.to_string(),
        };

        let rest = name.strip_prefix(OBJECT_NAME_PREFIX).ok_or_else(invalid)?;
        let mut parts = rest.split('-');
        let mut next = || -> Result<u32, ProtocolError> {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(invalid)
        };

        let key = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(key)
    }
}

impl fmt::Display for FsoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}@{}",
            self.address, self.neighbor_address, self.port_id
        )
    }
}

/// One observed adjacency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStateObject {
    /// Address of the node that originated this object
    pub address: Address,
    /// Address of the adjacent node
    pub neighbor_address: Address,
    /// Originator's local port carrying the adjacency
    pub port_id: PortId,
    /// Neighbor's port for the same adjacency
    pub neighbor_port_id: PortId,
    /// Link cost (at least 1)
    pub cost: u32,
    /// QoS classes this adjacency serves; empty means all of them
    #[serde(default)]
    pub qos_ids: Vec<QosId>,
    /// Version, incremented by the originator on every change
    pub sequence_number: SequenceNumber,
    /// Ticks since creation or last accepted change
    pub age: u32,
    /// Liveness
    pub state: FlowState,
}

impl FlowStateObject {
    /// Create a fresh UP object with sequence number 1 and age 0
    pub fn new(
        address: Address,
        neighbor_address: Address,
        port_id: PortId,
        neighbor_port_id: PortId,
    ) -> Self {
        Self {
            address,
            neighbor_address,
            port_id,
            neighbor_port_id,
            cost: 1,
            qos_ids: Vec::new(),
            sequence_number: 1,
            age: 0,
            state: FlowState::Up,
        }
    }

    /// Set the link cost
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Set the sequence number
    pub fn with_sequence_number(mut self, sequence_number: SequenceNumber) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    /// Set the state
    pub fn with_state(mut self, state: FlowState) -> Self {
        self.state = state;
        self
    }

    /// Restrict the object to the given QoS classes
    pub fn with_qos_ids(mut self, qos_ids: Vec<QosId>) -> Self {
        self.qos_ids = qos_ids;
        self
    }

    /// Key of this object
    pub fn key(&self) -> FsoKey {
        FsoKey::new(self.address, self.neighbor_address, self.port_id)
    }

    /// Whether the adjacency is usable
    pub fn is_up(&self) -> bool {
        self.state.is_up()
    }

    /// Whether this object may be used when computing routes for `qos_id`
    pub fn serves_qos(&self, qos_id: QosId) -> bool {
        self.qos_ids.is_empty() || self.qos_ids.contains(&qos_id)
    }

    /// Whether `other` is the same adjacency announced from the other end
    pub fn is_reverse_of(&self, other: &FlowStateObject) -> bool {
        self.address == other.neighbor_address && self.neighbor_address == other.address
    }
}

impl fmt::Display for FlowStateObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (peer port {}, cost {}, seq {}, age {}, {:?})",
            self.key(),
            self.neighbor_port_id,
            self.cost,
            self.sequence_number,
            self.age,
            self.state
        )
    }
}
