//! Routing messages and the wire form of flow state objects

use crate::error::ProtocolError;
use crate::routing::{FlowState, FlowStateObject, QosId};
use serde::{Deserialize, Serialize};

/// Correlates a full-state read request with its responses
pub type InvokeId = u32;

/// A flow state object as received from a neighbor
///
/// Fields are signed and wide, the way a generic decoder hands them over;
/// nothing is trusted until [`FlowStateObject::try_from`] has checked it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStateRecord {
    /// Originating node
    pub address: i64,
    /// Adjacent node
    pub neighbor_address: i64,
    /// Originator's port
    pub port_id: i64,
    /// Neighbor's port
    pub neighbor_port_id: i64,
    /// Link cost
    pub cost: i64,
    /// QoS classes served (empty for all)
    #[serde(default)]
    pub qos_ids: Vec<i64>,
    /// Version
    pub sequence_number: i64,
    /// Age in ticks
    pub age: i64,
    /// Liveness
    pub up: bool,
}

impl From<&FlowStateObject> for FlowStateRecord {
    fn from(object: &FlowStateObject) -> Self {
        Self {
            address: i64::from(object.address),
            neighbor_address: i64::from(object.neighbor_address),
            port_id: i64::from(object.port_id),
            neighbor_port_id: i64::from(object.neighbor_port_id),
            cost: i64::from(object.cost),
            qos_ids: object.qos_ids.iter().map(|q| i64::from(*q)).collect(),
            sequence_number: i64::try_from(object.sequence_number).unwrap_or(i64::MAX),
            age: i64::from(object.age),
            up: object.is_up(),
        }
    }
}

fn malformed(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedObject {
        reason: reason.into(),
    }
}

fn address_field(value: i64, field: &str) -> Result<u32, ProtocolError> {
    match u32::try_from(value) {
        Ok(address) if address > 0 => Ok(address),
        _ => Err(malformed(format!("{} {} out of range", field, value))),
    }
}

fn port_field(value: i64, field: &str) -> Result<u32, ProtocolError> {
    u32::try_from(value).map_err(|_| malformed(format!("{} {} out of range", field, value)))
}

impl TryFrom<FlowStateRecord> for FlowStateObject {
    type Error = ProtocolError;

    fn try_from(record: FlowStateRecord) -> Result<Self, Self::Error> {
        let address = address_field(record.address, "address")?;
        let neighbor_address = address_field(record.neighbor_address, "neighbor_address")?;
        if address == neighbor_address {
            return Err(malformed(format!("self-adjacency on address {}", address)));
        }

        let port_id = port_field(record.port_id, "port_id")?;
        let neighbor_port_id = port_field(record.neighbor_port_id, "neighbor_port_id")?;

        let cost = match u32::try_from(record.cost) {
            Ok(cost) if cost >= 1 => cost,
            _ => return Err(malformed(format!("cost {} must be positive", record.cost))),
        };

        let sequence_number = match u64::try_from(record.sequence_number) {
            Ok(seq) if seq >= 1 => seq,
            _ => {
                return Err(malformed(format!(
                    "sequence number {} must be positive",
                    record.sequence_number
                )))
            },
        };

        if record.age < 0 {
            return Err(malformed(format!("negative age {}", record.age)));
        }
        let age = u32::try_from(record.age).unwrap_or(u32::MAX);

        let qos_ids = record
            .qos_ids
            .iter()
            .map(|q| {
                QosId::try_from(*q).map_err(|_| malformed(format!("qos id {} out of range", q)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FlowStateObject {
            address,
            neighbor_address,
            port_id,
            neighbor_port_id,
            cost,
            qos_ids,
            sequence_number,
            age,
            state: FlowState::from_up(record.up),
        })
    }
}

/// Messages exchanged between routing subsystems
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingMessage {
    /// Incremental flood of changed objects
    FlowStateUpdate {
        /// Changed objects
        objects: Vec<FlowStateRecord>,
    },
    /// Request for the sender's whole database
    ReadRequest {
        /// Correlation id echoed in every response
        invoke_id: InvokeId,
    },
    /// One batch of a full-state reply
    ReadResponse {
        /// Id of the request being answered
        invoke_id: InvokeId,
        /// Objects in this batch
        objects: Vec<FlowStateRecord>,
        /// Set on the final batch
        last: bool,
    },
}

impl RoutingMessage {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FlowStateUpdate { .. } => "flow_state_update",
            Self::ReadRequest { .. } => "read_request",
            Self::ReadResponse { .. } => "read_response",
        }
    }

    /// Number of records carried
    pub fn object_count(&self) -> usize {
        match self {
            Self::FlowStateUpdate { objects } | Self::ReadResponse { objects, .. } => {
                objects.len()
            },
            Self::ReadRequest { .. } => 0,
        }
    }

    /// Build a flood message from typed objects
    pub fn update<'a>(objects: impl IntoIterator<Item = &'a FlowStateObject>) -> Self {
        Self::FlowStateUpdate {
            objects: objects.into_iter().map(FlowStateRecord::from).collect(),
        }
    }
}
