//! Protocol module
//!
//! Typed messages exchanged between the routing subsystems of neighboring
//! IPC Processes. Messages derive `serde` traits; turning them into bytes is
//! left to the transport that carries them.

mod messages;

pub use messages::{FlowStateRecord, InvokeId, RoutingMessage};

/// Upper bound on the number of records accepted in a single message
///
/// Larger messages are truncated with a warning; a well-behaved peer never
/// gets close since it batches by `max_objects_per_update`.
pub const MAX_RECORDS_PER_MESSAGE: usize = 4096;
