//! Error types for the link-state routing subsystem
//!
//! Every fault in this crate is local and recoverable except configuration
//! errors, which are reported once when a policy is built.

use crate::routing::PortId;
use thiserror::Error;

/// Main error type for routing subsystem operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (fatal at construction)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed messages or records received from a neighbor
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Routing computation and adjacency errors
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Errors reported by the transport collaborator
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// I/O errors (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A period, age or size that must be positive was zero
    #[error("{field} must be greater than zero")]
    MustBePositive {
        /// Offending field
        field: String,
    },

    /// A required builder field was not provided
    #[error("Missing required field: {field}")]
    MissingRequiredField {
        /// Missing field
        field: String,
    },

    /// A value is present but makes no sense
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// The configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors about the shape of data received from other IPC Processes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A flow state record failed structural validation
    #[error("Malformed flow state object: {reason}")]
    MalformedObject {
        /// Which rule was violated
        reason: String,
    },

    /// A management tree object name does not denote a flow state object
    #[error("Invalid flow state object name: {name}")]
    InvalidObjectName {
        /// The offending name
        name: String,
    },
}

/// Routing computation and orchestration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The shortest-path computation reached an inconsistent state
    #[error("Routing invariant violated: {reason}")]
    InvariantViolated {
        /// Description of the violation
        reason: String,
    },

    /// No adjacency is bound to the given local port
    #[error("No adjacency on port {port}")]
    NoSuchAdjacency {
        /// Local port id
        port: PortId,
    },

    /// An adjacency to the local node itself or to address 0
    #[error("Invalid adjacency to {neighbor}")]
    InvalidAdjacency {
        /// Offending neighbor address
        neighbor: u32,
    },

    /// The policy was shut down
    #[error("Routing policy has been shut down")]
    Shutdown,

    /// Background tasks need a Tokio runtime and none is available
    #[error("No Tokio runtime available to run the routing policy")]
    NoRuntime,
}

/// Errors reported when handing a message to the transport collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// No channel is bound to the port
    #[error("Neighbor unreachable on port {port}")]
    NeighborUnreachable {
        /// Local port id
        port: PortId,
    },

    /// The transport accepted the port but could not send
    #[error("Send on port {port} failed: {reason}")]
    SendFailed {
        /// Local port id
        port: PortId,
        /// Transport-specific reason
        reason: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
