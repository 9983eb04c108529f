//! Event system for routing notifications
//!
//! This module defines the events a routing policy reports (adjacency
//! changes, expiries, table updates, failures) and the handler registry
//! that delivers them, plus the tagged adjacency events fed into a policy.

use crate::error::{ProtocolError, RoutingError};
use crate::routing::{Address, FsoKey, PortId, PullOutcome};
use parking_lot::RwLock;
use std::sync::Arc;

/// Adjacency notifications delivered to a policy
///
/// Mirrors the individual `LinkStatePolicy` methods for callers that prefer
/// one dispatch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacencyEvent {
    /// Enrollment with a neighbor began
    EnrollmentStarted {
        /// Neighbor being enrolled with
        neighbor: Address,
        /// Whether this node initiated the enrollment
        as_initiator: bool,
    },

    /// An N-1 flow to a neighbor is up
    AdjacencyUp {
        /// Neighbor address
        neighbor: Address,
        /// Local port of the flow
        local_port: PortId,
        /// Neighbor's port of the flow
        neighbor_port: PortId,
    },

    /// An N-1 flow went away
    AdjacencyDown {
        /// Local port of the flow
        local_port: PortId,
    },
}

/// Events that can be delivered to application handlers
#[derive(Debug, Clone)]
pub enum RoutingEvent {
    /// The policy's periodic tasks are running
    PolicyStarted,

    /// The policy's periodic tasks were stopped
    PolicyStopped,

    /// A neighbor adjacency reached the established state
    AdjacencyEstablished {
        /// Neighbor address
        neighbor: Address,
        /// Local port
        port: PortId,
    },

    /// An adjacency was withdrawn
    AdjacencyWithdrawn {
        /// Neighbor address
        neighbor: Address,
        /// Local port
        port: PortId,
    },

    /// An object reached the maximum age and was removed
    LinkExpired {
        /// Key of the expired object
        key: FsoKey,
    },

    /// A record from a neighbor failed validation and was dropped
    ObjectRejected {
        /// Port the record arrived on
        port: PortId,
        /// Validation failure
        error: ProtocolError,
    },

    /// A new forwarding table was published
    ForwardingTableUpdated {
        /// Database generation the table reflects
        generation: u64,
        /// Number of reachable destinations
        destinations: usize,
    },

    /// A recomputation failed; the previous table stays in place
    RecomputationFailed {
        /// Cause
        error: RoutingError,
    },

    /// A full-state pull finished
    FullStatePullFinished {
        /// Port the pull was issued on
        port: PortId,
        /// Whether the final batch arrived
        outcome: PullOutcome,
    },
}

/// Handle for unsubscribing from events
///
/// Dropping the handle does not unsubscribe; call
/// `LinkStatePolicy::unsubscribe()` explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Type alias for event handler callbacks
pub type EventCallback = Arc<dyn Fn(RoutingEvent) + Send + Sync + 'static>;

/// Manages event subscriptions and delivery
#[derive(Clone, Default)]
pub struct EventHandlers {
    handlers: Arc<RwLock<Vec<(SubscriptionHandle, EventCallback)>>>,
    next_id: Arc<RwLock<u64>>,
}

impl EventHandlers {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for all future events
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(RoutingEvent) + Send + Sync + 'static,
    {
        let mut next_id = self.next_id.write();
        let handle = SubscriptionHandle(*next_id);
        *next_id += 1;

        self.handlers.write().push((handle, Arc::new(callback)));
        handle
    }

    /// Remove a handler; unknown handles are ignored
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.handlers.write().retain(|(h, _)| *h != handle);
    }

    /// Deliver an event to every handler in registration order
    ///
    /// A panicking handler is logged and skipped; the others still run.
    /// Handlers are cloned out first so a handler may subscribe or
    /// unsubscribe without deadlocking.
    pub fn dispatch(&self, event: RoutingEvent) {
        let handlers: Vec<_> = self.handlers.read().iter().cloned().collect();

        for (handle, callback) in handlers {
            let event_clone = event.clone();
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event_clone);
            })) {
                tracing::error!(
                    ?handle,
                    panic = e
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| e.downcast_ref::<String>().map(|s| s.as_str()))
                        .unwrap_or("unknown panic"),
                    "Event handler panicked"
                );
            }
        }
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("handlers", &self.handler_count())
            .finish()
    }
}
