//! Flow state dissemination
//!
//! Outgoing: objects marked for flooding are batched per neighbor, leaving
//! out whatever was learned from that neighbor (split horizon).
//! Incoming: records are validated one by one and offered to the database;
//! bad records are dropped without affecting the rest of the batch.
//! Enrollment: a full-state pull asks a neighbor for its whole database and
//! tracks the outstanding request by invoke id.

use crate::error::ProtocolError;
use crate::protocol::{FlowStateRecord, InvokeId, RoutingMessage, MAX_RECORDS_PER_MESSAGE};
use crate::routing::database::{FlowStateDatabase, PendingFlood, UpdateOutcome};
use crate::routing::flow_state::{Address, FlowState, FlowStateObject, PortId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Batches of objects destined for one neighbor
///
/// Iterating does not consume the update; it can be walked again, for
/// example to resend after a transport hiccup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingUpdate {
    batches: Vec<Vec<FlowStateObject>>,
}

impl OutgoingUpdate {
    /// Batches in send order
    pub fn iter(&self) -> impl Iterator<Item = &[FlowStateObject]> + '_ {
        self.batches.iter().map(Vec::as_slice)
    }

    /// Number of batches
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Whether there is nothing to send
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total objects over all batches
    pub fn object_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// One flood message per batch
    pub fn to_messages(&self) -> Vec<RoutingMessage> {
        self.iter().map(|batch| RoutingMessage::update(batch)).collect()
    }
}

/// Split `objects` into chunks of at most `max_per_batch`
pub fn batch_objects(
    objects: &[FlowStateObject],
    max_per_batch: usize,
) -> Vec<Vec<FlowStateObject>> {
    objects
        .chunks(max_per_batch.max(1))
        .map(<[FlowStateObject]>::to_vec)
        .collect()
}

/// Select and batch the objects to flood on `exclude_port`'s flow
///
/// Objects learned from `exclude_port` are skipped.
pub fn build_outgoing_update(
    pending: &[PendingFlood],
    exclude_port: PortId,
    max_objects_per_update: usize,
) -> OutgoingUpdate {
    let selected: Vec<FlowStateObject> = pending
        .iter()
        .filter(|p| p.avoid_port != Some(exclude_port))
        .map(|p| p.object.clone())
        .collect();

    OutgoingUpdate {
        batches: batch_objects(&selected, max_objects_per_update),
    }
}

/// What happened to a batch of remote records
#[derive(Debug, Clone, Default)]
pub struct RemoteUpdateReport {
    /// Objects stored (new or newer)
    pub accepted: Vec<FlowStateObject>,
    /// Records ignored as stale, duplicate or unknown self-originated
    pub stale: usize,
    /// Records that failed validation
    pub rejected: Vec<ProtocolError>,
    /// Own objects re-issued to override a newer copy seen remotely
    pub reoriginated: Vec<FlowStateObject>,
}

impl RemoteUpdateReport {
    /// Whether the database changed
    pub fn changed(&self) -> bool {
        !self.accepted.is_empty() || !self.reoriginated.is_empty()
    }
}

/// Apply records received on `from_port` to the database
///
/// A record already at the maximum age is applied as a withdrawal. A
/// record claiming to come from `local_address` never overwrites the local
/// copy: if it is newer, the local object is re-originated above it.
pub fn on_remote_update(
    db: &FlowStateDatabase,
    records: Vec<FlowStateRecord>,
    from_port: PortId,
    local_address: Address,
) -> RemoteUpdateReport {
    apply_records(db, records, Some(from_port), local_address)
}

/// Same as [`on_remote_update`], for records that may not have a port
/// (management tree writes)
pub(crate) fn apply_records(
    db: &FlowStateDatabase,
    records: Vec<FlowStateRecord>,
    from_port: Option<PortId>,
    local_address: Address,
) -> RemoteUpdateReport {
    let mut report = RemoteUpdateReport::default();

    if records.len() > MAX_RECORDS_PER_MESSAGE {
        warn!(
            port = ?from_port,
            received = records.len(),
            limit = MAX_RECORDS_PER_MESSAGE,
            "Truncating oversized flow state update"
        );
    }

    for record in records.into_iter().take(MAX_RECORDS_PER_MESSAGE) {
        let mut object = match FlowStateObject::try_from(record) {
            Ok(object) => object,
            Err(e) => {
                warn!(port = ?from_port, error = %e, "Dropping malformed flow state object");
                report.rejected.push(e);
                continue;
            },
        };

        if object.age >= db.max_age() {
            object.state = FlowState::Down;
        }

        if object.address == local_address {
            match db.get(&object.key()) {
                Some(local) if object.sequence_number > local.sequence_number => {
                    let seq = object.sequence_number + 1;
                    debug!(
                        key = %object.key(),
                        seq,
                        "Re-originating own object over newer remote copy"
                    );
                    report
                        .reoriginated
                        .push(db.originate(local.with_sequence_number(seq)));
                },
                Some(_) => report.stale += 1,
                None => {
                    debug!(key = %object.key(), "Ignoring unknown self-originated object");
                    report.stale += 1;
                },
            }
            continue;
        }

        let key = object.key();
        match db.add_or_update(object, from_port) {
            UpdateOutcome::Stale => {
                debug!(key = %key, port = ?from_port, "Discarding stale flow state object");
                report.stale += 1;
            },
            UpdateOutcome::Inserted | UpdateOutcome::Updated => {
                if let Some(stored) = db.get(&key) {
                    report.accepted.push(stored);
                }
            },
        }
    }

    report
}

/// How a full-state pull ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The final batch arrived
    Complete,
    /// Every attempt timed out; whatever arrived was applied
    Partial,
    /// The policy shut down while waiting
    Abandoned,
}

/// Outstanding full-state read requests
#[derive(Debug, Default)]
pub(crate) struct PullTracker {
    pending: DashMap<InvokeId, oneshot::Sender<()>>,
    next_invoke_id: AtomicU32,
}

impl PullTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate an invoke id and a receiver fired by its last batch
    pub(crate) fn register(&self) -> (InvokeId, oneshot::Receiver<()>) {
        let invoke_id = self.next_invoke_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(invoke_id, tx);
        (invoke_id, rx)
    }

    /// Signal that the last batch for `invoke_id` arrived
    pub(crate) fn complete(&self, invoke_id: InvokeId) -> bool {
        match self.pending.remove(&invoke_id) {
            Some((_, tx)) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Forget a request that timed out
    pub(crate) fn cancel(&self, invoke_id: InvokeId) {
        self.pending.remove(&invoke_id);
    }

    /// Drop every outstanding request; their waiters see a closed channel
    pub(crate) fn abandon_all(&self) {
        self.pending.clear();
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.pending.len()
    }
}
