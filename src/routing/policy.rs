//! Link-state policy orchestrator
//!
//! `LinkStatePolicy` owns the flow state database of one IPC Process and
//! reacts to everything that can change it: adjacency notifications,
//! messages from neighbors, management tree writes and the periodic ticks.
//! Each accepted change ends up in three places: the management tree, the
//! next flood, and the forwarding table.
//!
//! Recomputation is never re-entrant. A request that arrives while a run is
//! in flight is folded into exactly one follow-up run.

use crate::api::config::RoutingConfig;
use crate::api::events::{AdjacencyEvent, EventHandlers, RoutingEvent, SubscriptionHandle};
use crate::error::{ConfigError, ProtocolError, Result, RoutingError};
use crate::network::{Delivery, ManagementTree, NeighborTransport};
use crate::protocol::{FlowStateRecord, InvokeId, RoutingMessage};
use crate::routing::algorithm::{EcmpDijkstra, LoopFreeAlternates, RoutingAlgorithm};
use crate::routing::database::{FlowStateDatabase, FlowStateSnapshot};
use crate::routing::dissemination::{
    apply_records, batch_objects, build_outgoing_update, PullOutcome, PullTracker,
    RemoteUpdateReport,
};
use crate::routing::flow_state::{Address, FlowStateObject, FsoKey, PortId};
use crate::routing::forwarding_table::{ForwardingTable, ForwardingTableSink};
use crate::routing::graph::RoutingGraph;
use crate::routing::scheduler::SchedulerHandle;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Enrollment and adjacency state of one neighbor
///
/// A neighbor the policy never heard of has no state at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacencyState {
    /// Enrollment started, no flow up yet
    Enrolling,
    /// At least one flow to the neighbor is up
    Established,
    /// Every flow to the neighbor went down
    Withdrawn,
}

#[derive(Debug)]
struct Adjacency {
    state: AdjacencyState,
    /// local port -> neighbor port
    ports: BTreeMap<PortId, PortId>,
    pull_on_first_port: bool,
}

impl Adjacency {
    fn new() -> Self {
        Self {
            state: AdjacencyState::Enrolling,
            ports: BTreeMap::new(),
            pull_on_first_port: false,
        }
    }
}

/// Serializes recomputations and folds concurrent requests together
#[derive(Debug, Default)]
struct RecomputeGate {
    running: Mutex<()>,
    pending: AtomicBool,
}

impl RecomputeGate {
    fn run_coalesced(&self, mut run: impl FnMut()) {
        self.pending.store(true, Ordering::SeqCst);
        loop {
            let Some(guard) = self.running.try_lock() else {
                return;
            };
            if !self.pending.swap(false, Ordering::SeqCst) {
                return;
            }
            run();
            drop(guard);

            if !self.pending.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

/// Link-state routing policy of one IPC Process
pub struct LinkStatePolicy {
    address: Address,
    config: RoutingConfig,
    db: FlowStateDatabase,
    transport: Arc<dyn NeighborTransport>,
    tree: Option<Arc<dyn ManagementTree>>,
    sink: Option<Arc<dyn ForwardingTableSink>>,
    algorithm: Box<dyn RoutingAlgorithm>,
    adjacencies: RwLock<BTreeMap<Address, Adjacency>>,
    table: RwLock<Arc<ForwardingTable>>,
    gate: RecomputeGate,
    last_generation: Mutex<Option<u64>>,
    recompute_count: AtomicU64,
    recompute_signal: Arc<Notify>,
    pulls: PullTracker,
    handlers: EventHandlers,
    scheduler: Mutex<Option<SchedulerHandle>>,
    runtime: Mutex<Option<Handle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    deferred_pulls: Mutex<Vec<PortId>>,
    deferred_inboxes: Mutex<Vec<mpsc::UnboundedReceiver<Delivery>>>,
    running: AtomicBool,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for LinkStatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStatePolicy")
            .field("address", &self.address)
            .field("objects", &self.db.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl LinkStatePolicy {
    /// Start building a policy
    pub fn builder() -> LinkStatePolicyBuilder {
        LinkStatePolicyBuilder::new()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the periodic tasks
    ///
    /// Also issues the pulls and attaches the inboxes that arrived before a
    /// runtime was available. Starting a running policy is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::NoRuntime` when called outside a Tokio runtime
    /// and the policy was not built inside one.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.ensure_active()?;
        let runtime = self.runtime().ok_or(RoutingError::NoRuntime)?;

        {
            let mut scheduler = self.scheduler.lock();
            if scheduler.is_some() {
                return Ok(());
            }
            *scheduler = Some(SchedulerHandle::start(
                &runtime,
                self,
                self.config.age_tick(),
                self.config.propagation_period(),
                Arc::clone(&self.recompute_signal),
            ));
            self.running.store(true, Ordering::SeqCst);
        }

        let inboxes = std::mem::take(&mut *self.deferred_inboxes.lock());
        for inbox in inboxes {
            self.spawn_inbox(&runtime, inbox);
        }
        let pulls = std::mem::take(&mut *self.deferred_pulls.lock());
        for port in pulls {
            self.spawn_pull(port);
        }

        info!(address = self.address, "Link-state policy started");
        self.handlers.dispatch(RoutingEvent::PolicyStarted);
        Ok(())
    }

    /// Stop every task and abandon outstanding pulls
    ///
    /// The policy rejects adjacency changes afterwards.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        self.pulls.abandon_all();
        self.deferred_pulls.lock().clear();
        self.deferred_inboxes.lock().clear();

        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        info!(address = self.address, "Link-state policy stopped");
        self.handlers.dispatch(RoutingEvent::PolicyStopped);
    }

    /// Whether the periodic tasks are running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Feed messages from an in-memory inbox into this policy
    ///
    /// Without a runtime the inbox is held until [`start`](Self::start).
    pub fn attach_inbox(self: &Arc<Self>, inbox: mpsc::UnboundedReceiver<Delivery>) {
        match self.runtime() {
            Some(runtime) => self.spawn_inbox(&runtime, inbox),
            None => {
                debug!(address = self.address, "No runtime yet, inbox attached on start");
                self.deferred_inboxes.lock().push(inbox);
            },
        }
    }

    fn spawn_inbox(
        self: &Arc<Self>,
        runtime: &Handle,
        mut inbox: mpsc::UnboundedReceiver<Delivery>,
    ) {
        let policy = Arc::downgrade(self);
        let task = runtime.spawn(async move {
            while let Some(delivery) = inbox.recv().await {
                let Some(policy) = policy.upgrade() else {
                    break;
                };
                policy.on_message_received(delivery.port, delivery.message);
            }
        });
        self.track(task);
    }

    /// Runtime captured at build time, or the caller's
    fn runtime(&self) -> Option<Handle> {
        let mut runtime = self.runtime.lock();
        if runtime.is_none() {
            *runtime = Handle::try_current().ok();
        }
        runtime.clone()
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn ensure_active(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RoutingError::Shutdown.into());
        }
        Ok(())
    }

    // ========================================================================
    // Adjacency events
    // ========================================================================

    /// Dispatch a tagged adjacency event to the matching handler
    pub fn handle_event(self: &Arc<Self>, event: AdjacencyEvent) -> Result<()> {
        match event {
            AdjacencyEvent::EnrollmentStarted {
                neighbor,
                as_initiator,
            } => self.on_enrollment_started(neighbor, as_initiator),
            AdjacencyEvent::AdjacencyUp {
                neighbor,
                local_port,
                neighbor_port,
            } => self.adjacency_up(neighbor, local_port, neighbor_port),
            AdjacencyEvent::AdjacencyDown { local_port } => self.adjacency_down(local_port),
        }
    }

    /// Enrollment with `neighbor` began
    ///
    /// The initiator pulls the neighbor's full database, on the port the
    /// transport reports toward it or, failing that, on the first adjacency
    /// port that comes up.
    pub fn on_enrollment_started(
        self: &Arc<Self>,
        neighbor: Address,
        as_initiator: bool,
    ) -> Result<()> {
        self.ensure_active()?;
        self.check_neighbor(neighbor)?;

        let port = if as_initiator {
            self.transport.port_towards(neighbor)
        } else {
            None
        };

        {
            let mut adjacencies = self.adjacencies.write();
            let adjacency = adjacencies.entry(neighbor).or_insert_with(Adjacency::new);
            if adjacency.state != AdjacencyState::Established {
                adjacency.state = AdjacencyState::Enrolling;
            }
            adjacency.pull_on_first_port = as_initiator && port.is_none();
        }

        debug!(neighbor, as_initiator, ?port, "Enrollment started");
        if let Some(port) = port {
            self.spawn_pull(port);
        }
        Ok(())
    }

    /// A flow to `neighbor` came up on `local_port`
    pub fn adjacency_up(
        self: &Arc<Self>,
        neighbor: Address,
        local_port: PortId,
        neighbor_port: PortId,
    ) -> Result<()> {
        self.ensure_active()?;
        self.check_neighbor(neighbor)?;

        let pull_now = {
            let mut adjacencies = self.adjacencies.write();
            let adjacency = adjacencies.entry(neighbor).or_insert_with(Adjacency::new);
            adjacency.state = AdjacencyState::Established;
            adjacency.ports.insert(local_port, neighbor_port);
            std::mem::take(&mut adjacency.pull_on_first_port)
        };

        let object = self.db.originate(
            FlowStateObject::new(self.address, neighbor, local_port, neighbor_port)
                .with_cost(self.config.default_link_cost),
        );
        self.publish(&object);
        info!(neighbor, port = local_port, seq = object.sequence_number, "Adjacency established");

        self.send_database(local_port);
        self.handlers.dispatch(RoutingEvent::AdjacencyEstablished {
            neighbor,
            port: local_port,
        });

        self.recompute_now();
        // The new neighbor already has the whole database
        self.flood_pending(Some(local_port));

        if pull_now {
            self.spawn_pull(local_port);
        }
        Ok(())
    }

    /// The flow on `local_port` went down
    pub fn adjacency_down(&self, local_port: PortId) -> Result<()> {
        self.ensure_active()?;

        let neighbor = {
            let mut adjacencies = self.adjacencies.write();
            let (neighbor, adjacency) = adjacencies
                .iter_mut()
                .find(|(_, a)| a.ports.contains_key(&local_port))
                .ok_or(RoutingError::NoSuchAdjacency { port: local_port })?;
            adjacency.ports.remove(&local_port);
            if adjacency.ports.is_empty() {
                adjacency.state = AdjacencyState::Withdrawn;
            }
            *neighbor
        };

        if let Some(object) = self.db.withdraw(&FsoKey::new(self.address, neighbor, local_port)) {
            self.publish(&object);
        }
        info!(neighbor, port = local_port, "Adjacency withdrawn");
        self.handlers.dispatch(RoutingEvent::AdjacencyWithdrawn {
            neighbor,
            port: local_port,
        });

        self.recompute_now();
        Ok(())
    }

    fn check_neighbor(&self, neighbor: Address) -> Result<()> {
        if neighbor == 0 || neighbor == self.address {
            return Err(RoutingError::InvalidAdjacency { neighbor }.into());
        }
        Ok(())
    }

    /// Own objects toward `neighbor` aged out
    ///
    /// Ports stay bound so a later `adjacency_down` still finds them; the
    /// adjacency is withdrawn once none of its objects is UP.
    fn expire_adjacency(&self, neighbor: Address) {
        let mut adjacencies = self.adjacencies.write();
        let Some(adjacency) = adjacencies.get_mut(&neighbor) else {
            return;
        };
        let any_up = adjacency.ports.keys().any(|port| {
            self.db
                .get(&FsoKey::new(self.address, neighbor, *port))
                .is_some_and(|object| object.is_up())
        });
        if !any_up {
            adjacency.state = AdjacencyState::Withdrawn;
        }
    }

    /// Local ports of every established adjacency
    fn neighbor_ports(&self) -> Vec<PortId> {
        self.adjacencies
            .read()
            .values()
            .flat_map(|a| a.ports.keys().copied())
            .collect()
    }

    // ========================================================================
    // Incoming messages and tree notifications
    // ========================================================================

    /// Handle a routing message that arrived on `port`
    pub fn on_message_received(&self, port: PortId, message: RoutingMessage) {
        debug!(
            port,
            kind = message.kind(),
            objects = message.object_count(),
            "Routing message received"
        );

        match message {
            RoutingMessage::FlowStateUpdate { objects } => {
                self.apply_remote(objects, Some(port));
            },
            RoutingMessage::ReadRequest { invoke_id } => self.answer_read(port, invoke_id),
            RoutingMessage::ReadResponse {
                invoke_id,
                objects,
                last,
            } => {
                self.apply_remote(objects, Some(port));
                if last && !self.pulls.complete(invoke_id) {
                    debug!(port, invoke_id, "Applied read response for a pull no longer waiting");
                }
            },
        }
    }

    /// A flow state object was written into the management tree remotely
    pub fn on_tree_object_written(&self, name: &str, record: FlowStateRecord) -> Result<()> {
        let key = FsoKey::from_object_name(name)?;
        let object = FlowStateObject::try_from(record.clone())?;
        if object.key() != key {
            return Err(ProtocolError::InvalidObjectName {
                name: name.to_string(),
            }
            .into());
        }

        self.apply_remote(vec![record], None);
        Ok(())
    }

    /// A flow state object was deleted from the management tree remotely
    pub fn on_tree_object_deleted(&self, name: &str) -> Result<()> {
        let key = FsoKey::from_object_name(name)?;
        if self.db.remove(&key).is_some() {
            debug!(key = %key, "Flow state object deleted through the management tree");
            self.request_recompute();
        }
        Ok(())
    }

    fn apply_remote(
        &self,
        records: Vec<FlowStateRecord>,
        from: Option<PortId>,
    ) -> RemoteUpdateReport {
        let report = apply_records(&self.db, records, from, self.address);

        for object in report.accepted.iter().chain(&report.reoriginated) {
            self.publish(object);
        }
        if let Some(port) = from {
            for error in &report.rejected {
                self.handlers.dispatch(RoutingEvent::ObjectRejected {
                    port,
                    error: error.clone(),
                });
            }
        }
        if report.changed() {
            self.request_recompute();
        }
        report
    }

    fn answer_read(&self, port: PortId, invoke_id: InvokeId) {
        let snapshot = self.db.snapshot();
        let mut batches = batch_objects(snapshot.objects(), self.config.max_objects_per_update);
        if batches.is_empty() {
            batches.push(Vec::new());
        }

        let count = batches.len();
        for (idx, batch) in batches.into_iter().enumerate() {
            self.send(
                port,
                RoutingMessage::ReadResponse {
                    invoke_id,
                    objects: batch.iter().map(FlowStateRecord::from).collect(),
                    last: idx + 1 == count,
                },
            );
        }
        debug!(
            port,
            invoke_id,
            batches = count,
            objects = snapshot.len(),
            "Answered full state read"
        );
    }

    // ========================================================================
    // Dissemination
    // ========================================================================

    /// Run one propagation cycle now
    ///
    /// Purges withdrawals flooded in an earlier cycle, then floods every
    /// pending change to every neighbor with split horizon. Returns the
    /// number of messages handed to the transport.
    pub fn propagate_now(&self) -> usize {
        self.flood_pending(None)
    }

    fn flood_pending(&self, skip_port: Option<PortId>) -> usize {
        for object in self.db.purge_flooded_withdrawals() {
            debug!(key = %object.key(), "Purged flooded withdrawal");
            self.unpublish(&object.key());
        }

        if !self.db.take_and_clear_modified() {
            return 0;
        }
        let pending = self.db.drain_pending_floods();
        if pending.is_empty() {
            return 0;
        }

        let mut sent = 0;
        for port in self.neighbor_ports() {
            if skip_port == Some(port) {
                continue;
            }
            let update = build_outgoing_update(&pending, port, self.config.max_objects_per_update);
            for message in update.to_messages() {
                if self.send(port, message) {
                    sent += 1;
                }
            }
        }

        debug!(objects = pending.len(), messages = sent, "Flooded flow state changes");
        sent
    }

    /// Pull the full database of the neighbor behind `port`
    ///
    /// Batches are applied as they arrive. Each attempt waits
    /// `pull_timeout` for the final batch; after `pull_retries` retries the
    /// pull gives up and the partial state is kept.
    pub async fn pull_full_state(&self, port: PortId) -> PullOutcome {
        let attempts = self.config.pull_retries.saturating_add(1);
        let mut outcome = PullOutcome::Partial;

        for attempt in 1..=attempts {
            if self.shut_down.load(Ordering::SeqCst) {
                outcome = PullOutcome::Abandoned;
                break;
            }

            let (invoke_id, done) = self.pulls.register();
            debug!(port, invoke_id, attempt, "Requesting full flow state");
            self.send(port, RoutingMessage::ReadRequest { invoke_id });

            match tokio::time::timeout(self.config.pull_timeout(), done).await {
                Ok(Ok(())) => {
                    outcome = PullOutcome::Complete;
                    break;
                },
                Ok(Err(_)) => {
                    outcome = PullOutcome::Abandoned;
                    break;
                },
                Err(_) => {
                    self.pulls.cancel(invoke_id);
                    warn!(port, invoke_id, attempt, "Full flow state pull timed out");
                },
            }
        }

        if outcome == PullOutcome::Partial {
            warn!(port, attempts, "Giving up on full flow state pull, keeping partial state");
        }
        self.handlers.dispatch(RoutingEvent::FullStatePullFinished { port, outcome });
        outcome
    }

    /// Pulls waiting for their final batch or for [`start`](Self::start)
    pub fn pending_pulls(&self) -> usize {
        self.pulls.outstanding() + self.deferred_pulls.lock().len()
    }

    fn spawn_pull(self: &Arc<Self>, port: PortId) {
        let Some(runtime) = self.runtime() else {
            debug!(port, "No runtime yet, full state pull deferred until start");
            self.deferred_pulls.lock().push(port);
            return;
        };

        let policy = Arc::clone(self);
        let task = runtime.spawn(async move {
            policy.pull_full_state(port).await;
        });
        self.track(task);
    }

    fn send_database(&self, port: PortId) {
        let snapshot = self.db.snapshot();
        for batch in batch_objects(snapshot.objects(), self.config.max_objects_per_update) {
            self.send(port, RoutingMessage::update(&batch));
        }
    }

    fn send(&self, port: PortId, message: RoutingMessage) -> bool {
        let kind = message.kind();
        match self.transport.send_to_neighbor(port, message) {
            Ok(()) => true,
            Err(e) => {
                warn!(port, kind, error = %e, "Failed to send routing message");
                false
            },
        }
    }

    // ========================================================================
    // Aging
    // ========================================================================

    /// Run one aging tick now
    ///
    /// Returns the number of objects that expired.
    pub fn age_tick(&self) -> usize {
        if self.config.refresh_local_objects {
            let refreshed = self
                .db
                .refresh_local(self.address, self.config.refresh_threshold());
            for object in &refreshed {
                self.publish(object);
            }
            if !refreshed.is_empty() {
                debug!(count = refreshed.len(), "Refreshed local flow state objects");
            }
        }

        let expiring = self.db.increment_all_ages();
        if expiring.is_empty() {
            return 0;
        }

        let (own, remote): (Vec<FsoKey>, Vec<FsoKey>) = expiring
            .into_iter()
            .partition(|key| key.address == self.address);

        let withdrawn = self.db.withdraw_expired(&own);
        for object in &withdrawn {
            let key = object.key();
            info!(
                key = %key,
                seq = object.sequence_number,
                "Own flow state object expired, withdrawing"
            );
            self.publish(object);
            self.expire_adjacency(object.neighbor_address);
            self.handlers.dispatch(RoutingEvent::LinkExpired { key });
        }

        let expired = self.db.expire(&remote);
        for object in &expired {
            let key = object.key();
            info!(key = %key, "Flow state object expired");
            self.unpublish(&key);
            self.handlers.dispatch(RoutingEvent::LinkExpired { key });
        }

        let count = withdrawn.len() + expired.len();
        if count > 0 {
            self.recompute_now();
        }
        count
    }

    // ========================================================================
    // Recomputation
    // ========================================================================

    /// Recompute the forwarding table on the calling thread
    ///
    /// If another recomputation is running, this one is folded into a
    /// single follow-up run and the call returns immediately.
    pub fn recompute_now(&self) {
        self.gate.run_coalesced(|| self.recompute_once());
    }

    /// Ask for a recomputation without waiting for it
    ///
    /// Handled by the background worker when the policy is running, inline
    /// otherwise.
    pub fn request_recompute(&self) {
        if self.is_running() {
            self.recompute_signal.notify_one();
        } else {
            self.recompute_now();
        }
    }

    fn recompute_once(&self) {
        let snapshot = self.db.snapshot();
        let generation = snapshot.generation();
        if *self.last_generation.lock() == Some(generation) {
            debug!(generation, "Forwarding table already current");
            return;
        }

        match self.compute_table(&snapshot) {
            Ok(table) => {
                let table = Arc::new(table);
                *self.table.write() = Arc::clone(&table);
                *self.last_generation.lock() = Some(generation);
                self.recompute_count.fetch_add(1, Ordering::SeqCst);

                debug!(generation, destinations = table.len(), "Forwarding table updated");
                if let Some(sink) = &self.sink {
                    sink.forwarding_table_updated(Arc::clone(&table));
                }
                self.handlers.dispatch(RoutingEvent::ForwardingTableUpdated {
                    generation,
                    destinations: table.len(),
                });
            },
            Err(e) => {
                error!(
                    generation,
                    error = %e,
                    "Recomputation failed, keeping previous forwarding table"
                );
                self.handlers
                    .dispatch(RoutingEvent::RecomputationFailed { error: e });
            },
        }
    }

    fn compute_table(
        &self,
        snapshot: &FlowStateSnapshot,
    ) -> std::result::Result<ForwardingTable, RoutingError> {
        let mut routes = Vec::new();
        for (qos_id, multiplier) in self.config.link_weights.classes() {
            let graph = RoutingGraph::build(snapshot, qos_id, multiplier, self.config.link_model);
            routes.extend(self.algorithm.compute_routing_table(&graph, self.address)?);
        }
        Ok(ForwardingTable::from_routes(snapshot.generation(), routes))
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Latest complete forwarding table
    pub fn current_forwarding_table(&self) -> Arc<ForwardingTable> {
        Arc::clone(&self.table.read())
    }

    /// Number of forwarding tables computed so far
    pub fn recompute_count(&self) -> u64 {
        self.recompute_count.load(Ordering::SeqCst)
    }

    /// State of the adjacency with `neighbor`, if any
    pub fn adjacency_state(&self, neighbor: Address) -> Option<AdjacencyState> {
        self.adjacencies.read().get(&neighbor).map(|a| a.state)
    }

    /// This node's address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Active configuration
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// The flow state database
    pub fn database(&self) -> &FlowStateDatabase {
        &self.db
    }

    /// Register an event handler
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(RoutingEvent) + Send + Sync + 'static,
    {
        self.handlers.subscribe(callback)
    }

    /// Remove an event handler
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.handlers.unsubscribe(handle);
    }

    fn publish(&self, object: &FlowStateObject) {
        if let Some(tree) = &self.tree {
            tree.publish_object(&object.key().object_name(), &FlowStateRecord::from(object));
        }
    }

    fn unpublish(&self, key: &FsoKey) {
        if let Some(tree) = &self.tree {
            tree.delete_object(&key.object_name());
        }
    }
}

/// Builder for [`LinkStatePolicy`]
pub struct LinkStatePolicyBuilder {
    address: Option<Address>,
    config: RoutingConfig,
    transport: Option<Arc<dyn NeighborTransport>>,
    tree: Option<Arc<dyn ManagementTree>>,
    sink: Option<Arc<dyn ForwardingTableSink>>,
    algorithm: Option<Box<dyn RoutingAlgorithm>>,
}

impl LinkStatePolicyBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self {
            address: None,
            config: RoutingConfig::default(),
            transport: None,
            tree: None,
            sink: None,
            algorithm: None,
        }
    }

    /// Set the local address (required)
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: RoutingConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the neighbor transport (required)
    pub fn with_transport(mut self, transport: Arc<dyn NeighborTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Mirror flow state objects into a management tree
    pub fn with_management_tree(mut self, tree: Arc<dyn ManagementTree>) -> Self {
        self.tree = Some(tree);
        self
    }

    /// Hand every new forwarding table to `sink`
    pub fn with_forwarding_sink(mut self, sink: Arc<dyn ForwardingTableSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Override the routing algorithm chosen from the configuration
    pub fn with_algorithm(mut self, algorithm: Box<dyn RoutingAlgorithm>) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    /// Validate and build the policy
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the address or transport is missing, the
    /// address is 0, or the configuration does not validate.
    pub fn build(self) -> Result<Arc<LinkStatePolicy>> {
        let address = self.address.ok_or_else(|| ConfigError::MissingRequiredField {
            field: "address".to_string(),
        })?;
        if address == 0 {
            return Err(ConfigError::InvalidValue {
                field: "address".to_string(),
                reason: "0 is not a valid address".to_string(),
            }
            .into());
        }
        let transport = self
            .transport
            .ok_or_else(|| ConfigError::MissingRequiredField {
                field: "transport".to_string(),
            })?;
        self.config.validate()?;

        let algorithm: Box<dyn RoutingAlgorithm> = match self.algorithm {
            Some(algorithm) => algorithm,
            None if self.config.loop_free_alternates => {
                Box::new(LoopFreeAlternates::new(EcmpDijkstra))
            },
            None => Box::new(EcmpDijkstra),
        };

        Ok(Arc::new(LinkStatePolicy {
            address,
            db: FlowStateDatabase::new(self.config.max_age),
            config: self.config,
            transport,
            tree: self.tree,
            sink: self.sink,
            algorithm,
            adjacencies: RwLock::new(BTreeMap::new()),
            table: RwLock::new(Arc::new(ForwardingTable::empty())),
            gate: RecomputeGate::default(),
            last_generation: Mutex::new(None),
            recompute_count: AtomicU64::new(0),
            recompute_signal: Arc::new(Notify::new()),
            pulls: PullTracker::new(),
            handlers: EventHandlers::new(),
            scheduler: Mutex::new(None),
            runtime: Mutex::new(Handle::try_current().ok()),
            tasks: Mutex::new(Vec::new()),
            deferred_pulls: Mutex::new(Vec::new()),
            deferred_inboxes: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }))
    }
}

impl Default for LinkStatePolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
