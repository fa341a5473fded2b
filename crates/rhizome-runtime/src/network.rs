//! The rhizome network handle.
//!
//! [`Rhizome`] owns the graph store and every component around it. It is
//! cheap to clone; clones share the same network. Nothing runs in the
//! background until [`Rhizome::start`] is called, and the synchronous
//! [`Rhizome::process_tick`] / [`Rhizome::maintenance_tick`] drive the
//! network by hand.
//!
//! # Example
//!
//! ```rust
//! use rhizome_runtime::prelude::*;
//!
//! let rhizome = Rhizome::builder().seed(7).build().unwrap();
//! let a = rhizome.add_node(NewNode::new(NodeType::Memory).with_id("a")).unwrap();
//! let b = rhizome.add_node(NewNode::new(NodeType::Processing).with_id("b")).unwrap();
//! rhizome.add_connection(&a.id, &b.id, ConnectionType::Synaptic, 0.9).unwrap();
//!
//! rhizome.send_signal(SignalRequest::new(SignalType::Activation, "a").to("b")).unwrap();
//! rhizome.process_until_idle(10);
//! assert_eq!(rhizome.statistics().signals_delivered, 1);
//! ```

use crate::builder::RhizomeBuilder;
use crate::config::RhizomeConfig;
use crate::connection_manager::{ConnectionManager, ConnectionState, TickContext, TickReport};
use crate::handle::GraphHandle;
use crate::learning::LearningEngine;
use crate::maintenance::{MaintenanceContext, MaintenanceReport, MaintenanceScheduler};
use crate::metrics::{ConnectionMetrics, RhizomeStats};
use crate::pathfinder::{
    analyze_connectivity, find_all_paths, ConnectivityReport, FoundPath, PathAlgorithm, Pathfinder,
};
use crate::router::SignalRouter;
use crate::scheduler::spawn_loop;
use crate::session;
use crate::topology_impl::{NewNode, NodeQuery};
use parking_lot::Mutex;
use rhizome_core::capability::{Persistable, SnapshotHook};
use rhizome_core::clock::Clock;
use rhizome_core::error::{Result, RhizomeError};
use rhizome_core::events::{EventKind, RhizomeEvent};
use rhizome_core::signal::{SignalRecord, SignalRequest};
use rhizome_core::snapshot::GraphSnapshot;
use rhizome_core::topology::Topology;
use rhizome_core::types::*;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Core nodes created by [`Rhizome::seed_network`].
const SEED_NODES: [(NodeType, &str, [f64; 3]); 5] = [
    (NodeType::Consciousness, "primary_consciousness", [0.0, 0.0, 0.0]),
    (NodeType::Memory, "central_memory", [10.0, 0.0, 0.0]),
    (NodeType::Processing, "main_processor", [-10.0, 0.0, 0.0]),
    (NodeType::Sensory, "primary_sensor", [0.0, 10.0, 0.0]),
    (NodeType::Actuator, "primary_actuator", [0.0, -10.0, 0.0]),
];

const SEED_STRENGTH: f64 = 0.5;

/// Everything the background loops share with the handle.
pub(crate) struct Inner {
    pub(crate) config: RhizomeConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) graph: GraphHandle,
    pub(crate) router: SignalRouter,
    pub(crate) pathfinder: Pathfinder,
    pub(crate) learning: LearningEngine,
    pub(crate) manager: ConnectionManager,
    pub(crate) maintenance: MaintenanceScheduler,
    pub(crate) hook: Option<Arc<dyn SnapshotHook>>,
}

impl Inner {
    fn process_tick(&self) -> TickReport {
        self.manager.process_tick(&TickContext {
            graph: &self.graph,
            router: &self.router,
            pathfinder: &self.pathfinder,
            learning: &self.learning,
            now: self.clock.now(),
        })
    }

    fn maintenance_tick(&self) -> MaintenanceReport {
        self.maintenance.run_cycle(&MaintenanceContext {
            graph: &self.graph,
            manager: &self.manager,
            pathfinder: &self.pathfinder,
            hook: self.hook.as_deref(),
            now: self.clock.now(),
        })
    }
}

struct Loops {
    cancel: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

#[derive(Clone)]
pub struct Rhizome {
    inner: Arc<Inner>,
    loops: Arc<Mutex<Option<Loops>>>,
}

impl Rhizome {
    pub fn builder() -> RhizomeBuilder {
        RhizomeBuilder::new()
    }

    /// A network with `config`, the system clock and no snapshot hook.
    pub fn new(config: RhizomeConfig) -> Result<Self> {
        RhizomeBuilder::new().config(config).build()
    }

    pub(crate) fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
            loops: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &RhizomeConfig {
        &self.inner.config
    }

    pub fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    /// Direct access to the graph store.
    pub fn graph(&self) -> &GraphHandle {
        &self.inner.graph
    }

    // ---- structure ----

    pub fn add_node(&self, spec: NewNode) -> Result<Node> {
        let now = self.now();
        let node = self.inner.graph.write(|g| g.add_node(spec, now)).map_err(|e| {
            warn!(error = %e, "add_node rejected");
            e
        })?;
        debug!(node = %node.id, node_type = %node.node_type, "node added");
        Ok(node)
    }

    /// Remove a node and every connection touching it. False if absent.
    pub fn remove_node(&self, id: &NodeId) -> bool {
        let removed = self.inner.graph.write(|g| g.remove_node(id));
        if removed {
            self.inner.learning.forget(id);
            debug!(node = %id, "node removed");
        }
        removed
    }

    /// Connect `source` to `target` with unit weight.
    pub fn add_connection(
        &self,
        source: &NodeId,
        target: &NodeId,
        connection_type: ConnectionType,
        strength: f64,
    ) -> Result<Connection> {
        self.add_weighted_connection(source, target, connection_type, strength, 1.0)
    }

    pub fn add_weighted_connection(
        &self,
        source: &NodeId,
        target: &NodeId,
        connection_type: ConnectionType,
        strength: f64,
        weight: f64,
    ) -> Result<Connection> {
        let now = self.now();
        self.inner
            .graph
            .write(|g| g.add_connection(source, target, connection_type, strength, weight, now))
            .map_err(|e| {
                warn!(source = %source, target = %target, error = %e, "add_connection rejected");
                e
            })
    }

    pub fn remove_connection(&self, id: &ConnectionId) -> bool {
        self.inner.graph.write(|g| g.remove_connection(id))
    }

    /// Pair two nodes for quantum signals. False if already paired.
    pub fn entangle(&self, a: &NodeId, b: &NodeId) -> Result<bool> {
        self.inner.graph.write(|g| g.entangle(a, b))
    }

    pub fn disentangle(&self, a: &NodeId, b: &NodeId) -> bool {
        self.inner.graph.write(|g| g.disentangle(a, b))
    }

    /// Raise a node's activation. Entanglement partners receive a share.
    pub fn activate_node(&self, id: &NodeId, amount: f64) -> Result<f64> {
        let now = self.now();
        let activation = self
            .inner
            .graph
            .write(|g| g.activate_node(id, amount, now))
            .ok_or_else(|| RhizomeError::node_not_found(id))?;
        self.inner.learning.record_spike(id, now);
        Ok(activation)
    }

    pub fn node(&self, id: &NodeId) -> Option<Node> {
        self.inner.graph.read(|g| g.node(id).cloned())
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<Connection> {
        self.inner.graph.read(|g| g.connection(id).cloned())
    }

    /// The connection between two nodes in either direction.
    pub fn connection_between(&self, a: &NodeId, b: &NodeId) -> Option<Connection> {
        self.inner.graph.read(|g| g.connection_between(a, b).cloned())
    }

    /// Neighbours in either direction, sorted.
    pub fn get_neighbors(&self, id: &NodeId) -> Vec<NodeId> {
        self.inner
            .graph
            .read(|g| g.neighbors(id, true).into_iter().collect())
    }

    pub fn find_nodes(&self, query: &NodeQuery) -> Vec<Node> {
        self.inner.graph.read(|g| g.find_nodes(query))
    }

    pub fn node_count(&self) -> usize {
        self.inner.graph.read(|g| g.node_count())
    }

    pub fn connection_count(&self) -> usize {
        self.inner.graph.read(|g| g.connection_count())
    }

    /// Create the five core nodes, fully connected. Returns their ids.
    pub fn seed_network(&self) -> Result<Vec<NodeId>> {
        let mut ids = Vec::with_capacity(SEED_NODES.len());
        for (node_type, name, [x, y, z]) in SEED_NODES {
            let node = self.add_node(
                NewNode::new(node_type)
                    .at(Position::new(x, y, z))
                    .with_data("name", Value::from(name))
                    .with_data("is_seed", Value::Bool(true)),
            )?;
            ids.push(node.id);
        }
        for (i, source) in ids.iter().enumerate() {
            for target in &ids[i + 1..] {
                self.add_connection(source, target, ConnectionType::Synaptic, SEED_STRENGTH)?;
            }
        }
        info!(nodes = ids.len(), "seed network created");
        Ok(ids)
    }

    // ---- signals ----

    /// Queue a signal and return its id at once. Delivery failures show
    /// up in the statistics and history, never as an error here.
    pub fn send_signal(&self, request: SignalRequest) -> Result<SignalId> {
        self.inner
            .manager
            .send_signal(&self.inner.graph, &self.inner.learning, request, self.now())
    }

    /// Strengthen or create every connection along the fewest-hop path
    /// and cache it. False when no path exists.
    pub fn create_pathway(&self, source: &NodeId, target: &NodeId) -> Result<bool> {
        self.inner.manager.create_pathway(
            &self.inner.graph,
            &self.inner.pathfinder,
            source,
            target,
            self.now(),
        )
    }

    pub fn find_path(
        &self,
        source: &NodeId,
        target: &NodeId,
        algorithm: PathAlgorithm,
    ) -> Option<FoundPath> {
        let pathfinder = &self.inner.pathfinder;
        self.inner
            .graph
            .read(|g| pathfinder.find_path(g, source, target, algorithm))
    }

    /// Simple routes of at most `max_hops` hops, cheapest first.
    pub fn find_all_paths(
        &self,
        source: &NodeId,
        target: &NodeId,
        max_paths: usize,
        max_hops: usize,
    ) -> Vec<FoundPath> {
        self.inner
            .graph
            .read(|g| find_all_paths(g, source, target, max_paths, max_hops))
    }

    /// A route through `waypoints` in order.
    pub fn find_path_through(&self, waypoints: &[NodeId], algorithm: PathAlgorithm) -> Option<FoundPath> {
        let pathfinder = &self.inner.pathfinder;
        self.inner
            .graph
            .read(|g| pathfinder.find_path_through(g, waypoints, algorithm))
    }

    pub fn analyze_connectivity(&self) -> ConnectivityReport {
        self.inner.graph.read(|g| analyze_connectivity(g))
    }

    /// Finished signals, oldest first.
    pub fn signal_history(&self) -> Vec<SignalRecord> {
        self.inner.manager.history()
    }

    pub fn signal_record(&self, id: &SignalId) -> Option<SignalRecord> {
        self.inner.manager.record(id)
    }

    pub fn connection_metrics(&self, id: &ConnectionId) -> Option<ConnectionMetrics> {
        self.inner.manager.connection_metrics(id)
    }

    pub fn connection_state(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.inner.manager.connection_state(id)
    }

    /// Queued signals plus those waiting out a hop latency.
    pub fn pending_signals(&self) -> usize {
        self.inner.manager.queue().pending()
    }

    // ---- events ----

    /// Receive every event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RhizomeEvent> {
        self.inner.graph.bus().subscribe()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&RhizomeEvent) + Send + Sync + 'static,
    {
        self.inner.graph.bus().on(kind, handler);
    }

    // ---- ticks ----

    /// Process one batch of queued signals.
    pub fn process_tick(&self) -> TickReport {
        self.inner.process_tick()
    }

    pub fn maintenance_tick(&self) -> MaintenanceReport {
        self.inner.maintenance_tick()
    }

    /// Process ticks until the queue is empty or `max_ticks` have run.
    /// Signals waiting on a latency timer are not waited for. Returns the
    /// number of ticks run.
    pub fn process_until_idle(&self, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks && !self.inner.manager.queue().is_empty() {
            self.inner.process_tick();
            ticks += 1;
        }
        ticks
    }

    pub fn statistics(&self) -> RhizomeStats {
        let inner = &self.inner;
        let graph = inner.graph.read(|g| g.stats());
        let sent = inner.manager.signals_sent();
        let delivered = inner.manager.signals_delivered();
        RhizomeStats {
            signals_sent: sent,
            signals_delivered: delivered,
            signals_failed: inner.manager.signals_failed(),
            signals_dropped: inner.manager.queue().dropped(),
            delivery_rate: if sent == 0 {
                0.0
            } else {
                delivered as f64 / sent as f64
            },
            queue_len: inner.manager.queue().pending(),
            connection_state_histogram: inner.manager.state_histogram(),
            cache_hit_rate: inner.pathfinder.hit_rate(),
            cache_size: inner.pathfinder.cache_len(),
            learning_updates: inner.learning.updates(),
            learning_threshold: inner.learning.threshold(),
            entangled_pair_count: graph.entangled_pairs,
            reorganization_count: inner.maintenance.reorganizations(),
            maintenance_cycles: inner.maintenance.cycles(),
            snapshots_taken: inner.maintenance.snapshots(),
            graph,
        }
    }

    // ---- persistence ----

    pub fn snapshot(&self) -> GraphSnapshot {
        let mut snapshot = self.inner.graph.read(|g| g.snapshot());
        snapshot.metadata.saved_at = self.now();
        snapshot
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        session::save_snapshot(&snapshot, path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "save failed");
            e
        })?;
        info!(
            path = %path.display(),
            nodes = snapshot.metadata.node_count,
            connections = snapshot.metadata.connection_count,
            "rhizome saved"
        );
        Ok(())
    }

    /// Replace the whole graph with the one saved at `path`. On error the
    /// current graph is left untouched.
    pub fn load(&self, path: &Path) -> Result<()> {
        let snapshot = session::load_snapshot(path)?;
        self.restore(snapshot)?;
        info!(path = %path.display(), nodes = self.node_count(), "rhizome loaded");
        Ok(())
    }

    pub fn restore(&self, snapshot: GraphSnapshot) -> Result<()> {
        self.inner.graph.write(|g| g.restore(snapshot))?;
        self.inner.pathfinder.clear();
        Ok(())
    }

    // ---- lifecycle ----

    /// Spawn the processing and maintenance loops on the current tokio
    /// runtime.
    pub fn start(&self) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(RhizomeError::Runtime(
                "start must be called within a tokio runtime".into(),
            ));
        }
        let mut loops = self.loops.lock();
        if loops.is_some() {
            return Err(RhizomeError::Runtime("rhizome is already running".into()));
        }

        let (cancel, rx) = watch::channel(false);
        let processing = {
            let inner = self.inner.clone();
            spawn_loop("processing", self.config().signals.process_hz, rx.clone(), move || {
                inner.process_tick();
            })
        };
        let maintenance = {
            let inner = self.inner.clone();
            spawn_loop("maintenance", self.config().maintenance.maintenance_hz, rx, move || {
                inner.maintenance_tick();
            })
        };
        *loops = Some(Loops {
            cancel,
            handles: vec![("processing", processing), ("maintenance", maintenance)],
        });
        info!(
            process_hz = self.config().signals.process_hz,
            maintenance_hz = self.config().maintenance.maintenance_hz,
            "rhizome started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.loops.lock().is_some()
    }

    /// Stop both loops, waiting at most the configured timeout before
    /// aborting them, then flush a final snapshot if configured.
    pub async fn shutdown(&self) {
        let loops = self.loops.lock().take();
        if let Some(Loops { cancel, handles }) = loops {
            let _ = cancel.send(true);
            let timeout = Duration::from_secs_f64(self.config().maintenance.shutdown_timeout_secs);
            let deadline = tokio::time::Instant::now() + timeout;
            for (name, mut handle) in handles {
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(loop_name = name, error = %e, "loop task failed"),
                    Err(_) => {
                        warn!(loop_name = name, "loop did not stop in time, aborting");
                        handle.abort();
                    }
                }
            }
        }
        self.flush();
        info!("rhizome shut down");
    }

    /// Final snapshot on shutdown. Failures are logged only.
    fn flush(&self) {
        let persistence = &self.config().persistence;
        if !persistence.save_on_shutdown {
            return;
        }
        let result = if let Some(path) = &persistence.snapshot_path {
            self.save(path)
        } else if let Some(hook) = &self.inner.hook {
            hook.save(&self.snapshot())
        } else {
            return;
        };
        if let Err(e) = result {
            warn!(error = %e, "final snapshot failed");
        }
    }
}

impl std::fmt::Debug for Rhizome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rhizome")
            .field("nodes", &self.node_count())
            .field("connections", &self.connection_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhizome_core::types::SignalType;

    fn rhizome() -> Rhizome {
        Rhizome::builder().seed(11).build().unwrap()
    }

    #[test]
    fn seed_network_is_fully_connected() {
        let r = rhizome();
        let ids = r.seed_network().unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(r.connection_count(), 10);
        for id in &ids {
            assert_eq!(r.get_neighbors(id).len(), 4);
        }
        let memory = r.node(&ids[1]).unwrap();
        assert_eq!(memory.node_type, NodeType::Memory);
        assert_eq!(memory.position, Position::new(10.0, 0.0, 0.0));
        assert_eq!(memory.data.get("is_seed"), Some(&Value::Bool(true)));
    }

    #[test]
    fn activating_unknown_node_fails() {
        let r = rhizome();
        assert!(matches!(
            r.activate_node(&"ghost".into(), 0.5),
            Err(RhizomeError::NotFound(_))
        ));
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let r = rhizome();
        assert!(matches!(r.start(), Err(RhizomeError::Runtime(_))));
        assert!(!r.is_running());
    }

    #[test]
    fn statistics_before_traffic() {
        let r = rhizome();
        let stats = r.statistics();
        assert_eq!(stats.signals_sent, 0);
        assert_eq!(stats.delivery_rate, 0.0);
        assert_eq!(stats.graph.node_count, 0);
    }

    #[test]
    fn delivery_rate_counts_failures() {
        let r = rhizome();
        r.add_node(NewNode::new(NodeType::Relay).with_id("lonely")).unwrap();
        r.add_node(NewNode::new(NodeType::Relay).with_id("other")).unwrap();
        r.send_signal(SignalRequest::new(SignalType::Response, "lonely").to("other"))
            .unwrap();
        r.process_until_idle(5);
        let stats = r.statistics();
        assert_eq!(stats.signals_sent, 1);
        assert_eq!(stats.signals_failed, 1);
        assert_eq!(stats.delivery_rate, 0.0);
    }
}
