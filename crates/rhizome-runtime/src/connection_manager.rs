//! Signal queue, connection lifecycle and pruning.
//!
//! The manager owns the bounded signal queue and drives one processing
//! tick: route a batch, update per-connection metrics, recompute every
//! connection's state, run a learning pass and drop connections marked
//! for pruning.
//!
//! Connection states:
//!
//! | State         | Condition                          | On entry        |
//! |---------------|------------------------------------|-----------------|
//! | forming       | newly seen                         |                 |
//! | pruning       | strength < pruning threshold       | removed at tick end |
//! | strengthening | strength > strengthening threshold | weight x 1.1    |
//! | dormant       | idle longer than the dormancy time | weight x 0.95   |
//! | weakening     | more failures than successes       | weight x 0.9    |
//! | active        | otherwise                          |                 |

use crate::config::{ConnectionConfig, SignalConfig};
use crate::handle::GraphHandle;
use crate::learning::LearningEngine;
use crate::metrics::ConnectionMetrics;
use crate::pathfinder::Pathfinder;
use crate::router::{SignalRouter, StepOutcome};
use parking_lot::Mutex;
use rhizome_core::error::{Result, RhizomeError};
use rhizome_core::events::RemovalReason;
use rhizome_core::signal::{Signal, SignalOutcome, SignalRecord, SignalRequest, SignalState};
use rhizome_core::topology::Topology;
use rhizome_core::types::{ConnectionId, ConnectionType, NodeId, SignalId, Timestamp};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Forming,
    Active,
    Strengthening,
    Weakening,
    Dormant,
    Pruning,
}

/// Bounded FIFO of signals. A full queue drops its oldest entry.
#[derive(Clone)]
pub struct SignalQueue {
    inner: Arc<Mutex<VecDeque<Signal>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
    /// Continuations waiting out a latency timer.
    in_flight: Arc<AtomicUsize>,
}

impl SignalQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue, returning the signal that was dropped to make room.
    pub fn push(&self, signal: Signal) -> Option<Signal> {
        let mut queue = self.inner.lock();
        let dropped = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(signal);
        drop(queue);

        if let Some(old) = &dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(signal = %old.id, capacity = self.capacity, "signal queue full, dropped oldest");
        }
        dropped
    }

    pub fn pop_batch(&self, max: usize) -> Vec<Signal> {
        let mut queue = self.inner.lock();
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queued plus timer-delayed signals.
    pub fn pending(&self) -> usize {
        self.len() + self.in_flight.load(Ordering::SeqCst)
    }
}

/// Longest a continuation waits out its latency.
const MAX_HOP_DELAY: Duration = Duration::from_secs(60);

fn hop_delay(delay: f64) -> Duration {
    Duration::try_from_secs_f64(delay).map_or(MAX_HOP_DELAY, |d| d.min(MAX_HOP_DELAY))
}

/// Holds one slot of the in-flight count until dropped, so a timer task
/// that never fires still releases it.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What one processing tick did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub processed: usize,
    pub forwarded: usize,
    pub delivered: usize,
    pub failed: usize,
    pub state_changes: usize,
    pub learning_updates: usize,
    pub pruned: usize,
}

/// Collaborators a processing tick needs.
pub struct TickContext<'a> {
    pub graph: &'a GraphHandle,
    pub router: &'a SignalRouter,
    pub pathfinder: &'a Pathfinder,
    pub learning: &'a LearningEngine,
    pub now: Timestamp,
}

pub struct ConnectionManager {
    signals: SignalConfig,
    connections: ConnectionConfig,
    queue: SignalQueue,
    states: Mutex<HashMap<ConnectionId, ConnectionState>>,
    metrics: Mutex<HashMap<ConnectionId, ConnectionMetrics>>,
    history: Mutex<VecDeque<SignalRecord>>,
    sent: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl ConnectionManager {
    pub fn new(signals: SignalConfig, connections: ConnectionConfig) -> Self {
        Self {
            queue: SignalQueue::new(signals.max_queue),
            signals,
            connections,
            states: Mutex::new(HashMap::new()),
            metrics: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            sent: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Validate the source, queue the signal and return immediately.
    pub fn send_signal(
        &self,
        graph: &GraphHandle,
        learning: &LearningEngine,
        request: SignalRequest,
        now: Timestamp,
    ) -> Result<SignalId> {
        if !graph.read(|g| g.contains_node(&request.source)) {
            warn!(node = %request.source, "signal from unknown node rejected");
            return Err(RhizomeError::node_not_found(&request.source));
        }
        let mut signal = request.into_signal(now, self.signals.default_max_hops);
        signal.advance(SignalState::Queued);
        let id = signal.id.clone();

        learning.record_spike(&signal.source, now);
        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!(signal = %id, source = %signal.source, mode = ?signal.mode, "signal queued");
        self.queue.push(signal);
        Ok(id)
    }

    pub fn queue(&self) -> &SignalQueue {
        &self.queue
    }

    /// One processing tick.
    pub fn process_tick(&self, ctx: &TickContext<'_>) -> TickReport {
        let batch = self.queue.pop_batch(self.signals.batch_size);
        let mut report = TickReport {
            processed: batch.len(),
            ..TickReport::default()
        };

        for signal in batch {
            let step = ctx.router.route(ctx.graph, ctx.pathfinder, signal, ctx.now);

            for t in &step.traversed {
                ctx.graph.write(|g| {
                    if let Some(c) = g.connection_mut(&t.connection) {
                        c.strengthen(self.signals.traversal_boost, ctx.now);
                    }
                });
                self.metrics
                    .lock()
                    .entry(t.connection.clone())
                    .or_default()
                    .record_transmission(t.latency, t.strength, ctx.now);
            }
            for node in &step.spiked {
                ctx.learning.record_spike(node, ctx.now);
            }

            match step.outcome {
                StepOutcome::Forward { signal, delay } => {
                    report.forwarded += 1;
                    self.reschedule(signal, delay);
                }
                StepOutcome::Finished(record) => {
                    if record.outcome.is_delivered() {
                        report.delivered += 1;
                    } else {
                        report.failed += 1;
                    }
                    self.complete(ctx.graph, record);
                }
            }
        }

        report.state_changes = self.update_states(ctx.graph, ctx.now);
        report.learning_updates = ctx.learning.apply(ctx.graph);
        report.pruned = self.prune_marked(ctx.graph);
        report
    }

    /// Re-queue a continuation, on a timer when a runtime is available.
    fn reschedule(&self, signal: Signal, delay: f64) {
        if self.signals.defer_latency && delay > 0.0 {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let wait = hop_delay(delay);
                let queue = self.queue.clone();
                let in_flight = InFlight::enter(&queue.in_flight);
                handle.spawn(async move {
                    let _in_flight = in_flight;
                    tokio::time::sleep(wait).await;
                    queue.push(signal);
                });
                return;
            }
        }
        self.queue.push(signal);
    }

    fn complete(&self, graph: &GraphHandle, record: SignalRecord) {
        match record.outcome {
            SignalOutcome::Delivered => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                if record.hops > self.signals.long_path_hops {
                    info!(signal = %record.id, hops = record.hops, signal_type = ?record.signal_type, "long signal path");
                }
                debug!(signal = %record.id, hops = record.hops, strength = record.final_strength, "signal delivered");
            }
            SignalOutcome::Failed(reason) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let on_path: Vec<ConnectionId> = graph.read(|g| {
                    record
                        .path
                        .windows(2)
                        .filter_map(|w| g.connection_between(&w[0], &w[1]).map(|c| c.id.clone()))
                        .collect()
                });
                let mut metrics = self.metrics.lock();
                for id in on_path {
                    metrics.entry(id).or_default().failed_transmissions += 1;
                }
                debug!(signal = %record.id, reason = %reason, hops = record.hops, "signal failed");
            }
        }

        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.signals.history_size {
            history.pop_front();
        }
    }

    fn evaluate(
        &self,
        strength: f64,
        idle: f64,
        metrics: Option<&ConnectionMetrics>,
    ) -> ConnectionState {
        let failing = metrics.map_or(false, |m| m.failed_transmissions > m.successful_transmissions);
        if strength < self.connections.pruning_threshold {
            ConnectionState::Pruning
        } else if strength > self.connections.strengthening_threshold {
            ConnectionState::Strengthening
        } else if idle > self.connections.dormant_after_secs {
            ConnectionState::Dormant
        } else if failing {
            ConnectionState::Weakening
        } else {
            ConnectionState::Active
        }
    }

    /// Recompute every connection's state. Newly seen connections start
    /// as forming. Returns the number of transitions.
    pub fn update_states(&self, graph: &GraphHandle, now: Timestamp) -> usize {
        let live: Vec<(ConnectionId, f64, f64)> = graph.read(|g| {
            g.connections()
                .map(|c| (c.id.clone(), c.strength, c.idle_for(now)))
                .collect()
        });

        let mut transitions = Vec::new();
        {
            let mut states = self.states.lock();
            let mut metrics = self.metrics.lock();
            let ids: HashSet<&ConnectionId> = live.iter().map(|(id, _, _)| id).collect();
            states.retain(|id, _| ids.contains(id));
            metrics.retain(|id, _| ids.contains(id));

            for (id, strength, idle) in &live {
                let Some(old) = states.get(id).copied() else {
                    states.insert(id.clone(), ConnectionState::Forming);
                    continue;
                };
                let new = self.evaluate(*strength, *idle, metrics.get(id));
                if new != old {
                    states.insert(id.clone(), new);
                    transitions.push((id.clone(), new));
                }
            }
        }

        for (id, state) in &transitions {
            self.on_enter(graph, id, *state);
        }
        transitions.len()
    }

    /// Weight adjustment applied when a connection enters `state`.
    fn on_enter(&self, graph: &GraphHandle, id: &ConnectionId, state: ConnectionState) {
        let factor = match state {
            ConnectionState::Strengthening => self.connections.strengthen_factor,
            ConnectionState::Weakening => self.connections.weaken_factor,
            ConnectionState::Dormant => self.connections.dormant_factor,
            _ => return,
        };
        graph.write(|g| {
            if let Some(c) = g.connection_mut(id) {
                c.set_weight(c.weight * factor);
            }
        });
    }

    /// Force a connection into `state`, applying entry effects on change.
    pub fn set_state(&self, graph: &GraphHandle, id: &ConnectionId, state: ConnectionState) {
        let previous = self.states.lock().insert(id.clone(), state);
        if previous != Some(state) {
            self.on_enter(graph, id, state);
        }
    }

    pub fn mark_pruning(&self, id: &ConnectionId) {
        self.states
            .lock()
            .insert(id.clone(), ConnectionState::Pruning);
    }

    /// Remove every connection marked for pruning.
    pub fn prune_marked(&self, graph: &GraphHandle) -> usize {
        let marked: Vec<ConnectionId> = {
            let mut states = self.states.lock();
            let ids: Vec<ConnectionId> = states
                .iter()
                .filter(|(_, s)| **s == ConnectionState::Pruning)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                states.remove(id);
            }
            ids
        };
        if marked.is_empty() {
            return 0;
        }

        let mut pruned = 0;
        for id in &marked {
            self.metrics.lock().remove(id);
            if graph
                .write(|g| g.remove_connection_with(id, RemovalReason::Pruned))
                .is_some()
            {
                pruned += 1;
            }
        }
        debug!(pruned, "pruned connections");
        pruned
    }

    /// Strengthen (or create) every connection along the fewest-hop path
    /// from `source` to `target` and cache the route. False when no path
    /// exists.
    pub fn create_pathway(
        &self,
        graph: &GraphHandle,
        pathfinder: &Pathfinder,
        source: &NodeId,
        target: &NodeId,
        now: Timestamp,
    ) -> Result<bool> {
        for id in [source, target] {
            if !graph.read(|g| g.contains_node(id)) {
                return Err(RhizomeError::node_not_found(id));
            }
        }
        if source == target {
            return Ok(false);
        }
        let Some(path) =
            graph.read(|g| g.find_path(source, target, self.connections.pathway_max_depth))
        else {
            debug!(source = %source, target = %target, "no path for pathway");
            return Ok(false);
        };

        for pair in path.windows(2) {
            let id = graph.write(|g| -> Result<ConnectionId> {
                let id = match g.connection_between_mut(&pair[0], &pair[1]) {
                    Some(c) => {
                        c.strengthen(self.connections.pathway_boost, now);
                        c.id.clone()
                    }
                    None => {
                        g.add_connection(
                            &pair[0],
                            &pair[1],
                            ConnectionType::Synaptic,
                            self.connections.pathway_initial_strength,
                            1.0,
                            now,
                        )?
                        .id
                    }
                };
                if let Some(c) = g.connection_mut(&id) {
                    c.metadata.insert("pathway".to_string(), Value::Bool(true));
                }
                Ok(id)
            })?;
            self.set_state(graph, &id, ConnectionState::Strengthening);
        }

        pathfinder.cache_path(&path);
        info!(source = %source, target = %target, hops = path.len() - 1, "pathway created");
        Ok(true)
    }

    pub fn connection_state(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.states.lock().get(id).copied()
    }

    pub fn connection_metrics(&self, id: &ConnectionId) -> Option<ConnectionMetrics> {
        self.metrics.lock().get(id).cloned()
    }

    pub fn state_histogram(&self) -> BTreeMap<ConnectionState, usize> {
        let mut histogram = BTreeMap::new();
        for state in self.states.lock().values() {
            *histogram.entry(*state).or_insert(0) += 1;
        }
        histogram
    }

    /// Most recent finished signals, oldest first.
    pub fn history(&self) -> Vec<SignalRecord> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn record(&self, id: &SignalId) -> Option<SignalRecord> {
        self.history.lock().iter().rev().find(|r| &r.id == id).cloned()
    }

    pub fn signals_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn signals_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn signals_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::event_bus::EventBus;
    use crate::topology_impl::{NewNode, RhizomeGraph};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rhizome_core::types::{NodeType, Position, SignalType};

    fn make_graph() -> GraphHandle {
        let mut g = RhizomeGraph::new(GraphConfig::default(), StdRng::seed_from_u64(8));
        for (id, x) in [("a", 0.0), ("b", 10.0), ("c", 20.0)] {
            g.add_node(
                NewNode::new(NodeType::Processing)
                    .with_id(id)
                    .at(Position::new(x, 0.0, 0.0)),
                0.0,
            )
            .unwrap();
        }
        GraphHandle::new(g, EventBus::default())
    }

    fn connect(graph: &GraphHandle, a: &str, b: &str, strength: f64) -> ConnectionId {
        graph
            .write(|g| g.add_connection(&a.into(), &b.into(), ConnectionType::Synaptic, strength, 1.0, 0.0))
            .unwrap()
            .id
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(SignalConfig::default(), ConnectionConfig::default())
    }

    fn signal(source: &str) -> Signal {
        SignalRequest::new(SignalType::Activation, source).into_signal(0.0, 10)
    }

    #[test]
    fn hop_delays_are_bounded() {
        assert_eq!(hop_delay(0.25), Duration::from_millis(250));
        assert_eq!(hop_delay(1e300), MAX_HOP_DELAY);
        assert_eq!(hop_delay(f64::MAX), MAX_HOP_DELAY);
        assert_eq!(hop_delay(f64::INFINITY), MAX_HOP_DELAY);
    }

    #[test]
    fn cancelled_continuation_leaves_the_pending_count() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let m = manager();
        {
            let _enter = runtime.enter();
            m.reschedule(signal("a"), f64::INFINITY);
        }
        assert!(m.queue().is_empty());
        assert_eq!(m.queue().pending(), 1);

        // Dropping the runtime drops the timer task before it fires.
        drop(runtime);
        assert_eq!(m.queue().pending(), 0);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = SignalQueue::new(2);
        let first = signal("a");
        let first_id = first.id.clone();
        assert!(queue.push(first).is_none());
        assert!(queue.push(signal("b")).is_none());
        let dropped = queue.push(signal("c")).unwrap();
        assert_eq!(dropped.id, first_id);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop_batch(10).len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn unknown_source_is_rejected() {
        let graph = make_graph();
        let learning = LearningEngine::new(Default::default(), StdRng::seed_from_u64(1));
        let err = manager()
            .send_signal(&graph, &learning, SignalRequest::new(SignalType::Query, "ghost"), 0.0)
            .unwrap_err();
        assert!(matches!(err, RhizomeError::NotFound(_)));
    }

    #[test]
    fn states_follow_strength_and_idle_time() {
        let graph = make_graph();
        let strong = connect(&graph, "a", "b", 0.9);
        let weak = connect(&graph, "b", "c", 0.01);
        let idle = connect(&graph, "a", "c", 0.5);
        let m = manager();

        m.update_states(&graph, 0.0);
        assert_eq!(m.connection_state(&strong), Some(ConnectionState::Forming));

        m.update_states(&graph, 400.0);
        assert_eq!(m.connection_state(&strong), Some(ConnectionState::Strengthening));
        assert_eq!(m.connection_state(&weak), Some(ConnectionState::Pruning));
        assert_eq!(m.connection_state(&idle), Some(ConnectionState::Dormant));

        let weights = graph.read(|g| {
            (
                g.connection(&strong).unwrap().weight,
                g.connection(&idle).unwrap().weight,
            )
        });
        assert!((weights.0 - 1.1).abs() < 1e-12);
        assert!((weights.1 - 0.95).abs() < 1e-12);

        assert_eq!(m.prune_marked(&graph), 1);
        assert!(graph.read(|g| g.connection(&weak).is_none()));
        assert_eq!(m.state_histogram().get(&ConnectionState::Pruning), None);
    }

    #[test]
    fn failures_outnumbering_successes_weaken() {
        let graph = make_graph();
        let id = connect(&graph, "a", "b", 0.5);
        let m = manager();
        m.update_states(&graph, 0.0);
        m.metrics.lock().entry(id.clone()).or_default().failed_transmissions = 3;
        m.update_states(&graph, 1.0);
        assert_eq!(m.connection_state(&id), Some(ConnectionState::Weakening));
        assert!((graph.read(|g| g.connection(&id).unwrap().weight) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn pathway_strengthens_every_hop() {
        let graph = make_graph();
        let ab = connect(&graph, "a", "b", 0.3);
        let bc = connect(&graph, "c", "b", 0.3);
        let m = manager();
        let pf = Pathfinder::new(Default::default(), StdRng::seed_from_u64(1));

        assert!(m
            .create_pathway(&graph, &pf, &"a".into(), &"c".into(), 1.0)
            .unwrap());
        for id in [&ab, &bc] {
            let c = graph.read(|g| g.connection(id).cloned()).unwrap();
            assert!((c.strength - 0.5).abs() < 1e-12);
            assert_eq!(c.metadata.get("pathway"), Some(&Value::Bool(true)));
            assert_eq!(m.connection_state(id), Some(ConnectionState::Strengthening));
        }
        assert_eq!(
            pf.cached_path(&"a".into(), &"c".into()).map(|p| p.len()),
            Some(3)
        );
    }

    #[test]
    fn pathway_without_route_is_false() {
        let graph = make_graph();
        let m = manager();
        let pf = Pathfinder::new(Default::default(), StdRng::seed_from_u64(1));
        assert!(!m
            .create_pathway(&graph, &pf, &"a".into(), &"c".into(), 0.0)
            .unwrap());
        assert!(m
            .create_pathway(&graph, &pf, &"a".into(), &"nowhere".into(), 0.0)
            .is_err());
    }
}
