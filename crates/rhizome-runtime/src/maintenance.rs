//! Periodic upkeep of the rhizome.
//!
//! One maintenance cycle:
//! 1. decays every node's activation,
//! 2. decays connections idle past the grace period and prunes the ones
//!    that fall below the floor,
//! 3. self-organizes around one random node,
//! 4. occasionally hands a snapshot to the snapshot hook,
//! 5. trims the path cache.

use crate::config::{ConnectionConfig, MaintenanceConfig};
use crate::connection_manager::ConnectionManager;
use crate::handle::GraphHandle;
use crate::pathfinder::Pathfinder;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use rhizome_core::capability::{Persistable, SnapshotHook};
use rhizome_core::events::RemovalReason;
use rhizome_core::topology::Topology;
use rhizome_core::types::{ConnectionId, NodeId, Timestamp};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// What one maintenance cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub decayed_connections: usize,
    pub pruned: usize,
    pub reorganized: bool,
    pub new_connections: usize,
    pub snapshot_taken: bool,
    pub evicted_paths: usize,
}

/// Collaborators a maintenance cycle needs.
pub struct MaintenanceContext<'a> {
    pub graph: &'a GraphHandle,
    pub manager: &'a ConnectionManager,
    pub pathfinder: &'a Pathfinder,
    pub hook: Option<&'a dyn SnapshotHook>,
    pub now: Timestamp,
}

pub struct MaintenanceScheduler {
    config: MaintenanceConfig,
    pruning_threshold: f64,
    rng: Mutex<StdRng>,
    cycles: AtomicU64,
    reorganizations: AtomicU64,
    snapshots: AtomicU64,
}

impl MaintenanceScheduler {
    pub fn new(config: MaintenanceConfig, connections: &ConnectionConfig, rng: StdRng) -> Self {
        Self {
            config,
            pruning_threshold: connections.pruning_threshold,
            rng: Mutex::new(rng),
            cycles: AtomicU64::new(0),
            reorganizations: AtomicU64::new(0),
            snapshots: AtomicU64::new(0),
        }
    }

    pub fn run_cycle(&self, ctx: &MaintenanceContext<'_>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        self.decay_activations(ctx.graph);
        report.decayed_connections = self.decay_idle(ctx.graph, ctx.now);
        report.pruned = self.prune_weak(ctx);

        if self.config.auto_organize {
            let (reorganized, made) = self.self_organize(ctx);
            report.reorganized = reorganized;
            report.new_connections = made;
        }

        if let Some(hook) = ctx.hook {
            if self.rng.lock().gen::<f64>() < self.config.snapshot_probability {
                report.snapshot_taken = self.take_snapshot(ctx.graph, hook, ctx.now);
            }
        }

        report.evicted_paths = ctx.pathfinder.evict_if_over_capacity();
        self.cycles.fetch_add(1, Ordering::Relaxed);
        report
    }

    /// Linear activation decay. Active nodes are collected under the read
    /// lock and each one is decayed under its own write.
    fn decay_activations(&self, graph: &GraphHandle) {
        let rate = self.config.activation_decay;
        let active: Vec<NodeId> = graph.read(|g| {
            g.nodes()
                .filter(|n| n.activation > 0.0)
                .map(|n| n.id.clone())
                .collect()
        });
        for id in &active {
            graph.write(|g| {
                if let Some(node) = g.node_mut(id) {
                    node.decay_activation(rate);
                }
            });
        }
    }

    /// Weaken connections idle longer than the grace period in proportion
    /// to their idle time.
    fn decay_idle(&self, graph: &GraphHandle, now: Timestamp) -> usize {
        self.idle_connections(graph, now)
            .iter()
            .filter(|id| self.decay_connection(graph, id, now))
            .count()
    }

    fn idle_connections(&self, graph: &GraphHandle, now: Timestamp) -> Vec<ConnectionId> {
        let grace = self.config.idle_grace_secs;
        graph.read(|g| {
            g.connections()
                .filter(|c| c.idle_for(now) > grace)
                .map(|c| c.id.clone())
                .collect()
        })
    }

    /// Idleness is checked again under the write lock: the connection may
    /// have carried traffic since it was collected.
    fn decay_connection(&self, graph: &GraphHandle, id: &ConnectionId, now: Timestamp) -> bool {
        let grace = self.config.idle_grace_secs;
        let rate = self.config.connection_decay_rate;
        graph.write(|g| match g.connection_mut(id) {
            Some(c) if c.idle_for(now) > grace => {
                let idle = c.idle_for(now);
                c.weaken(rate * idle / 60.0);
                true
            }
            _ => false,
        })
    }

    fn prune_weak(&self, ctx: &MaintenanceContext<'_>) -> usize {
        let floor = self.config.prune_below.max(self.pruning_threshold);
        let weak: Vec<ConnectionId> = ctx.graph.read(|g| {
            g.connections()
                .filter(|c| c.strength < floor)
                .map(|c| c.id.clone())
                .collect()
        });
        for id in &weak {
            ctx.manager.mark_pruning(id);
        }
        ctx.manager.prune_marked(ctx.graph)
    }

    /// Pick one node, maybe drop its weakest outgoing connection, and grow
    /// new ones if it is sparsely connected.
    fn self_organize(&self, ctx: &MaintenanceContext<'_>) -> (bool, usize) {
        let Some(node) = ctx.graph.write(|g| g.random_node_id()) else {
            return (false, 0);
        };
        let mut reorganized = false;

        if self.rng.lock().gen::<f64>() < self.config.reorganize_probability {
            let below = self.config.reorganize_prune_below;
            let removed = ctx.graph.write(|g| {
                let weakest = g
                    .weakest_outgoing(&node)
                    .filter(|c| c.strength < below)
                    .map(|c| c.id.clone())?;
                g.remove_connection_with(&weakest, RemovalReason::Reorganized)
            });
            if let Some(c) = removed {
                debug!(node = %node, connection = %c.id, strength = c.strength, "reorganized away weak connection");
                reorganized = true;
            }
        }

        let made = ctx.graph.write(|g| {
            let sparse = g
                .node(&node)
                .map_or(false, |n| n.degree() < g.config().max_connections_per_node / 2);
            if sparse {
                g.auto_connect(&node, ctx.now)
            } else {
                0
            }
        });
        if made > 0 {
            debug!(node = %node, made, "self-organization grew connections");
            reorganized = true;
        }

        if reorganized {
            self.reorganizations.fetch_add(1, Ordering::Relaxed);
        }
        (reorganized, made)
    }

    /// Failures are logged and otherwise ignored.
    fn take_snapshot(&self, graph: &GraphHandle, hook: &dyn SnapshotHook, now: Timestamp) -> bool {
        let mut snapshot = graph.read(|g| g.snapshot());
        snapshot.metadata.saved_at = now;
        match hook.save(&snapshot) {
            Ok(()) => {
                self.snapshots.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(error = %e, "periodic snapshot failed");
                false
            }
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn reorganizations(&self) -> u64 {
        self.reorganizations.load(Ordering::Relaxed)
    }

    pub fn snapshots(&self) -> u64 {
        self.snapshots.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphConfig, SignalConfig};
    use crate::event_bus::EventBus;
    use crate::topology_impl::{NewNode, RhizomeGraph};
    use rand::SeedableRng;
    use rhizome_core::error::{Result, RhizomeError};
    use rhizome_core::snapshot::GraphSnapshot;
    use rhizome_core::types::{ConnectionType, NodeType, Position};

    struct Fixture {
        graph: GraphHandle,
        manager: ConnectionManager,
        pathfinder: Pathfinder,
    }

    impl Fixture {
        fn new() -> Self {
            let mut g = RhizomeGraph::new(GraphConfig::default(), StdRng::seed_from_u64(5));
            for (id, x) in [("a", 0.0), ("b", 100.0)] {
                g.add_node(
                    NewNode::new(NodeType::Processing)
                        .with_id(id)
                        .at(Position::new(x, 0.0, 0.0)),
                    0.0,
                )
                .unwrap();
            }
            Self {
                graph: GraphHandle::new(g, EventBus::default()),
                manager: ConnectionManager::new(SignalConfig::default(), ConnectionConfig::default()),
                pathfinder: Pathfinder::new(Default::default(), StdRng::seed_from_u64(6)),
            }
        }

        fn connect(&self, strength: f64) -> ConnectionId {
            self.graph
                .write(|g| {
                    g.add_connection(&"a".into(), &"b".into(), ConnectionType::Synaptic, strength, 1.0, 0.0)
                })
                .unwrap()
                .id
        }

        fn ctx<'a>(&'a self, hook: Option<&'a dyn SnapshotHook>, now: Timestamp) -> MaintenanceContext<'a> {
            MaintenanceContext {
                graph: &self.graph,
                manager: &self.manager,
                pathfinder: &self.pathfinder,
                hook,
                now,
            }
        }
    }

    fn scheduler(config: MaintenanceConfig) -> MaintenanceScheduler {
        MaintenanceScheduler::new(config, &ConnectionConfig::default(), StdRng::seed_from_u64(7))
    }

    fn quiet() -> MaintenanceConfig {
        MaintenanceConfig {
            auto_organize: false,
            snapshot_probability: 0.0,
            ..MaintenanceConfig::default()
        }
    }

    #[test]
    fn weak_connection_is_pruned_in_one_cycle() {
        let fx = Fixture::new();
        let id = fx.connect(0.05);
        let report = scheduler(quiet()).run_cycle(&fx.ctx(None, 0.0));
        assert_eq!(report.pruned, 1);
        assert!(fx.graph.read(|g| g.connection(&id).is_none()));
        assert!(fx.graph.read(|g| g.neighbors(&"a".into(), true).is_empty()));
    }

    #[test]
    fn idle_decay_starts_after_grace_period() {
        let fx = Fixture::new();
        let id = fx.connect(0.5);
        let s = scheduler(quiet());

        s.run_cycle(&fx.ctx(None, 30.0));
        assert_eq!(fx.graph.read(|g| g.connection(&id).unwrap().strength), 0.5);

        let report = s.run_cycle(&fx.ctx(None, 120.0));
        assert_eq!(report.decayed_connections, 1);
        // 0.5 - 0.01 * 120 / 60
        let strength = fx.graph.read(|g| g.connection(&id).unwrap().strength);
        assert!((strength - 0.48).abs() < 1e-12);
        assert_eq!(s.cycles(), 2);
    }

    #[test]
    fn traffic_between_collection_and_decay_is_respected() {
        let fx = Fixture::new();
        let used = fx.connect(0.5);
        let s = scheduler(quiet());

        let idle = s.idle_connections(&fx.graph, 600.0);
        assert_eq!(idle, vec![used.clone()]);

        // Another writer gets in between the two phases.
        fx.graph.write(|g| g.connection_mut(&used).unwrap().strengthen(0.0, 590.0));
        assert!(!s.decay_connection(&fx.graph, &used, 600.0));
        assert_eq!(fx.graph.read(|g| g.connection(&used).unwrap().strength), 0.5);
    }

    #[test]
    fn activation_decays_linearly() {
        let fx = Fixture::new();
        fx.graph.write(|g| g.activate_node(&"a".into(), 0.12, 0.0));
        let s = scheduler(quiet());
        s.run_cycle(&fx.ctx(None, 0.0));
        s.run_cycle(&fx.ctx(None, 0.0));
        s.run_cycle(&fx.ctx(None, 0.0));
        let activation = fx.graph.read(|g| g.node(&"a".into()).unwrap().activation);
        assert_eq!(activation, 0.0);
    }

    #[test]
    fn self_organization_removes_weak_outgoing() {
        let fx = Fixture::new();
        let id = fx.connect(0.2);
        let s = scheduler(MaintenanceConfig {
            reorganize_probability: 1.0,
            snapshot_probability: 0.0,
            ..MaintenanceConfig::default()
        });
        // Either node may be picked; b has no outgoing connection.
        for _ in 0..20 {
            s.run_cycle(&fx.ctx(None, 0.0));
            if fx.graph.read(|g| g.connection(&id).is_none()) {
                break;
            }
        }
        assert!(fx.graph.read(|g| g.connection(&id).is_none()));
        assert!(s.reorganizations() >= 1);
    }

    struct FailingHook;

    impl SnapshotHook for FailingHook {
        fn save(&self, _: &GraphSnapshot) -> Result<()> {
            Err(RhizomeError::Io("disk full".into()))
        }
    }

    #[derive(Default)]
    struct CountingHook(Mutex<Vec<GraphSnapshot>>);

    impl SnapshotHook for CountingHook {
        fn save(&self, snapshot: &GraphSnapshot) -> Result<()> {
            self.0.lock().push(snapshot.clone());
            Ok(())
        }
    }

    #[test]
    fn snapshot_hook_failures_are_soft() {
        let fx = Fixture::new();
        let s = scheduler(MaintenanceConfig {
            snapshot_probability: 1.0,
            ..quiet()
        });
        let report = s.run_cycle(&fx.ctx(Some(&FailingHook), 1.0));
        assert!(!report.snapshot_taken);
        assert_eq!(s.snapshots(), 0);

        let hook = CountingHook::default();
        let report = s.run_cycle(&fx.ctx(Some(&hook), 2.0));
        assert!(report.snapshot_taken);
        assert_eq!(hook.0.lock()[0].metadata.saved_at, 2.0);
        assert_eq!(hook.0.lock()[0].nodes.len(), 2);
    }
}
