//! Per-mode signal dispatch.
//!
//! [`SignalRouter::route`] advances a signal by one step. A step first
//! lands the signal on the node(s) it has just reached (activating them),
//! then either finishes it or hands back a continuation to re-queue after
//! the traversed connection's latency.
//!
//! - directed: one continuation per step, chosen by the pathfinder
//! - broadcast: every node within spatial reach, in a single step
//! - cascade / flood: one breadth-first level per step
//! - resonant: every node tuned to the signal's frequency, in a single step
//! - quantum: straight to the entanglement partner, undecayed

use crate::config::SignalConfig;
use crate::handle::GraphHandle;
use crate::pathfinder::Pathfinder;
use rhizome_core::capability::Resonant;
use rhizome_core::signal::{Delivery, FailureReason, Signal, SignalOutcome, SignalRecord, SignalState};
use rhizome_core::topology::Topology;
use rhizome_core::types::{ConnectionId, NodeId, PropagationMode, Timestamp};
use tracing::debug;

/// A connection crossed during a step.
#[derive(Debug, Clone, PartialEq)]
pub struct Traversal {
    pub connection: ConnectionId,
    pub latency: f64,
    /// Strength of the signal after crossing.
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Re-queue `signal` after `delay` seconds.
    Forward { signal: Signal, delay: f64 },
    Finished(SignalRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteStep {
    pub outcome: StepOutcome,
    pub traversed: Vec<Traversal>,
    /// Nodes activated by this step.
    pub spiked: Vec<NodeId>,
}

/// Accumulates the side effects of one step.
#[derive(Default)]
struct StepLog {
    traversed: Vec<Traversal>,
    spiked: Vec<NodeId>,
}

impl StepLog {
    fn forward(self, signal: Signal) -> RouteStep {
        let delay = self
            .traversed
            .iter()
            .map(|t| t.latency)
            .fold(0.0, f64::max);
        RouteStep {
            outcome: StepOutcome::Forward { signal, delay },
            traversed: self.traversed,
            spiked: self.spiked,
        }
    }

    fn finish(self, signal: Signal, outcome: SignalOutcome, now: Timestamp) -> RouteStep {
        RouteStep {
            outcome: StepOutcome::Finished(signal.finish(outcome, now)),
            traversed: self.traversed,
            spiked: self.spiked,
        }
    }

    fn fail(self, signal: Signal, reason: FailureReason, now: Timestamp) -> RouteStep {
        self.finish(signal, SignalOutcome::Failed(reason), now)
    }
}

pub struct SignalRouter {
    config: SignalConfig,
}

impl SignalRouter {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn route(
        &self,
        graph: &GraphHandle,
        pathfinder: &Pathfinder,
        mut signal: Signal,
        now: Timestamp,
    ) -> RouteStep {
        signal.advance(SignalState::InTransit);
        match signal.mode {
            PropagationMode::Directed if signal.target.is_some() => {
                self.directed(graph, pathfinder, signal, now)
            }
            PropagationMode::Directed | PropagationMode::Broadcast => {
                self.broadcast(graph, signal, now)
            }
            PropagationMode::Cascade | PropagationMode::Flood => {
                self.expand(graph, pathfinder, signal, now)
            }
            PropagationMode::Resonant => self.resonant(graph, signal, now),
            PropagationMode::Quantum => self.quantum(graph, signal, now),
        }
    }

    /// Activate `node` with `strength` and note the delivery. False if the
    /// node no longer exists.
    fn land(
        &self,
        graph: &GraphHandle,
        signal: &mut Signal,
        node: &NodeId,
        strength: f64,
        now: Timestamp,
        log: &mut StepLog,
    ) -> bool {
        if graph
            .write(|g| g.activate_node(node, strength, now))
            .is_none()
        {
            return false;
        }
        signal.deliveries.push(Delivery {
            node: node.clone(),
            strength,
            hops: signal.hops,
        });
        log.spiked.push(node.clone());
        true
    }

    fn directed(
        &self,
        graph: &GraphHandle,
        pathfinder: &Pathfinder,
        mut signal: Signal,
        now: Timestamp,
    ) -> RouteStep {
        let mut log = StepLog::default();
        let current = signal.current().clone();
        let Some(target) = signal.target.clone() else {
            return log.fail(signal, FailureReason::Unreachable, now);
        };

        if signal.hops > 0 || current == target {
            let strength = signal.strength;
            if !self.land(graph, &mut signal, &current, strength, now, &mut log) {
                return log.fail(signal, FailureReason::Unreachable, now);
            }
        }
        if current == target {
            return log.finish(signal, SignalOutcome::Delivered, now);
        }
        if signal.hops >= signal.max_hops {
            return log.fail(signal, FailureReason::MaxHops, now);
        }

        let hop = graph.read(|g| {
            pathfinder
                .find_next_hops(g, &current, &target, signal.signal_type, &signal.path)
                .into_iter()
                .find(|n| !signal.has_visited(n))
                .and_then(|next| {
                    let c = g.connection_between(&current, &next)?;
                    Some((next, c.id.clone(), c.latency))
                })
        });
        let Some((next, connection, latency)) = hop else {
            return log.fail(signal, FailureReason::Unreachable, now);
        };

        signal.forward(next);
        log.traversed.push(Traversal {
            connection,
            latency,
            strength: signal.strength,
        });
        if signal.strength < self.config.min_strength {
            return log.fail(signal, FailureReason::TooWeak, now);
        }
        log.forward(signal)
    }

    /// Spatial broadcast: strength falls off linearly with distance from
    /// the source.
    fn broadcast(&self, graph: &GraphHandle, mut signal: Signal, now: Timestamp) -> RouteStep {
        let mut log = StepLog::default();
        let min = self.config.min_strength;
        let recipients: Vec<(NodeId, f64)> = graph.read(|g| {
            let Some(origin) = g.position(&signal.source) else {
                return Vec::new();
            };
            let mut found: Vec<(NodeId, f64)> = g
                .nodes()
                .filter(|n| n.id != signal.source)
                .filter_map(|n| {
                    let reach = signal.strength
                        * (1.0 - signal.decay_rate * n.position.distance_to(&origin));
                    (reach >= min).then(|| (n.id.clone(), reach))
                })
                .collect();
            found.sort_by(|a, b| a.0.cmp(&b.0));
            found
        });
        if recipients.is_empty() {
            return log.fail(signal, FailureReason::TooWeak, now);
        }

        signal.hops = 1;
        for (node, reach) in &recipients {
            self.land(graph, &mut signal, node, *reach, now, &mut log);
        }
        debug!(signal = %signal.id, recipients = recipients.len(), "broadcast delivered");
        log.finish(signal, SignalOutcome::Delivered, now)
    }

    /// Breadth-first expansion, one level per step. Flood (and cascade
    /// without a target) fans out to every neighbour; cascade towards a
    /// target only follows the pathfinder's candidates.
    fn expand(
        &self,
        graph: &GraphHandle,
        pathfinder: &Pathfinder,
        mut signal: Signal,
        now: Timestamp,
    ) -> RouteStep {
        let mut log = StepLog::default();

        if signal.hops == 0 {
            if signal.target.as_ref() == Some(&signal.source) {
                let (source, strength) = (signal.source.clone(), signal.strength);
                self.land(graph, &mut signal, &source, strength, now, &mut log);
                return log.finish(signal, SignalOutcome::Delivered, now);
            }
            signal.frontier = vec![signal.source.clone()];
        } else {
            let (level, strength) = (signal.frontier.clone(), signal.strength);
            for node in &level {
                self.land(graph, &mut signal, node, strength, now, &mut log);
            }
            if signal.target.as_ref().map_or(false, |t| level.contains(t)) {
                return log.finish(signal, SignalOutcome::Delivered, now);
            }
        }

        if signal.hops >= signal.max_hops {
            return self.end_expansion(log, signal, FailureReason::MaxHops, now);
        }

        let fan_out_all = signal.mode == PropagationMode::Flood || signal.target.is_none();
        let next: Vec<(NodeId, NodeId)> = graph.read(|g| {
            let mut next: Vec<(NodeId, NodeId)> = Vec::new();
            for parent in &signal.frontier {
                let candidates: Vec<NodeId> = match (&signal.target, fan_out_all) {
                    (Some(target), false) => pathfinder.find_next_hops(
                        g,
                        parent,
                        target,
                        signal.signal_type,
                        &signal.path,
                    ),
                    _ => g.neighbors(parent, true).into_iter().collect(),
                };
                for child in candidates {
                    if !signal.has_visited(&child) && !next.iter().any(|(c, _)| c == &child) {
                        next.push((child, parent.clone()));
                    }
                }
            }
            next
        });
        if next.is_empty() {
            return self.end_expansion(log, signal, FailureReason::Unreachable, now);
        }

        signal.decay();
        signal.hops += 1;
        if signal.strength < self.config.min_strength {
            return self.end_expansion(log, signal, FailureReason::TooWeak, now);
        }

        let traversed: Vec<Traversal> = graph.read(|g| {
            next.iter()
                .filter_map(|(child, parent)| {
                    let c = g.connection_between(parent, child)?;
                    Some(Traversal {
                        connection: c.id.clone(),
                        latency: c.latency,
                        strength: signal.strength,
                    })
                })
                .collect()
        });
        log.traversed.extend(traversed);
        signal.frontier = next.into_iter().map(|(child, _)| child).collect();
        signal.path.extend(signal.frontier.iter().cloned());
        log.forward(signal)
    }

    /// An untargeted expansion that reached anyone counts as delivered.
    fn end_expansion(
        &self,
        log: StepLog,
        signal: Signal,
        reason: FailureReason,
        now: Timestamp,
    ) -> RouteStep {
        if signal.target.is_none() && !signal.deliveries.is_empty() {
            log.finish(signal, SignalOutcome::Delivered, now)
        } else {
            log.fail(signal, reason, now)
        }
    }

    /// Deliver to every node tuned to the signal's frequency, regardless
    /// of distance. The frequency defaults to the source's own.
    fn resonant(&self, graph: &GraphHandle, mut signal: Signal, now: Timestamp) -> RouteStep {
        let mut log = StepLog::default();
        let tolerance = self.config.resonance_tolerance;
        let recipients: Vec<NodeId> = graph.read(|g| {
            let frequency = signal
                .resonance_frequency
                .or_else(|| g.node(&signal.source)?.resonance_frequency);
            let Some(frequency) = frequency else {
                return Vec::new();
            };
            let mut ids: Vec<NodeId> = g
                .nodes()
                .filter(|n| n.id != signal.source && n.resonates_with(frequency, tolerance))
                .map(|n| n.id.clone())
                .collect();
            ids.sort();
            ids
        });
        if recipients.is_empty() {
            return log.fail(signal, FailureReason::Unreachable, now);
        }

        signal.hops = 1;
        let strength = signal.strength;
        for node in &recipients {
            self.land(graph, &mut signal, node, strength, now, &mut log);
        }
        log.finish(signal, SignalOutcome::Delivered, now)
    }

    /// One hop to the entanglement partner(s), no decay, no pathfinding.
    fn quantum(&self, graph: &GraphHandle, mut signal: Signal, now: Timestamp) -> RouteStep {
        let mut log = StepLog::default();
        let mut partners = graph.read(|g| g.partners(&signal.source));
        if let Some(target) = &signal.target {
            partners.retain(|p| p == target);
        }
        partners.sort();
        if partners.is_empty() {
            return log.fail(signal, FailureReason::Unreachable, now);
        }

        signal.hops = 1;
        let strength = signal.strength;
        for partner in &partners {
            if self.land(graph, &mut signal, partner, strength, now, &mut log) {
                signal.path.push(partner.clone());
            }
        }
        if signal.deliveries.is_empty() {
            return log.fail(signal, FailureReason::Unreachable, now);
        }
        log.finish(signal, SignalOutcome::Delivered, now)
    }
}
