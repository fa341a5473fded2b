//! Graph store for the rhizome, backed by petgraph.
//!
//! Nodes and connections live in a `StableGraph` so indices survive
//! removals. HashMap indices give O(1) lookup by id, a type index and a
//! spatial grid serve `find_nodes`, and entanglement pairs are kept
//! beside the graph since they are not edges.
//!
//! Every structural change queues a [`RhizomeEvent`]. The owner drains
//! them with [`RhizomeGraph::drain_events`] once its lock is released.

use crate::config::GraphConfig;
use crate::metrics::GraphStats;
use crate::spatial::SpatialIndex;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rhizome_core::capability::Persistable;
use rhizome_core::error::{Result, RhizomeError};
use rhizome_core::events::{RemovalReason, RhizomeEvent};
use rhizome_core::snapshot::GraphSnapshot;
use rhizome_core::topology::Topology;
use rhizome_core::types::*;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Parameters for a node about to be added.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub node_type: NodeType,
    pub id: Option<NodeId>,
    /// Placed near the type's cluster centre when absent.
    pub position: Option<Position>,
    pub data: Attributes,
    pub resonance_frequency: Option<f64>,
    pub energy: Option<f64>,
}

impl NewNode {
    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            id: None,
            position: None,
            data: Attributes::new(),
            resonance_frequency: None,
            energy: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.resonance_frequency = Some(frequency);
        self
    }

    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = Some(energy);
        self
    }
}

type NodePredicate = Box<dyn Fn(&Node) -> bool + Send + Sync>;

/// Filter for [`RhizomeGraph::find_nodes`]. All given criteria must hold.
#[derive(Default)]
pub struct NodeQuery {
    node_type: Option<NodeType>,
    near: Option<(Position, f64)>,
    predicate: Option<NodePredicate>,
}

impl NodeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    pub fn within(mut self, center: Position, radius: f64) -> Self {
        self.near = Some((center, radius));
        self
    }

    pub fn matching(mut self, predicate: impl Fn(&Node) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    fn matches(&self, node: &Node) -> bool {
        if let Some(t) = self.node_type {
            if node.node_type != t {
                return false;
            }
        }
        if let Some((center, radius)) = &self.near {
            if node.position.distance_to(center) > *radius {
                return false;
            }
        }
        self.predicate.as_ref().map_or(true, |p| p(node))
    }
}

/// Petgraph-backed store of nodes, connections and entanglement pairs.
pub struct RhizomeGraph {
    graph: StableGraph<Node, Connection>,
    /// Map from NodeId to petgraph's internal index.
    node_index: HashMap<NodeId, NodeIndex>,
    edge_index: HashMap<ConnectionId, EdgeIndex>,
    type_index: HashMap<NodeType, BTreeSet<NodeId>>,
    spatial: SpatialIndex,
    /// Unordered pairs, stored smaller id first.
    entangled: BTreeSet<(NodeId, NodeId)>,
    config: GraphConfig,
    rng: StdRng,
    pending: Vec<RhizomeEvent>,
}

impl RhizomeGraph {
    pub fn new(config: GraphConfig, rng: StdRng) -> Self {
        Self {
            graph: StableGraph::new(),
            node_index: HashMap::new(),
            edge_index: HashMap::new(),
            type_index: HashMap::new(),
            spatial: SpatialIndex::new(config.spatial_cell_size),
            entangled: BTreeSet::new(),
            config,
            rng,
            pending: Vec::new(),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Take the events queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<RhizomeEvent> {
        std::mem::take(&mut self.pending)
    }

    // ---- nodes ----

    pub fn add_node(&mut self, spec: NewNode, now: Timestamp) -> Result<Node> {
        if self.graph.node_count() >= self.config.max_nodes {
            return Err(RhizomeError::capacity("nodes", self.config.max_nodes));
        }
        let id = match spec.id {
            Some(id) if self.node_index.contains_key(&id) => {
                return Err(RhizomeError::DuplicateId(id.to_string()));
            }
            Some(id) => id,
            None => self.fresh_id(spec.node_type),
        };
        let position = match spec.position {
            Some(p) if !p.is_finite() => return Err(RhizomeError::InvalidPosition(id.to_string())),
            Some(p) => p,
            None => self.place(spec.node_type),
        };

        let mut node = Node::new(id.clone(), spec.node_type, position, now);
        node.data = spec.data;
        node.resonance_frequency = spec.resonance_frequency;
        if let Some(energy) = spec.energy {
            node.energy = energy.max(0.0);
        }
        let node_type = node.node_type;
        let idx = self.insert_node(node);

        debug!(node = %id, node_type = %node_type, "node added");
        self.pending.push(RhizomeEvent::NodeAdded {
            node_id: id.clone(),
            node_type,
        });

        if self.config.auto_connect_on_add {
            self.auto_connect(&id, now);
        }
        Ok(self.graph[idx].clone())
    }

    fn insert_node(&mut self, node: Node) -> NodeIndex {
        let id = node.id.clone();
        let node_type = node.node_type;
        let position = node.position;
        let idx = self.graph.add_node(node);
        self.node_index.insert(id.clone(), idx);
        self.type_index.entry(node_type).or_default().insert(id.clone());
        self.spatial.insert(id, &position);
        idx
    }

    fn fresh_id(&self, node_type: NodeType) -> NodeId {
        loop {
            let id = NodeId::generate(node_type);
            if !self.node_index.contains_key(&id) {
                return id;
            }
        }
    }

    /// Cluster centre plus Gaussian jitter.
    fn place(&mut self, node_type: NodeType) -> Position {
        let sigma = self.config.cluster_jitter;
        let (dx, dy, dz) = (self.gauss(), self.gauss(), self.gauss());
        node_type
            .cluster_center()
            .offset(dx * sigma, dy * sigma, dz * sigma)
    }

    /// Standard normal sample (Box-Muller).
    fn gauss(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    /// Remove a node with every incident connection and entanglement.
    pub fn remove_node(&mut self, id: &NodeId) -> bool {
        let Some(&idx) = self.node_index.get(id) else {
            return false;
        };

        let incident: Vec<EdgeIndex> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, Direction::Incoming))
            .map(|e| e.id())
            .collect();
        let removed_connections = incident.len();
        for edge in incident {
            self.remove_edge_at(edge, RemovalReason::NodeRemoved);
        }
        self.entangled.retain(|(a, b)| a != id && b != id);

        if let Some(node) = self.graph.remove_node(idx) {
            if let Some(ids) = self.type_index.get_mut(&node.node_type) {
                ids.remove(id);
            }
            self.spatial.remove(id, &node.position);
        }
        self.node_index.remove(id);

        debug!(node = %id, removed_connections, "node removed");
        self.pending.push(RhizomeEvent::NodeRemoved {
            node_id: id.clone(),
            removed_connections,
        });
        true
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.node_index
            .get(id)
            .copied()
            .map(|idx| &mut self.graph[idx])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    /// Nodes matching every criterion of `query`, ordered by id.
    pub fn find_nodes(&self, query: &NodeQuery) -> Vec<Node> {
        let mut ids: Vec<NodeId> = match (&query.near, query.node_type) {
            (Some((center, radius)), _) => self.spatial.candidates(center, *radius),
            (None, Some(t)) => self
                .type_index
                .get(&t)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
            (None, None) => self.node_index.keys().cloned().collect(),
        };
        ids.sort();
        ids.iter()
            .filter_map(|id| self.node(id))
            .filter(|node| query.matches(node))
            .cloned()
            .collect()
    }

    /// Raise a node's activation and pass a share on to its entanglement
    /// partners. Partners do not forward further.
    pub fn activate_node(&mut self, id: &NodeId, amount: f64, now: Timestamp) -> Option<f64> {
        let idx = *self.node_index.get(id)?;
        let activation = self.graph[idx].activate(amount, now);
        self.pending.push(RhizomeEvent::NodeActivated {
            node_id: id.clone(),
            activation,
        });

        let share = amount * self.config.partner_activation;
        for partner in self.entangled_partners(id) {
            if let Some(&p) = self.node_index.get(&partner) {
                let partner_activation = self.graph[p].activate(share, now);
                self.pending.push(RhizomeEvent::NodeActivated {
                    node_id: partner,
                    activation: partner_activation,
                });
            }
        }
        Some(activation)
    }

    pub fn mean_activation(&self) -> f64 {
        let n = self.graph.node_count();
        if n == 0 {
            return 0.0;
        }
        self.nodes().map(|node| node.activation).sum::<f64>() / n as f64
    }

    // ---- connections ----

    /// Wire `source -> target`. At the per-node cap the source's weakest
    /// outgoing connection is evicted first.
    pub fn add_connection(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        connection_type: ConnectionType,
        strength: f64,
        weight: f64,
        now: Timestamp,
    ) -> Result<Connection> {
        if source == target {
            return Err(RhizomeError::SelfConnection(source.to_string()));
        }
        let s_idx = *self
            .node_index
            .get(source)
            .ok_or_else(|| RhizomeError::EndpointMissing(source.to_string()))?;
        let t_idx = *self
            .node_index
            .get(target)
            .ok_or_else(|| RhizomeError::EndpointMissing(target.to_string()))?;
        if self.graph.find_edge(s_idx, t_idx).is_some() {
            return Err(RhizomeError::DuplicateConnection {
                from: source.to_string(),
                to: target.to_string(),
            });
        }

        let limit = self.config.max_connections_per_node;
        if self.graph.edges_directed(s_idx, Direction::Outgoing).count() >= limit {
            match self.weakest_outgoing_edge(s_idx) {
                Some(edge) => {
                    if let Some(evicted) = self.remove_edge_at(edge, RemovalReason::Evicted) {
                        debug!(connection = %evicted.id, node = %source, "evicted weakest connection");
                    }
                }
                None => return Err(RhizomeError::capacity("connections per node", limit)),
            }
        }

        let distance = self.graph[s_idx]
            .position
            .distance_to(&self.graph[t_idx].position);
        let connection = Connection::new(
            source.clone(),
            target.clone(),
            connection_type,
            strength,
            weight,
            distance * self.config.latency_per_unit,
            now,
        );
        let edge = self.graph.add_edge(s_idx, t_idx, connection.clone());
        self.edge_index.insert(connection.id.clone(), edge);
        self.graph[s_idx].connections.insert(target.clone());
        self.graph[t_idx].connections.insert(source.clone());

        self.pending.push(RhizomeEvent::ConnectionAdded {
            connection_id: connection.id.clone(),
            source: source.clone(),
            target: target.clone(),
            connection_type,
        });
        Ok(connection)
    }

    pub fn remove_connection(&mut self, id: &ConnectionId) -> bool {
        self.remove_connection_with(id, RemovalReason::Explicit)
            .is_some()
    }

    pub fn remove_connection_with(
        &mut self,
        id: &ConnectionId,
        reason: RemovalReason,
    ) -> Option<Connection> {
        let edge = *self.edge_index.get(id)?;
        self.remove_edge_at(edge, reason)
    }

    fn remove_edge_at(&mut self, edge: EdgeIndex, reason: RemovalReason) -> Option<Connection> {
        let connection = self.graph.remove_edge(edge)?;
        self.edge_index.remove(&connection.id);
        self.unlink_if_disconnected(&connection.source, &connection.target);
        self.pending.push(RhizomeEvent::ConnectionRemoved {
            connection_id: connection.id.clone(),
            source: connection.source.clone(),
            target: connection.target.clone(),
            reason,
        });
        Some(connection)
    }

    /// Neighbour sets only drop a pair once no connection remains in
    /// either direction.
    fn unlink_if_disconnected(&mut self, a: &NodeId, b: &NodeId) {
        let (Some(&ia), Some(&ib)) = (self.node_index.get(a), self.node_index.get(b)) else {
            return;
        };
        if self.graph.find_edge(ia, ib).is_none() && self.graph.find_edge(ib, ia).is_none() {
            self.graph[ia].connections.remove(b);
            self.graph[ib].connections.remove(a);
        }
    }

    fn weakest_outgoing_edge(&self, idx: NodeIndex) -> Option<EdgeIndex> {
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .min_by(|a, b| a.weight().strength.total_cmp(&b.weight().strength))
            .map(|e| e.id())
    }

    /// The weakest connection leaving `id`.
    pub fn weakest_outgoing(&self, id: &NodeId) -> Option<&Connection> {
        let idx = *self.node_index.get(id)?;
        self.weakest_outgoing_edge(idx).map(|e| &self.graph[e])
    }

    pub fn outgoing(&self, id: &NodeId) -> Vec<&Connection> {
        let Some(&idx) = self.node_index.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.weight())
            .collect()
    }

    pub fn connection_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        let edge = *self.edge_index.get(id)?;
        self.graph.edge_weight_mut(edge)
    }

    pub fn connection_between_mut(&mut self, a: &NodeId, b: &NodeId) -> Option<&mut Connection> {
        let ia = *self.node_index.get(a)?;
        let ib = *self.node_index.get(b)?;
        let edge = self
            .graph
            .find_edge(ia, ib)
            .or_else(|| self.graph.find_edge(ib, ia))?;
        self.graph.edge_weight_mut(edge)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.graph.edge_indices().map(move |e| &self.graph[e])
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections().map(|c| c.id.clone()).collect()
    }

    // ---- entanglement ----

    fn pair(a: &NodeId, b: &NodeId) -> (NodeId, NodeId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    /// Entangle two nodes. Returns false if they already were.
    pub fn entangle(&mut self, a: &NodeId, b: &NodeId) -> Result<bool> {
        if a == b {
            return Err(RhizomeError::SelfConnection(a.to_string()));
        }
        for id in [a, b] {
            if !self.node_index.contains_key(id) {
                return Err(RhizomeError::node_not_found(id));
            }
        }
        Ok(self.entangled.insert(Self::pair(a, b)))
    }

    pub fn disentangle(&mut self, a: &NodeId, b: &NodeId) -> bool {
        self.entangled.remove(&Self::pair(a, b))
    }

    pub fn entangled_partners(&self, id: &NodeId) -> Vec<NodeId> {
        self.entangled
            .iter()
            .filter_map(|(a, b)| {
                if a == id {
                    Some(b.clone())
                } else if b == id {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn entangled_pairs(&self) -> Vec<(NodeId, NodeId)> {
        self.entangled.iter().cloned().collect()
    }

    pub fn entangled_count(&self) -> usize {
        self.entangled.len()
    }

    // ---- growth and search ----

    /// Probabilistically wire a node to nearby nodes, weighted by type
    /// affinity and inverse distance. Returns the number of new connections.
    pub fn auto_connect(&mut self, id: &NodeId, now: Timestamp) -> usize {
        let Some(node) = self.node(id).cloned() else {
            return 0;
        };
        let radius = self.config.auto_connect_radius;
        let mut nearby: Vec<(NodeId, NodeType, f64)> = self
            .spatial
            .candidates(&node.position, radius)
            .into_iter()
            .filter(|other| other != id)
            .filter_map(|other| {
                let n = self.node(&other)?;
                let distance = n.position.distance_to(&node.position);
                (distance <= radius).then(|| (other, n.node_type, distance))
            })
            .collect();
        nearby.sort_by(|a, b| a.0.cmp(&b.0));
        nearby.shuffle(&mut self.rng);
        nearby.truncate(self.config.max_auto_connections);

        let mut made = 0;
        for (other, other_type, distance) in nearby {
            if node.connections.contains(&other) {
                continue;
            }
            let p = node.node_type.affinity(other_type) / (1.0 + distance * 0.1);
            if self.rng.gen::<f64>() >= p {
                continue;
            }
            let connection_type = self.pick_connection_type(node.node_type, other_type);
            let strength = self.rng.gen_range(0.3..0.7);
            match self.add_connection(id, &other, connection_type, strength, 1.0, now) {
                Ok(_) => made += 1,
                Err(e) => debug!(node = %id, other = %other, error = %e, "auto-connect skipped"),
            }
        }
        made
    }

    fn pick_connection_type(&mut self, a: NodeType, b: NodeType) -> ConnectionType {
        let either = |t: NodeType| a == t || b == t;
        if either(NodeType::Quantum) {
            if self.rng.gen::<f64>() < self.config.quantum_probability {
                ConnectionType::Quantum
            } else {
                ConnectionType::Synaptic
            }
        } else if either(NodeType::Bloom) {
            ConnectionType::Resonant
        } else if either(NodeType::Memory) {
            ConnectionType::Semantic
        } else {
            ConnectionType::Synaptic
        }
    }

    /// Fewest-hop path over neighbour links, at most `max_depth` hops.
    pub fn find_path(&self, source: &NodeId, target: &NodeId, max_depth: usize) -> Option<Vec<NodeId>> {
        if !self.contains_node(source) || !self.contains_node(target) {
            return None;
        }
        if source == target {
            return Some(vec![source.clone()]);
        }

        let mut visited: HashSet<NodeId> = HashSet::from([source.clone()]);
        let mut queue = VecDeque::from([vec![source.clone()]]);
        while let Some(path) = queue.pop_front() {
            if path.len() > max_depth {
                continue;
            }
            let Some(node) = path.last().and_then(|id| self.node(id)) else {
                continue;
            };
            for next in &node.connections {
                if next == target {
                    let mut found = path.clone();
                    found.push(next.clone());
                    return Some(found);
                }
                if visited.insert(next.clone()) {
                    let mut extended = path.clone();
                    extended.push(next.clone());
                    queue.push_back(extended);
                }
            }
        }
        None
    }

    pub fn random_node_id(&mut self) -> Option<NodeId> {
        let mut ids: Vec<&NodeId> = self.node_index.keys().collect();
        ids.sort();
        ids.choose(&mut self.rng).map(|id| (*id).clone())
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            node_count: self.graph.node_count(),
            connection_count: self.graph.edge_count(),
            entangled_pairs: self.entangled.len(),
            ..GraphStats::default()
        };
        let mut degree_sum = 0usize;
        for node in self.nodes() {
            *stats.nodes_by_type.entry(node.node_type).or_default() += 1;
            stats.total_energy += node.energy;
            stats.total_activation += node.activation;
            degree_sum += node.degree();
        }
        for connection in self.connections() {
            *stats
                .connections_by_type
                .entry(connection.connection_type)
                .or_default() += 1;
        }
        if stats.node_count > 0 {
            stats.average_degree = degree_sum as f64 / stats.node_count as f64;
            stats.mean_activation = stats.total_activation / stats.node_count as f64;
        }
        stats
    }
}

impl Topology for RhizomeGraph {
    fn node(&self, id: &NodeId) -> Option<&Node> {
        self.node_index.get(id).map(|idx| &self.graph[*idx])
    }

    fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.edge_index.get(id).map(|e| &self.graph[*e])
    }

    fn connection_between(&self, a: &NodeId, b: &NodeId) -> Option<&Connection> {
        let ia = *self.node_index.get(a)?;
        let ib = *self.node_index.get(b)?;
        let edge = self
            .graph
            .find_edge(ia, ib)
            .or_else(|| self.graph.find_edge(ib, ia))?;
        Some(&self.graph[edge])
    }

    fn neighbors(&self, id: &NodeId, include_incoming: bool) -> BTreeSet<NodeId> {
        let Some(&idx) = self.node_index.get(id) else {
            return BTreeSet::new();
        };
        if include_incoming {
            return self.graph[idx].connections.clone();
        }
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.weight().target.clone())
            .collect()
    }

    fn partners(&self, id: &NodeId) -> Vec<NodeId> {
        self.entangled_partners(id)
    }

    fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.node_index.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl Persistable for RhizomeGraph {
    type Snapshot = GraphSnapshot;

    fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<Node> = self.nodes().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut connections: Vec<Connection> = self.connections().cloned().collect();
        connections.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
        GraphSnapshot::new(nodes, connections, self.entangled_pairs(), 0.0)
    }

    /// Rebuilds into a fresh store and swaps it in only if the whole
    /// snapshot is consistent.
    fn restore(&mut self, snapshot: GraphSnapshot) -> Result<()> {
        if snapshot.nodes.len() > self.config.max_nodes {
            return Err(RhizomeError::capacity("nodes", self.config.max_nodes));
        }
        let mut fresh = RhizomeGraph::new(self.config.clone(), self.rng.clone());

        for mut node in snapshot.nodes {
            if fresh.node_index.contains_key(&node.id) {
                return Err(RhizomeError::DuplicateId(node.id.to_string()));
            }
            node.connections.clear();
            fresh.insert_node(node);
        }

        for connection in snapshot.connections {
            let s_idx = *fresh
                .node_index
                .get(&connection.source)
                .ok_or_else(|| RhizomeError::EndpointMissing(connection.source.to_string()))?;
            let t_idx = *fresh
                .node_index
                .get(&connection.target)
                .ok_or_else(|| RhizomeError::EndpointMissing(connection.target.to_string()))?;
            if fresh.graph.find_edge(s_idx, t_idx).is_some() {
                return Err(RhizomeError::DuplicateConnection {
                    from: connection.source.to_string(),
                    to: connection.target.to_string(),
                });
            }
            fresh.graph[s_idx].connections.insert(connection.target.clone());
            fresh.graph[t_idx].connections.insert(connection.source.clone());
            let id = connection.id.clone();
            let edge = fresh.graph.add_edge(s_idx, t_idx, connection);
            fresh.edge_index.insert(id, edge);
        }

        for (a, b) in snapshot.entangled_pairs {
            fresh.entangle(&a, &b)?;
        }

        *self = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn make_graph() -> RhizomeGraph {
        RhizomeGraph::new(GraphConfig::default(), StdRng::seed_from_u64(1))
    }

    fn make_node(g: &mut RhizomeGraph, id: &str, x: f64) -> NodeId {
        g.add_node(
            NewNode::new(NodeType::Relay)
                .with_id(id)
                .at(Position::new(x, 0.0, 0.0)),
            0.0,
        )
        .unwrap()
        .id
    }

    #[test]
    fn adjacency_is_symmetric() {
        let mut g = make_graph();
        let a = make_node(&mut g, "a", 0.0);
        let b = make_node(&mut g, "b", 10.0);
        let conn = g
            .add_connection(&a, &b, ConnectionType::Synaptic, 0.6, 1.0, 0.0)
            .unwrap();

        assert!(g.neighbors(&a, true).contains(&b));
        assert!(g.neighbors(&b, true).contains(&a));
        assert!(g.neighbors(&a, false).contains(&b));
        assert!(!g.neighbors(&b, false).contains(&a));
        assert!((conn.latency - 0.1).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_finite_positions() {
        let mut g = make_graph();
        for bad in [
            Position::new(f64::NAN, 0.0, 0.0),
            Position::new(0.0, f64::INFINITY, 0.0),
            Position::new(0.0, 0.0, f64::NEG_INFINITY),
        ] {
            let err = g.add_node(NewNode::new(NodeType::Relay).with_id("bad").at(bad), 0.0);
            assert!(matches!(err, Err(RhizomeError::InvalidPosition(ref id)) if id == "bad"));
        }
        assert_eq!(g.node_count(), 0);
        assert!(g.drain_events().is_empty());
    }

    #[test]
    fn rejects_bad_connections() {
        let mut g = make_graph();
        let a = make_node(&mut g, "a", 0.0);
        let b = make_node(&mut g, "b", 1.0);
        g.add_connection(&a, &b, ConnectionType::Synaptic, 0.5, 1.0, 0.0)
            .unwrap();

        let dup = g.add_connection(&a, &b, ConnectionType::Temporal, 0.5, 1.0, 0.0);
        assert!(matches!(dup, Err(RhizomeError::DuplicateConnection { .. })));

        let missing = g.add_connection(&a, &"ghost".into(), ConnectionType::Synaptic, 0.5, 1.0, 0.0);
        assert!(matches!(missing, Err(RhizomeError::EndpointMissing(_))));

        let selfie = g.add_connection(&a, &a, ConnectionType::Synaptic, 0.5, 1.0, 0.0);
        assert!(matches!(selfie, Err(RhizomeError::SelfConnection(_))));

        // The reverse direction is a distinct connection.
        assert!(g
            .add_connection(&b, &a, ConnectionType::Synaptic, 0.5, 1.0, 0.0)
            .is_ok());
    }

    #[test]
    fn duplicate_and_capacity_errors_on_nodes() {
        let mut g = RhizomeGraph::new(
            GraphConfig {
                max_nodes: 2,
                ..GraphConfig::default()
            },
            StdRng::seed_from_u64(1),
        );
        make_node(&mut g, "a", 0.0);
        let dup = g.add_node(NewNode::new(NodeType::Relay).with_id("a"), 0.0);
        assert!(matches!(dup, Err(RhizomeError::DuplicateId(_))));
        make_node(&mut g, "b", 0.0);
        let full = g.add_node(NewNode::new(NodeType::Relay), 0.0);
        assert!(matches!(full, Err(RhizomeError::CapacityExceeded { .. })));
    }

    #[test]
    fn weakest_outgoing_is_evicted_at_cap() {
        let mut g = RhizomeGraph::new(
            GraphConfig {
                max_connections_per_node: 2,
                ..GraphConfig::default()
            },
            StdRng::seed_from_u64(1),
        );
        let hub = make_node(&mut g, "hub", 0.0);
        let x = make_node(&mut g, "x", 1.0);
        let y = make_node(&mut g, "y", 2.0);
        let z = make_node(&mut g, "z", 3.0);
        g.add_connection(&hub, &x, ConnectionType::Synaptic, 0.9, 1.0, 0.0).unwrap();
        g.add_connection(&hub, &y, ConnectionType::Synaptic, 0.2, 1.0, 0.0).unwrap();
        g.add_connection(&hub, &z, ConnectionType::Synaptic, 0.5, 1.0, 0.0).unwrap();

        assert_eq!(g.outgoing(&hub).len(), 2);
        assert!(g.connection_between(&hub, &y).is_none());
        assert!(!g.neighbors(&y, true).contains(&hub));
        let evicted = g.drain_events().into_iter().any(|e| {
            matches!(e, RhizomeEvent::ConnectionRemoved { reason: RemovalReason::Evicted, .. })
        });
        assert!(evicted);
    }

    #[test]
    fn remove_node_cascades() {
        let mut g = make_graph();
        let a = make_node(&mut g, "a", 0.0);
        let b = make_node(&mut g, "b", 1.0);
        let c = make_node(&mut g, "c", 2.0);
        g.add_connection(&a, &b, ConnectionType::Synaptic, 0.5, 1.0, 0.0).unwrap();
        g.add_connection(&c, &b, ConnectionType::Synaptic, 0.5, 1.0, 0.0).unwrap();
        g.add_connection(&a, &c, ConnectionType::Synaptic, 0.5, 1.0, 0.0).unwrap();
        g.entangle(&a, &b).unwrap();

        assert!(g.remove_node(&b));
        assert_eq!(g.connection_count(), 1);
        assert!(g.connections().all(|c| !c.touches(&b)));
        assert!(g.nodes().all(|n| !n.connections.contains(&b)));
        assert_eq!(g.entangled_count(), 0);
        assert!(!g.remove_node(&b));
    }

    #[test]
    fn neighbour_link_survives_while_reverse_connection_exists() {
        let mut g = make_graph();
        let a = make_node(&mut g, "a", 0.0);
        let b = make_node(&mut g, "b", 1.0);
        let ab = g.add_connection(&a, &b, ConnectionType::Synaptic, 0.5, 1.0, 0.0).unwrap();
        let ba = g.add_connection(&b, &a, ConnectionType::Synaptic, 0.5, 1.0, 0.0).unwrap();

        assert!(g.remove_connection(&ab.id));
        assert!(g.neighbors(&a, true).contains(&b));
        assert!(g.remove_connection(&ba.id));
        assert!(g.neighbors(&a, true).is_empty());
        assert!(g.neighbors(&b, true).is_empty());
    }

    #[test]
    fn activation_reaches_entangled_partner_once() {
        let mut g = make_graph();
        let a = make_node(&mut g, "a", 0.0);
        let b = make_node(&mut g, "b", 50.0);
        let c = make_node(&mut g, "c", 90.0);
        g.entangle(&a, &b).unwrap();
        g.entangle(&b, &c).unwrap();

        g.activate_node(&a, 0.5, 1.0).unwrap();
        assert!((g.node(&a).unwrap().activation - 0.5).abs() < 1e-12);
        assert!((g.node(&b).unwrap().activation - 0.4).abs() < 1e-12);
        // No chaining beyond the first partner.
        assert_eq!(g.node(&c).unwrap().activation, 0.0);
    }

    #[test]
    fn placement_clusters_by_type() {
        let mut g = make_graph();
        let node = g.add_node(NewNode::new(NodeType::Memory), 0.0).unwrap();
        assert!(node.id.as_str().starts_with("memory_"));
        // 8 sigma is far beyond anything a seeded run produces.
        assert!(node.position.distance_to(&NodeType::Memory.cluster_center()) < 40.0 * 3f64.sqrt());
    }

    #[test]
    fn find_nodes_filters() {
        let mut g = make_graph();
        make_node(&mut g, "near", 1.0);
        make_node(&mut g, "far", 100.0);
        g.add_node(
            NewNode::new(NodeType::Bloom)
                .with_id("bloom")
                .at(Position::new(2.0, 0.0, 0.0)),
            0.0,
        )
        .unwrap();

        let near = g.find_nodes(&NodeQuery::new().within(Position::origin(), 5.0));
        let ids: Vec<&str> = near.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["bloom", "near"]);

        let relays = g.find_nodes(
            &NodeQuery::new()
                .of_type(NodeType::Relay)
                .matching(|n| n.position.x > 50.0),
        );
        assert_eq!(relays.len(), 1);
        assert_eq!(relays[0].id.as_str(), "far");
    }

    #[test]
    fn bfs_path_respects_depth() {
        let mut g = make_graph();
        let ids: Vec<NodeId> = (0..5).map(|i| make_node(&mut g, &format!("n{i}"), i as f64)).collect();
        for pair in ids.windows(2) {
            g.add_connection(&pair[0], &pair[1], ConnectionType::Synaptic, 0.5, 1.0, 0.0)
                .unwrap();
        }
        assert_eq!(g.find_path(&ids[0], &ids[4], 10).map(|p| p.len()), Some(5));
        assert!(g.find_path(&ids[0], &ids[4], 3).is_none());
    }

    #[test]
    fn auto_connect_links_close_high_affinity_nodes() {
        let mut g = make_graph();
        let q = g
            .add_node(NewNode::new(NodeType::Quantum).with_id("q0").at(Position::origin()), 0.0)
            .unwrap()
            .id;
        for i in 1..=5 {
            g.add_node(
                NewNode::new(NodeType::Quantum)
                    .with_id(format!("q{i}"))
                    .at(Position::new(0.0, 0.0, 0.01 * i as f64)),
                0.0,
            )
            .unwrap();
        }
        // Affinity 1.0 at distance <= 0.05 gives p > 0.99 per candidate.
        let made = g.auto_connect(&q, 0.0);
        assert!(made >= 4, "made {made}");
        for c in g.outgoing(&q) {
            assert!(c.strength >= 0.3 && c.strength < 0.7);
            assert!(matches!(
                c.connection_type,
                ConnectionType::Quantum | ConnectionType::Synaptic
            ));
        }
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let mut g = make_graph();
        let a = make_node(&mut g, "a", 0.0);
        let b = make_node(&mut g, "b", 3.0);
        g.add_connection(&a, &b, ConnectionType::Temporal, 0.4, 1.3, 2.0).unwrap();
        g.entangle(&a, &b).unwrap();
        g.activate_node(&a, 0.3, 5.0);

        let snapshot = g.snapshot();
        let mut other = make_graph();
        other.restore(snapshot.clone()).unwrap();
        assert_eq!(other.snapshot(), snapshot);
        assert!(other.drain_events().is_empty());
    }

    #[test]
    fn restore_rejects_dangling_connections() {
        let mut g = make_graph();
        let a = make_node(&mut g, "a", 0.0);
        let b = make_node(&mut g, "b", 3.0);
        g.add_connection(&a, &b, ConnectionType::Synaptic, 0.4, 1.0, 0.0).unwrap();
        let mut snapshot = g.snapshot();
        snapshot.nodes.retain(|n| n.id != b);

        let mut other = make_graph();
        make_node(&mut other, "keep", 0.0);
        assert!(matches!(other.restore(snapshot), Err(RhizomeError::EndpointMissing(_))));
        // Failed restores leave the store untouched.
        assert!(other.contains_node(&"keep".into()));
    }
}
