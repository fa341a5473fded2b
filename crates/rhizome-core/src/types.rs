//! Shared types used across the rhizome crates.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Wall-clock time in seconds.
pub type Timestamp = f64;

/// Free-form JSON attributes attached to nodes, connections and signals.
pub type Attributes = Map<String, Value>;

/// Lower bound for connection weights.
pub const MIN_WEIGHT: f64 = 0.1;
/// Upper bound for connection weights.
pub const MAX_WEIGHT: f64 = 2.0;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a node in the rhizome.
    NodeId
);
string_id!(
    /// Unique identifier for a connection.
    ConnectionId
);
string_id!(
    /// Unique identifier for a signal.
    SignalId
);

impl NodeId {
    /// Generate an id of the form `<type>_<8 hex chars>`.
    pub fn generate(node_type: NodeType) -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("{}_{}", node_type.as_str(), &hex[..8]))
    }
}

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl SignalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// A position in the rhizome's three-dimensional space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn origin() -> Self {
        Self::default()
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }

    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Role of a node in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Consciousness,
    Memory,
    Processing,
    Sensory,
    Actuator,
    Relay,
    Bloom,
    Quantum,
    Bridge,
    Ephemeral,
}

impl NodeType {
    pub const ALL: [NodeType; 10] = [
        NodeType::Consciousness,
        NodeType::Memory,
        NodeType::Processing,
        NodeType::Sensory,
        NodeType::Actuator,
        NodeType::Relay,
        NodeType::Bloom,
        NodeType::Quantum,
        NodeType::Bridge,
        NodeType::Ephemeral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Consciousness => "consciousness",
            NodeType::Memory => "memory",
            NodeType::Processing => "processing",
            NodeType::Sensory => "sensory",
            NodeType::Actuator => "actuator",
            NodeType::Relay => "relay",
            NodeType::Bloom => "bloom",
            NodeType::Quantum => "quantum",
            NodeType::Bridge => "bridge",
            NodeType::Ephemeral => "ephemeral",
        }
    }

    /// Centre of the spatial cluster where nodes of this type are placed
    /// when no explicit position is given.
    pub fn cluster_center(&self) -> Position {
        match self {
            NodeType::Consciousness => Position::new(0.0, 0.0, 0.0),
            NodeType::Memory => Position::new(20.0, 0.0, 0.0),
            NodeType::Processing => Position::new(-20.0, 0.0, 0.0),
            NodeType::Sensory => Position::new(0.0, 20.0, 0.0),
            NodeType::Actuator => Position::new(0.0, -20.0, 0.0),
            NodeType::Relay => Position::new(0.0, 0.0, 20.0),
            NodeType::Bloom => Position::new(10.0, 10.0, 10.0),
            NodeType::Quantum => Position::new(-10.0, -10.0, -10.0),
            NodeType::Bridge => Position::new(0.0, 0.0, -20.0),
            NodeType::Ephemeral => Position::new(15.0, -15.0, 0.0),
        }
    }

    /// Symmetric wiring affinity between two node types, in [0, 1].
    pub fn affinity(&self, other: NodeType) -> f64 {
        use NodeType::*;
        match (*self, other) {
            (Consciousness, Memory) | (Memory, Consciousness) => 0.9,
            (Consciousness, Processing) | (Processing, Consciousness) => 0.8,
            (Sensory, Processing) | (Processing, Sensory) => 0.9,
            (Processing, Actuator) | (Actuator, Processing) => 0.9,
            (Memory, Processing) | (Processing, Memory) => 0.7,
            (Quantum, Quantum) => 1.0,
            (Relay, Relay) => 0.6,
            (Bloom, Consciousness) | (Consciousness, Bloom) => 0.8,
            _ => 0.5,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic kind of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Synaptic,
    Quantum,
    Resonant,
    Temporal,
    Semantic,
    Energetic,
    Ephemeral,
}

/// Kind of payload a signal carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Activation,
    Inhibition,
    Modulation,
    Synchrony,
    Memory,
    Query,
    Response,
    Energy,
    Quantum,
}

impl SignalType {
    /// Memory and query traffic is routed along full A* paths.
    pub fn wants_full_path(&self) -> bool {
        matches!(self, SignalType::Memory | SignalType::Query)
    }
}

/// How a signal spreads through the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationMode {
    #[default]
    Directed,
    Broadcast,
    Cascade,
    Flood,
    Resonant,
    Quantum,
}

/// A vertex of the rhizome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    pub position: Position,
    pub energy: f64,
    /// Always within [0, 1].
    pub activation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resonance_frequency: Option<f64>,
    /// Neighbours in either direction.
    #[serde(default)]
    pub connections: BTreeSet<NodeId>,
    #[serde(default)]
    pub data: Attributes,
    pub created_at: Timestamp,
    pub last_active: Timestamp,
}

impl Node {
    pub fn new(id: NodeId, node_type: NodeType, position: Position, now: Timestamp) -> Self {
        Self {
            id,
            node_type,
            position,
            energy: 1.0,
            activation: 0.0,
            resonance_frequency: None,
            connections: BTreeSet::new(),
            data: Attributes::new(),
            created_at: now,
            last_active: now,
        }
    }

    /// Add `amount` to the activation, clamped to [0, 1]. Returns the new value.
    pub fn activate(&mut self, amount: f64, now: Timestamp) -> f64 {
        self.activation = (self.activation + amount).clamp(0.0, 1.0);
        self.last_active = now;
        self.activation
    }

    /// Linear decay towards zero.
    pub fn decay_activation(&mut self, rate: f64) {
        self.activation = (self.activation - rate).max(0.0);
    }

    pub fn degree(&self) -> usize {
        self.connections.len()
    }
}

/// A directed, typed, weighted edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: NodeId,
    pub target: NodeId,
    pub connection_type: ConnectionType,
    /// Always within [0, 1].
    pub strength: f64,
    /// Always within [MIN_WEIGHT, MAX_WEIGHT].
    pub weight: f64,
    /// Propagation delay in seconds.
    pub latency: f64,
    pub created_at: Timestamp,
    pub last_used: Timestamp,
    #[serde(default)]
    pub metadata: Attributes,
}

impl Connection {
    pub fn new(
        source: NodeId,
        target: NodeId,
        connection_type: ConnectionType,
        strength: f64,
        weight: f64,
        latency: f64,
        now: Timestamp,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            source,
            target,
            connection_type,
            strength: strength.clamp(0.0, 1.0),
            weight: crate::plasticity::clamp_weight(weight),
            // Far-apart endpoints can overflow the distance.
            latency: if latency.is_nan() { 0.0 } else { latency.clamp(0.0, f64::MAX) },
            created_at: now,
            last_used: now,
            metadata: Attributes::new(),
        }
    }

    /// Reinforce after use. Strength saturates at 1.0.
    pub fn strengthen(&mut self, amount: f64, now: Timestamp) {
        self.strength = (self.strength + amount).min(1.0);
        self.last_used = now;
    }

    pub fn weaken(&mut self, amount: f64) {
        self.strength = (self.strength - amount).max(0.0);
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = crate::plasticity::clamp_weight(weight);
    }

    /// Seconds since the connection last carried traffic.
    pub fn idle_for(&self, now: Timestamp) -> f64 {
        (now - self.last_used).max(0.0)
    }

    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source == node || &self.target == node
    }

    /// The endpoint opposite to `node`, if `node` is an endpoint.
    pub fn other_end(&self, node: &NodeId) -> Option<&NodeId> {
        if &self.source == node {
            Some(&self.target)
        } else if &self.target == node {
            Some(&self.source)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_node_ids_carry_type_prefix() {
        let id = NodeId::generate(NodeType::Memory);
        assert!(id.as_str().starts_with("memory_"));
        assert_eq!(id.as_str().len(), "memory_".len() + 8);
        assert_ne!(id, NodeId::generate(NodeType::Memory));
    }

    #[test]
    fn affinity_is_symmetric() {
        for a in NodeType::ALL {
            for b in NodeType::ALL {
                assert_eq!(a.affinity(b), b.affinity(a), "{a} / {b}");
            }
        }
        assert_eq!(NodeType::Quantum.affinity(NodeType::Quantum), 1.0);
        assert_eq!(NodeType::Bridge.affinity(NodeType::Ephemeral), 0.5);
    }

    #[test]
    fn activation_is_clamped() {
        let mut node = Node::new("a".into(), NodeType::Relay, Position::origin(), 0.0);
        assert_eq!(node.activate(0.7, 1.0), 0.7);
        assert_eq!(node.activate(0.7, 2.0), 1.0);
        assert_eq!(node.activate(-3.0, 3.0), 0.0);
        assert_eq!(node.last_active, 3.0);
    }

    #[test]
    fn connection_bounds_hold() {
        let mut conn = Connection::new(
            "a".into(),
            "b".into(),
            ConnectionType::Synaptic,
            1.4,
            9.0,
            0.1,
            0.0,
        );
        assert_eq!(conn.strength, 1.0);
        assert_eq!(conn.weight, MAX_WEIGHT);

        conn.weaken(2.0);
        assert_eq!(conn.strength, 0.0);
        conn.strengthen(0.3, 5.0);
        assert!((conn.strength - 0.3).abs() < 1e-12);
        assert_eq!(conn.last_used, 5.0);

        conn.set_weight(-1.0);
        assert_eq!(conn.weight, MIN_WEIGHT);
    }

    #[test]
    fn distance_is_euclidean() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 4.0, 12.0);
        assert!((a.distance_to(&b) - 13.0).abs() < 1e-12);
    }

    #[test]
    fn overflowing_distance_keeps_latency_finite() {
        let far = Position::new(1e308, 0.0, 0.0);
        let near = Position::new(-1e308, 0.0, 0.0);
        assert!(far.is_finite());
        assert!(!Position::new(f64::NAN, 0.0, 0.0).is_finite());

        let distance = far.distance_to(&near);
        assert!(distance.is_infinite());
        let conn = Connection::new("a".into(), "b".into(), ConnectionType::Synaptic, 0.5, 1.0, distance, 0.0);
        assert_eq!(conn.latency, f64::MAX);
    }
}
