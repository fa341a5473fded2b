//! Serializable snapshot of a whole rhizome.

use crate::types::*;
use serde::{Deserialize, Serialize};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: u32,
    pub saved_at: Timestamp,
    pub node_count: usize,
    pub connection_count: usize,
}

/// Every node, connection and entanglement pair of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub metadata: SnapshotMetadata,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub entangled_pairs: Vec<(NodeId, NodeId)>,
}

impl GraphSnapshot {
    pub fn new(
        nodes: Vec<Node>,
        connections: Vec<Connection>,
        entangled_pairs: Vec<(NodeId, NodeId)>,
        saved_at: Timestamp,
    ) -> Self {
        Self {
            metadata: SnapshotMetadata {
                version: SNAPSHOT_VERSION,
                saved_at,
                node_count: nodes.len(),
                connection_count: connections.len(),
            },
            nodes,
            connections,
            entangled_pairs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
