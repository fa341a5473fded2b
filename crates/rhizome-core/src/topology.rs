//! Topology: read access to the rhizome's structure.
//!
//! Routing and pathfinding only need to look at the graph. They take any
//! [`Topology`] so the store behind it can change without touching them.

use crate::types::*;
use std::collections::BTreeSet;

pub trait Topology {
    /// Get a node by ID.
    fn node(&self, id: &NodeId) -> Option<&Node>;

    /// Get a connection by ID.
    fn connection(&self, id: &ConnectionId) -> Option<&Connection>;

    /// The connection between two nodes in either direction, preferring
    /// `a -> b` when both exist.
    fn connection_between(&self, a: &NodeId, b: &NodeId) -> Option<&Connection>;

    /// Neighbours of a node. Without `include_incoming` only targets of
    /// outgoing connections are returned.
    fn neighbors(&self, id: &NodeId, include_incoming: bool) -> BTreeSet<NodeId>;

    /// Entanglement partners of a node.
    fn partners(&self, id: &NodeId) -> Vec<NodeId>;

    /// All node IDs.
    fn node_ids(&self) -> Vec<NodeId>;

    /// Number of nodes.
    fn node_count(&self) -> usize;

    /// Number of connections.
    fn connection_count(&self) -> usize;

    fn contains_node(&self, id: &NodeId) -> bool {
        self.node(id).is_some()
    }

    fn position(&self, id: &NodeId) -> Option<Position> {
        self.node(id).map(|n| n.position)
    }
}
