//! Lifecycle events emitted by the rhizome.

use crate::types::*;
use serde::{Deserialize, Serialize};

/// Discriminant of [`RhizomeEvent`], used to register typed handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NodeAdded,
    NodeRemoved,
    ConnectionAdded,
    ConnectionRemoved,
    NodeActivated,
}

/// Why a connection disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// Removed through the public API.
    Explicit,
    /// An endpoint was removed.
    NodeRemoved,
    /// Made room for a newer connection at the per-node cap.
    Evicted,
    /// Dropped by the pruning pass.
    Pruned,
    /// Dropped during self-organization.
    Reorganized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RhizomeEvent {
    NodeAdded {
        node_id: NodeId,
        node_type: NodeType,
    },
    NodeRemoved {
        node_id: NodeId,
        removed_connections: usize,
    },
    ConnectionAdded {
        connection_id: ConnectionId,
        source: NodeId,
        target: NodeId,
        connection_type: ConnectionType,
    },
    ConnectionRemoved {
        connection_id: ConnectionId,
        source: NodeId,
        target: NodeId,
        reason: RemovalReason,
    },
    NodeActivated {
        node_id: NodeId,
        activation: f64,
    },
}

impl RhizomeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RhizomeEvent::NodeAdded { .. } => EventKind::NodeAdded,
            RhizomeEvent::NodeRemoved { .. } => EventKind::NodeRemoved,
            RhizomeEvent::ConnectionAdded { .. } => EventKind::ConnectionAdded,
            RhizomeEvent::ConnectionRemoved { .. } => EventKind::ConnectionRemoved,
            RhizomeEvent::NodeActivated { .. } => EventKind::NodeActivated,
        }
    }
}
