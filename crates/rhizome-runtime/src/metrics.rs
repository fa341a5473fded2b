//! Statistics reported by a running rhizome.

use crate::connection_manager::ConnectionState;
use rhizome_core::types::{ConnectionType, NodeType, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;

/// Structural summary of the graph store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub connection_count: usize,
    pub entangled_pairs: usize,
    /// Mean size of the neighbour sets.
    pub average_degree: f64,
    pub nodes_by_type: BTreeMap<NodeType, usize>,
    pub connections_by_type: BTreeMap<ConnectionType, usize>,
    pub total_energy: f64,
    pub total_activation: f64,
    pub mean_activation: f64,
}

/// Per-connection traffic counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionMetrics {
    pub total_signals: u64,
    pub successful_transmissions: u64,
    pub failed_transmissions: u64,
    /// Running mean of the connection's latency over carried signals.
    pub average_latency: f64,
    /// Sum of signal strength carried across the connection.
    pub energy_transferred: f64,
    pub last_signal_time: Option<Timestamp>,
}

impl ConnectionMetrics {
    pub(crate) fn record_transmission(&mut self, latency: f64, strength: f64, now: Timestamp) {
        self.total_signals += 1;
        self.successful_transmissions += 1;
        let n = self.total_signals as f64;
        self.average_latency += (latency - self.average_latency) / n;
        self.energy_transferred += strength;
        self.last_signal_time = Some(now);
    }
}

/// Network-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RhizomeStats {
    pub signals_sent: u64,
    pub signals_delivered: u64,
    pub signals_failed: u64,
    /// Signals dropped from a full queue.
    pub signals_dropped: u64,
    /// Delivered over sent, 0 before anything was sent.
    pub delivery_rate: f64,
    pub queue_len: usize,
    pub connection_state_histogram: BTreeMap<ConnectionState, usize>,
    pub cache_hit_rate: f64,
    pub cache_size: usize,
    pub learning_updates: u64,
    pub learning_threshold: f64,
    pub entangled_pair_count: usize,
    pub reorganization_count: u64,
    pub maintenance_cycles: u64,
    pub snapshots_taken: u64,
    pub graph: GraphStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmission_updates_running_latency() {
        let mut m = ConnectionMetrics::default();
        m.record_transmission(0.1, 0.9, 1.0);
        m.record_transmission(0.3, 0.5, 2.0);
        assert_eq!(m.total_signals, 2);
        assert_eq!(m.successful_transmissions, 2);
        assert!((m.average_latency - 0.2).abs() < 1e-12);
        assert!((m.energy_transferred - 1.4).abs() < 1e-12);
        assert_eq!(m.last_signal_time, Some(2.0));
    }
}
