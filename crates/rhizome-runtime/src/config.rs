//! Configuration for a rhizome network.
//!
//! Every field has a default, so a partial TOML document (or none at all)
//! yields a working configuration:
//!
//! ```toml
//! seed = 7
//!
//! [graph]
//! max_nodes = 500
//!
//! [learning]
//! synaptic_rule = "oja"
//! ```

use crate::pathfinder::PathAlgorithm;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rhizome_core::error::{Result, RhizomeError};
use rhizome_core::plasticity::StdpParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RhizomeConfig {
    /// Seed for every random choice the network makes. `None` seeds from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default)]
    pub connections: ConnectionConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub pathfinder: PathfinderConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Graph store limits and placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    /// Outgoing connections per node before the weakest is evicted.
    #[serde(default = "default_max_connections_per_node")]
    pub max_connections_per_node: usize,
    /// Standard deviation of the jitter around a type's cluster centre.
    #[serde(default = "default_cluster_jitter")]
    pub cluster_jitter: f64,
    #[serde(default = "default_spatial_cell_size")]
    pub spatial_cell_size: f64,
    /// Seconds of latency per unit of distance between endpoints.
    #[serde(default = "default_latency_per_unit")]
    pub latency_per_unit: f64,
    /// Wire newly added nodes to their neighbourhood automatically.
    #[serde(default)]
    pub auto_connect_on_add: bool,
    #[serde(default = "default_auto_connect_radius")]
    pub auto_connect_radius: f64,
    #[serde(default = "default_max_auto_connections")]
    pub max_auto_connections: usize,
    /// Chance that an auto-connection touching a quantum node is quantum-typed.
    #[serde(default = "default_quantum_probability")]
    pub quantum_probability: f64,
    /// Fraction of an activation passed on to entanglement partners.
    #[serde(default = "default_partner_activation")]
    pub partner_activation: f64,
}

/// Signal queueing and propagation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_process_hz")]
    pub process_hz: f64,
    /// Signals weaker than this are dropped.
    #[serde(default = "default_min_strength")]
    pub min_strength: f64,
    #[serde(default = "default_max_hops")]
    pub default_max_hops: u32,
    #[serde(default = "default_resonance_tolerance")]
    pub resonance_tolerance: f64,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Strength added to a connection each time a signal crosses it.
    #[serde(default = "default_traversal_boost")]
    pub traversal_boost: f64,
    /// Deliveries longer than this are logged.
    #[serde(default = "default_long_path_hops")]
    pub long_path_hops: u32,
    /// Wait out connection latency on a timer instead of re-queueing at once.
    #[serde(default = "default_true")]
    pub defer_latency: bool,
}

/// Connection state machine thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_pruning_threshold")]
    pub pruning_threshold: f64,
    #[serde(default = "default_strengthening_threshold")]
    pub strengthening_threshold: f64,
    #[serde(default = "default_dormant_after")]
    pub dormant_after_secs: f64,
    #[serde(default = "default_strengthen_factor")]
    pub strengthen_factor: f64,
    #[serde(default = "default_weaken_factor")]
    pub weaken_factor: f64,
    #[serde(default = "default_dormant_factor")]
    pub dormant_factor: f64,
    #[serde(default = "default_pathway_boost")]
    pub pathway_boost: f64,
    #[serde(default = "default_pathway_strength")]
    pub pathway_initial_strength: f64,
    #[serde(default = "default_pathway_depth")]
    pub pathway_max_depth: usize,
}

/// Rule applied to synaptic connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SynapticRule {
    #[default]
    Hebbian,
    Oja,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Connections sampled per processing tick.
    #[serde(default = "default_learning_sample")]
    pub sample_size: usize,
    #[serde(default = "default_initial_threshold")]
    pub initial_threshold: f64,
    /// Weight of the previous BCM threshold in its moving average.
    #[serde(default = "default_threshold_smoothing")]
    pub threshold_smoothing: f64,
    #[serde(default)]
    pub synaptic_rule: SynapticRule,
    #[serde(default = "default_stdp_amplitude")]
    pub stdp_a_plus: f64,
    #[serde(default = "default_stdp_amplitude")]
    pub stdp_a_minus: f64,
    #[serde(default = "default_stdp_tau")]
    pub stdp_tau_plus: f64,
    #[serde(default = "default_stdp_tau")]
    pub stdp_tau_minus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathfinderConfig {
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_eviction_fraction")]
    pub eviction_fraction: f64,
    /// Candidates returned by the greedy scorer.
    #[serde(default = "default_greedy_candidates")]
    pub greedy_candidates: usize,
    /// Search used for memory and query signals.
    #[serde(default)]
    pub algorithm: PathAlgorithm,
    #[serde(default = "default_beam_width")]
    pub beam_width: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_hz")]
    pub maintenance_hz: f64,
    /// Activation subtracted from every node per cycle.
    #[serde(default = "default_activation_decay")]
    pub activation_decay: f64,
    #[serde(default = "default_connection_decay")]
    pub connection_decay_rate: f64,
    /// Idle seconds before a connection starts to decay.
    #[serde(default = "default_idle_grace")]
    pub idle_grace_secs: f64,
    /// Connections weaker than this are pruned by maintenance.
    #[serde(default = "default_prune_below")]
    pub prune_below: f64,
    #[serde(default = "default_true")]
    pub auto_organize: bool,
    /// Chance per cycle of pruning the picked node's weakest connection.
    #[serde(default = "default_reorganize_probability")]
    pub reorganize_probability: f64,
    /// Self-organization only prunes connections weaker than this.
    #[serde(default = "default_reorganize_prune_below")]
    pub reorganize_prune_below: f64,
    #[serde(default = "default_snapshot_probability")]
    pub snapshot_probability: f64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Where periodic and shutdown snapshots are written.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub save_on_shutdown: bool,
}

// Default value functions
fn default_true() -> bool { true }
fn default_max_nodes() -> usize { 10_000 }
fn default_max_connections_per_node() -> usize { 50 }
fn default_cluster_jitter() -> f64 { 5.0 }
fn default_spatial_cell_size() -> f64 { 10.0 }
fn default_latency_per_unit() -> f64 { 0.01 }
fn default_auto_connect_radius() -> f64 { 20.0 }
fn default_max_auto_connections() -> usize { 5 }
fn default_quantum_probability() -> f64 { 0.1 }
fn default_partner_activation() -> f64 { 0.8 }
fn default_max_queue() -> usize { 10_000 }
fn default_batch_size() -> usize { 100 }
fn default_process_hz() -> f64 { 100.0 }
fn default_min_strength() -> f64 { 0.1 }
fn default_max_hops() -> u32 { 10 }
fn default_resonance_tolerance() -> f64 { 0.1 }
fn default_history_size() -> usize { 1000 }
fn default_traversal_boost() -> f64 { 0.01 }
fn default_long_path_hops() -> u32 { 5 }
fn default_pruning_threshold() -> f64 { 0.05 }
fn default_strengthening_threshold() -> f64 { 0.8 }
fn default_dormant_after() -> f64 { 300.0 }
fn default_strengthen_factor() -> f64 { 1.1 }
fn default_weaken_factor() -> f64 { 0.9 }
fn default_dormant_factor() -> f64 { 0.95 }
fn default_pathway_boost() -> f64 { 0.2 }
fn default_pathway_strength() -> f64 { 0.5 }
fn default_pathway_depth() -> usize { 10 }
fn default_learning_rate() -> f64 { 0.01 }
fn default_learning_sample() -> usize { 100 }
fn default_initial_threshold() -> f64 { 0.5 }
fn default_threshold_smoothing() -> f64 { 0.9 }
fn default_stdp_amplitude() -> f64 { 0.01 }
fn default_stdp_tau() -> f64 { 20.0 }
fn default_cache_size() -> usize { 1000 }
fn default_eviction_fraction() -> f64 { 0.2 }
fn default_greedy_candidates() -> usize { 3 }
fn default_beam_width() -> usize { 3 }
fn default_maintenance_hz() -> f64 { 10.0 }
fn default_activation_decay() -> f64 { 0.05 }
fn default_connection_decay() -> f64 { 0.01 }
fn default_idle_grace() -> f64 { 60.0 }
fn default_prune_below() -> f64 { 0.1 }
fn default_reorganize_probability() -> f64 { 0.1 }
fn default_reorganize_prune_below() -> f64 { 0.3 }
fn default_snapshot_probability() -> f64 { 0.01 }
fn default_shutdown_timeout() -> f64 { 5.0 }

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_nodes: default_max_nodes(),
            max_connections_per_node: default_max_connections_per_node(),
            cluster_jitter: default_cluster_jitter(),
            spatial_cell_size: default_spatial_cell_size(),
            latency_per_unit: default_latency_per_unit(),
            auto_connect_on_add: false,
            auto_connect_radius: default_auto_connect_radius(),
            max_auto_connections: default_max_auto_connections(),
            quantum_probability: default_quantum_probability(),
            partner_activation: default_partner_activation(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            max_queue: default_max_queue(),
            batch_size: default_batch_size(),
            process_hz: default_process_hz(),
            min_strength: default_min_strength(),
            default_max_hops: default_max_hops(),
            resonance_tolerance: default_resonance_tolerance(),
            history_size: default_history_size(),
            traversal_boost: default_traversal_boost(),
            long_path_hops: default_long_path_hops(),
            defer_latency: true,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pruning_threshold: default_pruning_threshold(),
            strengthening_threshold: default_strengthening_threshold(),
            dormant_after_secs: default_dormant_after(),
            strengthen_factor: default_strengthen_factor(),
            weaken_factor: default_weaken_factor(),
            dormant_factor: default_dormant_factor(),
            pathway_boost: default_pathway_boost(),
            pathway_initial_strength: default_pathway_strength(),
            pathway_max_depth: default_pathway_depth(),
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            sample_size: default_learning_sample(),
            initial_threshold: default_initial_threshold(),
            threshold_smoothing: default_threshold_smoothing(),
            synaptic_rule: SynapticRule::default(),
            stdp_a_plus: default_stdp_amplitude(),
            stdp_a_minus: default_stdp_amplitude(),
            stdp_tau_plus: default_stdp_tau(),
            stdp_tau_minus: default_stdp_tau(),
        }
    }
}

impl LearningConfig {
    pub fn stdp(&self) -> StdpParams {
        StdpParams {
            a_plus: self.stdp_a_plus,
            a_minus: self.stdp_a_minus,
            tau_plus: self.stdp_tau_plus,
            tau_minus: self.stdp_tau_minus,
        }
    }
}

impl Default for PathfinderConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            eviction_fraction: default_eviction_fraction(),
            greedy_candidates: default_greedy_candidates(),
            algorithm: PathAlgorithm::default(),
            beam_width: default_beam_width(),
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            maintenance_hz: default_maintenance_hz(),
            activation_decay: default_activation_decay(),
            connection_decay_rate: default_connection_decay(),
            idle_grace_secs: default_idle_grace(),
            prune_below: default_prune_below(),
            auto_organize: true,
            reorganize_probability: default_reorganize_probability(),
            reorganize_prune_below: default_reorganize_prune_below(),
            snapshot_probability: default_snapshot_probability(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            save_on_shutdown: true,
        }
    }
}

impl RhizomeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RhizomeConfig =
            toml::from_str(content).map_err(|e| RhizomeError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RhizomeError::Serialization(e.to_string()))
    }

    /// The default configuration as a TOML document.
    pub fn default_toml() -> Result<String> {
        Self::default().to_toml()
    }

    /// Reject values the network cannot run with.
    pub fn validate(&self) -> Result<()> {
        positive_count("graph.max_nodes", self.graph.max_nodes)?;
        positive_count(
            "graph.max_connections_per_node",
            self.graph.max_connections_per_node,
        )?;
        positive("graph.spatial_cell_size", self.graph.spatial_cell_size)?;
        non_negative("graph.cluster_jitter", self.graph.cluster_jitter)?;
        non_negative("graph.latency_per_unit", self.graph.latency_per_unit)?;
        unit("graph.quantum_probability", self.graph.quantum_probability)?;
        unit("graph.partner_activation", self.graph.partner_activation)?;

        positive_count("signals.max_queue", self.signals.max_queue)?;
        positive_count("signals.batch_size", self.signals.batch_size)?;
        positive_count("signals.history_size", self.signals.history_size)?;
        positive("signals.process_hz", self.signals.process_hz)?;
        unit("signals.min_strength", self.signals.min_strength)?;
        positive("signals.resonance_tolerance", self.signals.resonance_tolerance)?;
        if self.signals.default_max_hops == 0 {
            return Err(RhizomeError::invalid_config(
                "signals.default_max_hops",
                "must be at least 1",
            ));
        }

        unit("connections.pruning_threshold", self.connections.pruning_threshold)?;
        unit(
            "connections.strengthening_threshold",
            self.connections.strengthening_threshold,
        )?;
        if self.connections.pruning_threshold >= self.connections.strengthening_threshold {
            return Err(RhizomeError::invalid_config(
                "connections.pruning_threshold",
                "must be below strengthening_threshold",
            ));
        }

        unit("learning.learning_rate", self.learning.learning_rate)?;
        unit("learning.threshold_smoothing", self.learning.threshold_smoothing)?;
        positive("learning.stdp_tau_plus", self.learning.stdp_tau_plus)?;
        positive("learning.stdp_tau_minus", self.learning.stdp_tau_minus)?;

        unit("pathfinder.eviction_fraction", self.pathfinder.eviction_fraction)?;
        positive_count("pathfinder.greedy_candidates", self.pathfinder.greedy_candidates)?;
        positive_count("pathfinder.beam_width", self.pathfinder.beam_width)?;

        positive("maintenance.maintenance_hz", self.maintenance.maintenance_hz)?;
        unit("maintenance.activation_decay", self.maintenance.activation_decay)?;
        unit("maintenance.connection_decay_rate", self.maintenance.connection_decay_rate)?;
        unit("maintenance.reorganize_probability", self.maintenance.reorganize_probability)?;
        unit("maintenance.snapshot_probability", self.maintenance.snapshot_probability)?;
        non_negative("maintenance.shutdown_timeout_secs", self.maintenance.shutdown_timeout_secs)?;
        Ok(())
    }

    /// A random generator for one component. Components draw from separate
    /// streams so a fixed seed gives reproducible runs.
    pub(crate) fn rng(&self, stream: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_entropy(),
        }
    }
}

fn positive_count(field: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(RhizomeError::invalid_config(field, "must be greater than 0"));
    }
    Ok(())
}

fn positive(field: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(RhizomeError::invalid_config(
            field,
            format!("{} is not a positive number", value),
        ));
    }
    Ok(())
}

fn non_negative(field: &str, value: f64) -> Result<()> {
    if !(value >= 0.0 && value.is_finite()) {
        return Err(RhizomeError::invalid_config(
            field,
            format!("{} is negative", value),
        ));
    }
    Ok(())
}

fn unit(field: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(RhizomeError::invalid_config(
            field,
            format!("{} is outside [0, 1]", value),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RhizomeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.graph.max_nodes, 10_000);
        assert_eq!(config.signals.batch_size, 100);
        assert_eq!(config.connections.pruning_threshold, 0.05);
        assert_eq!(config.learning.synaptic_rule, SynapticRule::Hebbian);
        assert!(!config.graph.auto_connect_on_add);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = RhizomeConfig::from_toml_str(
            r#"
            seed = 7

            [graph]
            max_nodes = 500

            [learning]
            synaptic_rule = "oja"
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.graph.max_nodes, 500);
        assert_eq!(config.graph.max_connections_per_node, 50);
        assert_eq!(config.learning.synaptic_rule, SynapticRule::Oja);
        assert_eq!(config.maintenance.maintenance_hz, 10.0);
    }

    #[test]
    fn pathfinder_search_is_selectable() {
        let config = RhizomeConfig::from_toml_str(
            "[pathfinder]\nalgorithm = \"beam_search\"\nbeam_width = 5\n",
        )
        .unwrap();
        assert_eq!(config.pathfinder.algorithm, PathAlgorithm::BeamSearch);
        assert_eq!(config.pathfinder.beam_width, 5);
        assert_eq!(RhizomeConfig::default().pathfinder.algorithm, PathAlgorithm::AStar);

        let err = RhizomeConfig::from_toml_str("[pathfinder]\nbeam_width = 0\n").unwrap_err();
        assert!(matches!(err, RhizomeError::InvalidConfig { ref field, .. } if field == "pathfinder.beam_width"));
    }

    #[test]
    fn default_toml_round_trips() {
        let rendered = RhizomeConfig::default_toml().unwrap();
        let parsed = RhizomeConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, RhizomeConfig::default());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = RhizomeConfig::from_toml_str("[signals]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, RhizomeError::InvalidConfig { ref field, .. } if field == "signals.batch_size"));

        let mut config = RhizomeConfig::default();
        config.connections.pruning_threshold = 0.9;
        assert!(config.validate().is_err());

        let mut config = RhizomeConfig::default();
        config.maintenance.activation_decay = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_serialization_error() {
        let err = RhizomeConfig::from_toml_str("graph = [").unwrap_err();
        assert!(matches!(err, RhizomeError::Serialization(_)));
    }
}
