//! Rhizome Runtime Prelude: convenient imports for common usage.
//!
//! ```rust
//! use rhizome_runtime::prelude::*;
//! ```

// Re-export the network handle and its builder
pub use crate::builder::RhizomeBuilder;
pub use crate::network::Rhizome;

// Re-export configuration
pub use crate::config::{
    ConnectionConfig, GraphConfig, LearningConfig, MaintenanceConfig, PathfinderConfig,
    PersistenceConfig, RhizomeConfig, SignalConfig, SynapticRule,
};

// Re-export graph store
pub use crate::handle::GraphHandle;
pub use crate::topology_impl::{NewNode, NodeQuery, RhizomeGraph};

// Re-export reports and statistics
pub use crate::connection_manager::{ConnectionState, TickReport};
pub use crate::maintenance::MaintenanceReport;
pub use crate::metrics::{ConnectionMetrics, GraphStats, RhizomeStats};

// Re-export session
pub use crate::session::{load_snapshot, save_snapshot, JsonFileHook};

pub use crate::event_bus::EventBus;
pub use crate::pathfinder::{a_star, ConnectivityReport, FoundPath, PathAlgorithm};
pub use crate::scheduler::TickTimer;

// Re-export from core
pub use rhizome_core::prelude::*;
