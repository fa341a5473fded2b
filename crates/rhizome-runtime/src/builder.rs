//! Builder wiring configuration, clock and persistence into a [`Rhizome`].
//!
//! # Example
//!
//! ```rust
//! use rhizome_runtime::prelude::*;
//! use std::sync::Arc;
//!
//! let clock = Arc::new(ManualClock::new(0.0));
//! let rhizome = RhizomeBuilder::new()
//!     .seed(42)
//!     .clock(clock.clone())
//!     .build()
//!     .unwrap();
//!
//! clock.advance(5.0);
//! assert_eq!(rhizome.now(), 5.0);
//! ```

use crate::config::RhizomeConfig;
use crate::connection_manager::ConnectionManager;
use crate::event_bus::EventBus;
use crate::handle::GraphHandle;
use crate::learning::LearningEngine;
use crate::maintenance::MaintenanceScheduler;
use crate::network::{Inner, Rhizome};
use crate::pathfinder::Pathfinder;
use crate::router::SignalRouter;
use crate::session::JsonFileHook;
use crate::topology_impl::RhizomeGraph;
use rhizome_core::capability::SnapshotHook;
use rhizome_core::clock::{Clock, SystemClock};
use rhizome_core::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

// Independent random streams per component.
const GRAPH_STREAM: u64 = 0;
const PATHFINDER_STREAM: u64 = 1;
const LEARNING_STREAM: u64 = 2;
const MAINTENANCE_STREAM: u64 = 3;

pub struct RhizomeBuilder {
    config: RhizomeConfig,
    clock: Option<Arc<dyn Clock>>,
    hook: Option<Arc<dyn SnapshotHook>>,
    event_capacity: usize,
    restore_existing: bool,
}

impl Default for RhizomeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RhizomeBuilder {
    pub fn new() -> Self {
        Self {
            config: RhizomeConfig::default(),
            clock: None,
            hook: None,
            event_capacity: 1024,
            restore_existing: false,
        }
    }

    pub fn config(mut self, config: RhizomeConfig) -> Self {
        self.config = config;
        self
    }

    /// Fix the random seed for reproducible runs.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Receiver for periodic snapshots. Without one, periodic snapshots go
    /// to `persistence.snapshot_path` when that is set.
    pub fn snapshot_hook(mut self, hook: Arc<dyn SnapshotHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Write snapshots to `path`.
    pub fn with_persistence<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.persistence.snapshot_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load the snapshot at `persistence.snapshot_path` on build, if the
    /// file exists.
    pub fn restore_existing(mut self, enabled: bool) -> Self {
        self.restore_existing = enabled;
        self
    }

    /// Capacity of the broadcast event channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Rhizome> {
        let config = self.config;
        config.validate()?;

        let hook = self.hook.or_else(|| {
            config
                .persistence
                .snapshot_path
                .clone()
                .map(|path| Arc::new(JsonFileHook::new(path)) as Arc<dyn SnapshotHook>)
        });
        let graph = GraphHandle::new(
            RhizomeGraph::new(config.graph.clone(), config.rng(GRAPH_STREAM)),
            EventBus::new(self.event_capacity),
        );

        let inner = Inner {
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            graph,
            router: SignalRouter::new(config.signals.clone()),
            pathfinder: Pathfinder::new(config.pathfinder.clone(), config.rng(PATHFINDER_STREAM)),
            learning: LearningEngine::new(config.learning.clone(), config.rng(LEARNING_STREAM)),
            manager: ConnectionManager::new(config.signals.clone(), config.connections.clone()),
            maintenance: MaintenanceScheduler::new(
                config.maintenance.clone(),
                &config.connections,
                config.rng(MAINTENANCE_STREAM),
            ),
            hook,
            config,
        };
        let rhizome = Rhizome::from_inner(inner);

        if self.restore_existing {
            let existing: Option<PathBuf> = rhizome
                .config()
                .persistence
                .snapshot_path
                .clone()
                .filter(|path| path.exists());
            if let Some(path) = existing {
                rhizome.load(&path)?;
                info!(path = %path.display(), "restored existing rhizome");
            }
        }
        Ok(rhizome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhizome_core::error::RhizomeError;

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = RhizomeConfig::default();
        config.graph.max_nodes = 0;
        let err = RhizomeBuilder::new().config(config).build().unwrap_err();
        assert!(matches!(err, RhizomeError::InvalidConfig { .. }));
    }

    #[test]
    fn seed_lands_in_config() {
        let rhizome = RhizomeBuilder::new().seed(9).build().unwrap();
        assert_eq!(rhizome.config().seed, Some(9));
    }

    #[test]
    fn restore_existing_without_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rhizome = RhizomeBuilder::new()
            .with_persistence(dir.path().join("missing.json"))
            .restore_existing(true)
            .build()
            .unwrap();
        assert_eq!(rhizome.node_count(), 0);
    }
}
