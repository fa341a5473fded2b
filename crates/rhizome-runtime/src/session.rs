//! Session persistence: save and load a rhizome snapshot as JSON.
//!
//! Floats are written with full round-trip precision so a reloaded graph
//! matches the saved one exactly.

use rhizome_core::capability::SnapshotHook;
use rhizome_core::error::{Result, RhizomeError};
use rhizome_core::snapshot::{GraphSnapshot, SNAPSHOT_VERSION};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Write `snapshot` to `path`, creating parent directories as needed.
pub fn save_snapshot(snapshot: &GraphSnapshot, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(path, json)?;
    debug!(
        path = %path.display(),
        nodes = snapshot.metadata.node_count,
        connections = snapshot.metadata.connection_count,
        "snapshot saved"
    );
    Ok(())
}

/// Read a snapshot written by [`save_snapshot`].
pub fn load_snapshot(path: &Path) -> Result<GraphSnapshot> {
    let json = std::fs::read_to_string(path)?;
    let snapshot: GraphSnapshot = serde_json::from_str(&json)?;
    if snapshot.metadata.version > SNAPSHOT_VERSION {
        return Err(RhizomeError::Serialization(format!(
            "snapshot version {} is newer than supported version {}",
            snapshot.metadata.version, SNAPSHOT_VERSION
        )));
    }
    Ok(snapshot)
}

/// Snapshot hook that overwrites one JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileHook {
    path: PathBuf,
}

impl JsonFileHook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotHook for JsonFileHook {
    fn save(&self, snapshot: &GraphSnapshot) -> Result<()> {
        save_snapshot(snapshot, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhizome_core::types::{Connection, ConnectionType, Node, NodeType, Position};

    fn sample() -> GraphSnapshot {
        let a = Node::new("a".into(), NodeType::Memory, Position::new(0.1, 0.2, 0.3), 1.0);
        let b = Node::new("b".into(), NodeType::Bloom, Position::new(1.0 / 3.0, 0.0, 0.0), 1.0);
        let c = Connection::new(
            a.id.clone(),
            b.id.clone(),
            ConnectionType::Semantic,
            0.7,
            1.3,
            0.0123456789,
            2.0,
        );
        GraphSnapshot::new(vec![a, b], vec![c], vec![], 5.5)
    }

    #[test]
    fn save_load_roundtrip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/rhizome.json");
        let snapshot = sample();

        save_snapshot(&snapshot, &path).unwrap();
        let loaded = load_snapshot(&path).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_snapshot(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, RhizomeError::Io(_)));
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_snapshot(&path).unwrap_err(),
            RhizomeError::Serialization(_)
        ));
    }

    #[test]
    fn hook_writes_to_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let hook = JsonFileHook::new(dir.path().join("hook.json"));
        hook.save(&sample()).unwrap();
        assert_eq!(load_snapshot(hook.path()).unwrap().nodes.len(), 2);
    }
}
