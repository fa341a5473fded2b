//! Save/load round trips and snapshot hooks.

use rhizome_runtime::prelude::*;
use std::sync::Arc;

fn populated() -> Rhizome {
    let r = Rhizome::builder().seed(17).build().unwrap();
    let seeds = r.seed_network().unwrap();
    let q1 = r
        .add_node(NewNode::new(NodeType::Quantum).with_id("q1").with_frequency(3.3))
        .unwrap()
        .id;
    let q2 = r.add_node(NewNode::new(NodeType::Quantum).with_id("q2")).unwrap().id;
    r.entangle(&q1, &q2).unwrap();
    r.add_weighted_connection(&q1, &seeds[0], ConnectionType::Temporal, 1.0 / 3.0, 1.7)
        .unwrap();
    r.activate_node(&seeds[2], 0.37).unwrap();
    r
}

#[test]
fn save_then_load_reproduces_the_graph_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state/rhizome.json");
    let original = populated();
    original.save(&path).unwrap();

    let restored = Rhizome::builder().seed(99).build().unwrap();
    restored.load(&path).unwrap();

    let (before, after) = (original.snapshot(), restored.snapshot());
    assert_eq!(after.nodes, before.nodes);
    assert_eq!(after.connections, before.connections);
    assert_eq!(after.entangled_pairs, before.entangled_pairs);
    assert_eq!(restored.statistics().entangled_pair_count, 1);

    // Restored structure is live, not just data.
    let q1: NodeId = "q1".into();
    assert_eq!(restored.get_neighbors(&q1).len(), 1);
}

#[test]
fn failed_load_leaves_the_graph_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{\"metadata\": 1}").unwrap();

    let r = populated();
    let before = r.node_count();
    assert!(r.load(&path).is_err());
    assert!(r.load(&dir.path().join("absent.json")).is_err());
    assert_eq!(r.node_count(), before);
}

#[test]
fn inconsistent_snapshot_is_rejected() {
    let r = populated();
    let mut snapshot = r.snapshot();
    snapshot.nodes.retain(|n| n.id.as_str() != "q2");

    let fresh = Rhizome::builder().build().unwrap();
    assert!(fresh.restore(snapshot).is_err());
    assert_eq!(fresh.node_count(), 0);
}

#[derive(Default)]
struct MemoryHook(parking_lot::Mutex<Vec<GraphSnapshot>>);

impl SnapshotHook for MemoryHook {
    fn save(&self, snapshot: &GraphSnapshot) -> Result<()> {
        self.0.lock().push(snapshot.clone());
        Ok(())
    }
}

#[test]
fn maintenance_hands_snapshots_to_the_hook() {
    let hook = Arc::new(MemoryHook::default());
    let mut config = RhizomeConfig::default();
    config.maintenance.snapshot_probability = 1.0;
    config.maintenance.auto_organize = false;

    let r = Rhizome::builder()
        .config(config)
        .snapshot_hook(hook.clone())
        .build()
        .unwrap();
    r.seed_network().unwrap();
    let report = r.maintenance_tick();

    assert!(report.snapshot_taken);
    assert_eq!(hook.0.lock().len(), 1);
    assert_eq!(hook.0.lock()[0].nodes.len(), 5);
    assert_eq!(r.statistics().snapshots_taken, 1);
}

#[test]
fn builder_restores_an_existing_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rhizome.json");
    populated().save(&path).unwrap();

    let r = Rhizome::builder()
        .with_persistence(&path)
        .restore_existing(true)
        .build()
        .unwrap();
    assert_eq!(r.node_count(), 7);
}
