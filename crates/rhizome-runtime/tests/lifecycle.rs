//! Start/shutdown of the background loops, events and structural
//! invariants.

use rhizome_runtime::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn node_at(r: &Rhizome, id: &str, x: f64) -> NodeId {
    r.add_node(
        NewNode::new(NodeType::Processing)
            .with_id(id)
            .at(Position::new(x, 0.0, 0.0)),
    )
    .unwrap()
    .id
}

async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    done()
}

#[tokio::test]
async fn background_loops_deliver_through_latency() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("final.json");
    let mut config = RhizomeConfig::default();
    config.maintenance.auto_organize = false;
    config.maintenance.snapshot_probability = 0.0;
    config.persistence.snapshot_path = Some(snapshot_path.clone());

    let r = Rhizome::builder().config(config).seed(5).build().unwrap();
    let a = node_at(&r, "A", 0.0);
    let b = node_at(&r, "B", 10.0);
    let c = node_at(&r, "C", 20.0);
    r.add_connection(&a, &b, ConnectionType::Synaptic, 0.6).unwrap();
    r.add_connection(&b, &c, ConnectionType::Synaptic, 0.6).unwrap();

    r.start().unwrap();
    assert!(r.is_running());
    assert!(matches!(r.start(), Err(RhizomeError::Runtime(_))));

    let id = r
        .send_signal(SignalRequest::new(SignalType::Activation, a.clone()).to(c.clone()))
        .unwrap();
    assert!(wait_for(|| r.signal_record(&id).is_some()).await);

    let record = r.signal_record(&id).unwrap();
    assert_eq!(record.outcome, SignalOutcome::Delivered);
    assert_eq!(record.path, vec![a, b, c]);
    assert!((record.final_strength - 0.81).abs() < 1e-9);
    // Each hop waited out 10 units * 0.01 s.
    assert!(record.finished_at - record.created_at >= 0.15);

    r.shutdown().await;
    assert!(!r.is_running());
    assert_eq!(r.pending_signals(), 0);

    // Shutdown flushed a final snapshot.
    assert_eq!(load_snapshot(&snapshot_path).unwrap().nodes.len(), 3);
}

#[tokio::test]
async fn maintenance_loop_prunes_in_the_background() {
    let mut config = RhizomeConfig::default();
    config.maintenance.auto_organize = false;
    config.maintenance.snapshot_probability = 0.0;
    config.maintenance.maintenance_hz = 50.0;
    config.persistence.save_on_shutdown = false;

    let r = Rhizome::builder().config(config).build().unwrap();
    let a = node_at(&r, "a", 0.0);
    let b = node_at(&r, "b", 1.0);
    let id = r.add_connection(&a, &b, ConnectionType::Energetic, 0.02).unwrap().id;

    r.start().unwrap();
    assert!(wait_for(|| r.connection(&id).is_none()).await);
    assert!(r.statistics().maintenance_cycles >= 1);
    r.shutdown().await;
}

#[test]
fn typed_handlers_see_structural_events() {
    let r = Rhizome::builder().build().unwrap();
    let added = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));
    {
        let added = added.clone();
        r.on(EventKind::NodeAdded, move |_| {
            added.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let removed = removed.clone();
        r.on(EventKind::NodeRemoved, move |event| {
            if let RhizomeEvent::NodeRemoved { removed_connections, .. } = event {
                removed.fetch_add(*removed_connections, Ordering::SeqCst);
            }
        });
    }

    let ids = r.seed_network().unwrap();
    assert_eq!(added.load(Ordering::SeqCst), 5);

    assert!(r.remove_node(&ids[0]));
    assert_eq!(removed.load(Ordering::SeqCst), 4);
}

#[test]
fn handlers_may_call_back_into_the_network() {
    let r = Rhizome::builder().build().unwrap();
    let counted = Arc::new(AtomicUsize::new(0));
    {
        let inner = r.clone();
        let counted = counted.clone();
        r.on(EventKind::ConnectionAdded, move |_| {
            counted.store(inner.connection_count(), Ordering::SeqCst);
        });
    }
    let a = node_at(&r, "a", 0.0);
    let b = node_at(&r, "b", 1.0);
    r.add_connection(&a, &b, ConnectionType::Synaptic, 0.5).unwrap();
    assert_eq!(counted.load(Ordering::SeqCst), 1);
}

#[test]
fn neighbour_sets_stay_symmetric() {
    let r = Rhizome::builder().seed(2).build().unwrap();
    let ids = r.seed_network().unwrap();
    let extra = node_at(&r, "extra", 3.0);
    r.add_connection(&extra, &ids[1], ConnectionType::Semantic, 0.4).unwrap();

    for id in ids.iter().chain(std::iter::once(&extra)) {
        for n in r.get_neighbors(id) {
            assert!(r.get_neighbors(&n).contains(id), "{n} does not list {id}");
        }
    }

    assert!(r.remove_node(&ids[1]));
    for id in ids.iter().filter(|id| *id != &ids[1]).chain(std::iter::once(&extra)) {
        assert!(!r.get_neighbors(id).contains(&ids[1]));
    }
    assert_eq!(r.connection_count(), 6);
}

#[test]
fn structural_errors_are_typed() {
    let r = Rhizome::builder().build().unwrap();
    let a = node_at(&r, "a", 0.0);
    let b = node_at(&r, "b", 1.0);

    assert!(matches!(
        r.add_node(NewNode::new(NodeType::Relay).with_id("a")),
        Err(RhizomeError::DuplicateId(_))
    ));
    assert!(matches!(
        r.add_connection(&a, &"ghost".into(), ConnectionType::Synaptic, 0.5),
        Err(RhizomeError::EndpointMissing(_))
    ));
    r.add_connection(&a, &b, ConnectionType::Synaptic, 0.5).unwrap();
    assert!(matches!(
        r.add_connection(&a, &b, ConnectionType::Synaptic, 0.5),
        Err(RhizomeError::DuplicateConnection { .. })
    ));
    assert!(matches!(
        r.add_connection(&a, &a, ConnectionType::Synaptic, 0.5),
        Err(RhizomeError::SelfConnection(_))
    ));
}

#[test]
fn capacity_is_enforced() {
    let mut config = RhizomeConfig::default();
    config.graph.max_nodes = 2;
    let r = Rhizome::new(config).unwrap();
    node_at(&r, "a", 0.0);
    node_at(&r, "b", 1.0);
    assert!(matches!(
        r.add_node(NewNode::new(NodeType::Relay)),
        Err(RhizomeError::CapacityExceeded { .. })
    ));
}
