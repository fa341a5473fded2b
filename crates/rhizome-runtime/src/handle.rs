//! Shared, lock-guarded access to the graph store.
//!
//! Every structural mutation goes through [`GraphHandle::write`], one lock
//! acquisition per operation. Events queued by the store are published
//! after the lock is released so handlers may call back into the network.

use crate::event_bus::EventBus;
use crate::topology_impl::RhizomeGraph;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Clone)]
pub struct GraphHandle {
    graph: Arc<RwLock<RhizomeGraph>>,
    bus: EventBus,
}

impl GraphHandle {
    pub fn new(graph: RhizomeGraph, bus: EventBus) -> Self {
        Self {
            graph: Arc::new(RwLock::new(graph)),
            bus,
        }
    }

    /// Run `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&RhizomeGraph) -> R) -> R {
        f(&self.graph.read())
    }

    /// Run `f` under the write lock, then publish the events it produced.
    pub fn write<R>(&self, f: impl FnOnce(&mut RhizomeGraph) -> R) -> R {
        let (result, events) = {
            let mut graph = self.graph.write();
            let result = f(&mut graph);
            (result, graph.drain_events())
        };
        if !events.is_empty() {
            self.bus.publish_all(events);
        }
        result
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}
