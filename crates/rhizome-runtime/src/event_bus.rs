//! Event bus for lifecycle events.
//!
//! Two ways to listen: a `tokio::sync::broadcast` receiver that sees every
//! event, or a typed handler registered for one [`EventKind`]. Publishing
//! never blocks. With no listeners events are dropped.

use parking_lot::RwLock;
use rhizome_core::events::{EventKind, RhizomeEvent};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 1024;

type Handler = Arc<dyn Fn(&RhizomeEvent) + Send + Sync>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RhizomeEvent>,
    handlers: Arc<RwLock<HashMap<EventKind, Vec<Handler>>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Receive every event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RhizomeEvent> {
        self.sender.subscribe()
    }

    /// Call `handler` for each event of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&RhizomeEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Number of broadcast receivers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver to handlers, then to broadcast receivers. A panicking
    /// handler is logged and does not stop the others.
    pub fn publish(&self, event: RhizomeEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(kind = ?kind, "event handler panicked");
            }
        }

        if let Ok(n) = self.sender.send(event) {
            debug!(kind = ?kind, subscribers = n, "event published");
        }
    }

    pub fn publish_all(&self, events: Vec<RhizomeEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
