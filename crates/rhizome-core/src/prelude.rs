//! Rhizome Core Prelude: convenient imports for common usage.
//!
//! ```rust
//! use rhizome_core::prelude::*;
//! ```

pub use crate::types::{
    Attributes, Connection, ConnectionId, ConnectionType, Node, NodeId, NodeType, Position,
    PropagationMode, SignalId, SignalType, Timestamp, MAX_WEIGHT, MIN_WEIGHT,
};

pub use crate::signal::{
    Delivery, FailureReason, Signal, SignalOutcome, SignalRecord, SignalRequest, SignalState,
};

pub use crate::capability::{Persistable, Resonant, SnapshotHook};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::error::{Result, RhizomeError};
pub use crate::events::{EventKind, RemovalReason, RhizomeEvent};
pub use crate::plasticity::StdpParams;
pub use crate::snapshot::{GraphSnapshot, SnapshotMetadata};
pub use crate::topology::Topology;
