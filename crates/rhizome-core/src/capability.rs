//! Capability traits.
//!
//! Behaviour that only some entities have is expressed as a trait the
//! entity opts into, instead of probing for optional attributes.

use crate::error::Result;
use crate::snapshot::GraphSnapshot;
use crate::types::Node;

/// Anything with a resonance frequency.
pub trait Resonant {
    fn resonance_frequency(&self) -> Option<f64>;

    /// True when the frequency is strictly within `tolerance` of `frequency`.
    fn resonates_with(&self, frequency: f64, tolerance: f64) -> bool {
        self.resonance_frequency()
            .map_or(false, |own| (own - frequency).abs() < tolerance)
    }
}

impl Resonant for Node {
    fn resonance_frequency(&self) -> Option<f64> {
        self.resonance_frequency
    }
}

/// State that can be captured and restored wholesale.
pub trait Persistable {
    type Snapshot;

    fn snapshot(&self) -> Self::Snapshot;

    /// Replace the current state with `snapshot`.
    fn restore(&mut self, snapshot: Self::Snapshot) -> Result<()>;
}

/// Receiver for periodic snapshots. The storage format is up to the
/// implementor.
pub trait SnapshotHook: Send + Sync {
    fn save(&self, snapshot: &GraphSnapshot) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeType, Position};

    #[test]
    fn resonance_uses_strict_tolerance() {
        let mut node = Node::new("r".into(), NodeType::Bloom, Position::origin(), 0.0);
        assert!(!node.resonates_with(7.83, 0.1));
        node.resonance_frequency = Some(7.83);
        assert!(node.resonates_with(7.9, 0.1));
        assert!(!node.resonates_with(8.0, 0.1));
    }
}
