//! Signals: typed messages that travel through the rhizome.
//!
//! A signal is created by [`SignalRequest::into_signal`], queued, moved hop
//! by hop, and ends as a [`SignalRecord`] with a terminal outcome.

use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Why a signal stopped without reaching its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    TooWeak,
    MaxHops,
    Unreachable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureReason::TooWeak => "too-weak",
            FailureReason::MaxHops => "max-hops",
            FailureReason::Unreachable => "unreachable",
        })
    }
}

/// Lifecycle of a signal. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalState {
    Created,
    Queued,
    InTransit,
    Delivered,
    Failed(FailureReason),
}

impl SignalState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignalState::Delivered | SignalState::Failed(_))
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_advance_to(&self, next: SignalState) -> bool {
        use SignalState::*;
        match (self, next) {
            (Created, Queued) => true,
            (Queued, InTransit) | (InTransit, InTransit) => true,
            (Queued | InTransit, Delivered | Failed(_)) => true,
            _ => false,
        }
    }
}

/// One node reached by a signal, with the strength it arrived at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub node: NodeId,
    pub strength: f64,
    pub hops: u32,
}

/// Parameters for a new signal. Timestamps and ids are assigned on send.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRequest {
    pub signal_type: SignalType,
    pub source: NodeId,
    pub target: Option<NodeId>,
    pub payload: Value,
    pub strength: f64,
    pub decay_rate: f64,
    pub mode: PropagationMode,
    pub max_hops: Option<u32>,
    pub resonance_frequency: Option<f64>,
    pub metadata: Attributes,
}

impl SignalRequest {
    pub fn new(signal_type: SignalType, source: impl Into<NodeId>) -> Self {
        Self {
            signal_type,
            source: source.into(),
            target: None,
            payload: Value::Null,
            strength: 1.0,
            decay_rate: 0.1,
            mode: PropagationMode::Directed,
            max_hops: None,
            resonance_frequency: None,
            metadata: Attributes::new(),
        }
    }

    pub fn to(mut self, target: impl Into<NodeId>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = decay_rate;
        self
    }

    pub fn mode(mut self, mode: PropagationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    pub fn frequency(mut self, frequency: f64) -> Self {
        self.resonance_frequency = Some(frequency);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Materialise the request into a live signal.
    pub fn into_signal(self, now: Timestamp, default_max_hops: u32) -> Signal {
        Signal {
            id: SignalId::generate(),
            signal_type: self.signal_type,
            path: vec![self.source.clone()],
            source: self.source,
            target: self.target,
            payload: self.payload,
            strength: self.strength,
            decay_rate: self.decay_rate.clamp(0.0, 1.0),
            hops: 0,
            max_hops: self.max_hops.unwrap_or(default_max_hops),
            mode: self.mode,
            resonance_frequency: self.resonance_frequency,
            metadata: self.metadata,
            frontier: Vec::new(),
            deliveries: Vec::new(),
            state: SignalState::Created,
            created_at: now,
        }
    }
}

/// A signal in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub signal_type: SignalType,
    pub source: NodeId,
    pub target: Option<NodeId>,
    pub payload: Value,
    pub strength: f64,
    pub decay_rate: f64,
    /// Visited nodes in order. Never contains duplicates.
    pub path: Vec<NodeId>,
    pub hops: u32,
    pub max_hops: u32,
    pub mode: PropagationMode,
    pub resonance_frequency: Option<f64>,
    pub metadata: Attributes,
    /// Current expansion level for cascade and flood propagation.
    #[serde(default)]
    pub frontier: Vec<NodeId>,
    #[serde(default)]
    pub deliveries: Vec<Delivery>,
    pub state: SignalState,
    pub created_at: Timestamp,
}

impl Signal {
    /// The node the signal currently sits on.
    pub fn current(&self) -> &NodeId {
        self.path.last().unwrap_or(&self.source)
    }

    pub fn has_visited(&self, node: &NodeId) -> bool {
        self.path.contains(node)
    }

    /// Move one hop: append `next`, count the hop and decay strength.
    pub fn forward(&mut self, next: NodeId) {
        self.path.push(next);
        self.hops += 1;
        self.decay();
    }

    pub fn decay(&mut self) {
        self.strength *= 1.0 - self.decay_rate;
    }

    /// Advance the lifecycle state. Illegal transitions are ignored and
    /// reported as `false`.
    pub fn advance(&mut self, next: SignalState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// Close the signal out into a history record.
    pub fn finish(mut self, outcome: SignalOutcome, now: Timestamp) -> SignalRecord {
        let state = match outcome {
            SignalOutcome::Delivered => SignalState::Delivered,
            SignalOutcome::Failed(reason) => SignalState::Failed(reason),
        };
        self.advance(state);
        SignalRecord {
            id: self.id,
            signal_type: self.signal_type,
            mode: self.mode,
            source: self.source,
            target: self.target,
            outcome,
            path: self.path,
            hops: self.hops,
            final_strength: self.strength,
            deliveries: self.deliveries,
            created_at: self.created_at,
            finished_at: now,
        }
    }
}

/// Terminal outcome of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    Delivered,
    Failed(FailureReason),
}

impl SignalOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SignalOutcome::Delivered)
    }
}

/// History entry for a finished signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: SignalId,
    pub signal_type: SignalType,
    pub mode: PropagationMode,
    pub source: NodeId,
    pub target: Option<NodeId>,
    pub outcome: SignalOutcome,
    pub path: Vec<NodeId>,
    pub hops: u32,
    pub final_strength: f64,
    pub deliveries: Vec<Delivery>,
    pub created_at: Timestamp,
    pub finished_at: Timestamp,
}

impl SignalRecord {
    /// Strength at which `node` was reached, if it was.
    pub fn delivered_strength(&self, node: &NodeId) -> Option<f64> {
        self.deliveries
            .iter()
            .find(|d| &d.node == node)
            .map(|d| d.strength)
    }
}
