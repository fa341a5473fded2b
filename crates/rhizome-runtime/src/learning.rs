//! Weight adaptation on live traffic.
//!
//! Once per processing tick a random sample of connections is updated:
//!
//! | Connection type | Rule |
//! |-----------------|------|
//! | synaptic        | Hebbian, or Oja when configured |
//! | temporal        | STDP on the endpoints' last spikes |
//! | everything else | BCM against a sliding threshold |
//!
//! The BCM threshold is an exponential moving average of the mean node
//! activation, updated after each pass.

use crate::config::{LearningConfig, SynapticRule};
use crate::handle::GraphHandle;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rhizome_core::plasticity::{bcm_delta, hebbian_delta, oja_delta, stdp_delta, StdpParams};
use rhizome_core::topology::Topology;
use rhizome_core::types::{ConnectionId, ConnectionType, NodeId, Timestamp};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub struct LearningEngine {
    config: LearningConfig,
    stdp: StdpParams,
    spike_times: Mutex<HashMap<NodeId, Timestamp>>,
    threshold: Mutex<f64>,
    updates: AtomicU64,
    rng: Mutex<StdRng>,
}

/// What one learning pass looked at.
struct Sample {
    id: ConnectionId,
    connection_type: ConnectionType,
    weight: f64,
    source: NodeId,
    target: NodeId,
    pre: f64,
    post: f64,
}

impl LearningEngine {
    pub fn new(config: LearningConfig, rng: StdRng) -> Self {
        Self {
            stdp: config.stdp(),
            threshold: Mutex::new(config.initial_threshold),
            config,
            spike_times: Mutex::new(HashMap::new()),
            updates: AtomicU64::new(0),
            rng: Mutex::new(rng),
        }
    }

    /// Remember that `node` fired at `time`.
    pub fn record_spike(&self, node: &NodeId, time: Timestamp) {
        self.spike_times.lock().insert(node.clone(), time);
    }

    pub fn spike_time(&self, node: &NodeId) -> Option<Timestamp> {
        self.spike_times.lock().get(node).copied()
    }

    pub fn forget(&self, node: &NodeId) {
        self.spike_times.lock().remove(node);
    }

    pub fn threshold(&self) -> f64 {
        *self.threshold.lock()
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Weight change for one sampled connection, or `None` when the rule
    /// has nothing to work with.
    fn delta(&self, s: &Sample, threshold: f64) -> Option<f64> {
        let eta = self.config.learning_rate;
        match s.connection_type {
            ConnectionType::Synaptic => Some(match self.config.synaptic_rule {
                SynapticRule::Hebbian => hebbian_delta(eta, s.pre, s.post),
                SynapticRule::Oja => oja_delta(eta, s.pre, s.post, s.weight),
            }),
            ConnectionType::Temporal => {
                let spikes = self.spike_times.lock();
                let pre = spikes.get(&s.source)?;
                let post = spikes.get(&s.target)?;
                Some(stdp_delta(&self.stdp, *pre, *post))
            }
            _ => Some(bcm_delta(eta, s.pre, s.post, threshold)),
        }
    }

    /// Run one learning pass. Returns the number of weights changed.
    pub fn apply(&self, graph: &GraphHandle) -> usize {
        let (samples, mean_activation) = graph.read(|g| {
            let mut ids = g.connection_ids();
            ids.sort();
            let chosen: Vec<ConnectionId> = if ids.len() <= self.config.sample_size {
                ids
            } else {
                ids.choose_multiple(&mut *self.rng.lock(), self.config.sample_size)
                    .cloned()
                    .collect()
            };
            let samples: Vec<Sample> = chosen
                .into_iter()
                .filter_map(|id| {
                    let c = g.connection(&id)?;
                    Some(Sample {
                        pre: g.node(&c.source)?.activation,
                        post: g.node(&c.target)?.activation,
                        id: id.clone(),
                        connection_type: c.connection_type,
                        weight: c.weight,
                        source: c.source.clone(),
                        target: c.target.clone(),
                    })
                })
                .collect();
            (samples, g.mean_activation())
        });

        let threshold = self.threshold();
        let mut changed = 0;
        for sample in &samples {
            let Some(dw) = self.delta(sample, threshold) else {
                continue;
            };
            if dw == 0.0 {
                continue;
            }
            let applied = graph.write(|g| match g.connection_mut(&sample.id) {
                Some(c) => {
                    c.set_weight(c.weight + dw);
                    true
                }
                None => false,
            });
            if applied {
                changed += 1;
            }
        }
        self.updates.fetch_add(changed as u64, Ordering::Relaxed);

        let smoothing = self.config.threshold_smoothing;
        let mut theta = self.threshold.lock();
        *theta = smoothing * *theta + (1.0 - smoothing) * mean_activation;
        debug!(sampled = samples.len(), changed, threshold = *theta, "learning pass");
        changed
    }
}
