//! Weight-update rules.
//!
//! Pure functions: callers decide which connections to sample and apply
//! the returned delta through [`clamp_weight`].
//!
//! - Hebbian: co-active endpoints wire together.
//! - Oja: Hebbian with a normalising decay term that keeps weights bounded.
//! - BCM: potentiation above a sliding threshold, depression below it.
//! - STDP: the sign of the delta follows spike order.

use crate::types::{Timestamp, MAX_WEIGHT, MIN_WEIGHT};
use serde::{Deserialize, Serialize};

/// Clamp a weight into the legal `[MIN_WEIGHT, MAX_WEIGHT]` range.
pub fn clamp_weight(weight: f64) -> f64 {
    if weight.is_nan() {
        return MIN_WEIGHT;
    }
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// `dw = eta * pre * post`
pub fn hebbian_delta(learning_rate: f64, pre: f64, post: f64) -> f64 {
    learning_rate * pre * post
}

/// `dw = eta * (pre * post - w^2 * post)`
pub fn oja_delta(learning_rate: f64, pre: f64, post: f64, weight: f64) -> f64 {
    learning_rate * (pre * post - weight * weight * post)
}

/// `dw = eta * pre * post * (post - theta)`
pub fn bcm_delta(learning_rate: f64, pre: f64, post: f64, threshold: f64) -> f64 {
    learning_rate * pre * post * (post - threshold)
}

/// STDP amplitudes and time constants (seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StdpParams {
    pub a_plus: f64,
    pub a_minus: f64,
    pub tau_plus: f64,
    pub tau_minus: f64,
}

impl Default for StdpParams {
    fn default() -> Self {
        Self {
            a_plus: 0.01,
            a_minus: 0.01,
            tau_plus: 20.0,
            tau_minus: 20.0,
        }
    }
}

/// Pre-before-post potentiates, anything else depresses.
pub fn stdp_delta(params: &StdpParams, pre_spike: Timestamp, post_spike: Timestamp) -> f64 {
    let dt = post_spike - pre_spike;
    if dt > 0.0 {
        params.a_plus * (-dt / params.tau_plus).exp()
    } else {
        -params.a_minus * (dt / params.tau_minus).exp()
    }
}
