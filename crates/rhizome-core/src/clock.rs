//! Time sources.
//!
//! Idle decay, dormancy and STDP all compare timestamps, so the network
//! reads time through a [`Clock`] rather than calling the system clock
//! directly. Tests drive a [`ManualClock`].

use crate::types::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in seconds.
    fn now(&self) -> Timestamp;
}

/// Seconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.bits.store(time.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        let _ = self
            .bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + seconds).to_bits())
            });
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100.0);
        clock.advance(61.5);
        assert_eq!(clock.now(), 161.5);
        clock.set(5.0);
        assert_eq!(clock.now(), 5.0);
    }

    #[test]
    fn system_clock_is_past_epoch() {
        assert!(SystemClock.now() > 1_600_000_000.0);
    }
}
