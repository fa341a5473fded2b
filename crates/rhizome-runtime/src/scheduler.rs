//! Background loops driven by tokio timers.
//!
//! Each loop ticks at a fixed rate until its cancellation channel flips.
//! A panicking iteration is logged and the loop carries on.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error};

/// Paces a loop at a fixed rate. Late ticks are skipped rather than
/// bunched up.
pub struct TickTimer {
    interval: Interval,
}

impl TickTimer {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    /// A timer firing `hz` times per second.
    pub fn from_hz(hz: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / hz.max(f64::MIN_POSITIVE)))
    }

    /// Wait for the next tick.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Spawn `step` at `hz` until `cancel` carries `true` or its sender is
/// dropped.
pub fn spawn_loop<F>(
    name: &'static str,
    hz: f64,
    mut cancel: watch::Receiver<bool>,
    mut step: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut timer = TickTimer::from_hz(hz);
        debug!(loop_name = name, hz, "loop started");
        loop {
            tokio::select! {
                _ = timer.tick() => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *cancel.borrow() {
                break;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(&mut step)) {
                error!(loop_name = name, panic = %panic_message(panic.as_ref()), "loop iteration panicked");
            }
        }
        debug!(loop_name = name, "loop stopped");
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn loop_survives_panics_and_stops_on_cancel() {
        let (tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handle = spawn_loop("test", 200.0, rx, move || {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                panic!("first iteration fails");
            }
        });

        while count.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn dropping_the_sender_stops_the_loop() {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_loop("test", 100.0, rx, || {});
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
