// src/pipeline/schedule.rs

//! Periodic cycle driver.
//!
//! Cycles run inline on the scheduler task, so a cycle that outlasts the
//! interval delays the next tick instead of overlapping it. Shutdown is
//! observed between cycles; an in-flight cycle always runs to completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::pipeline::{CycleReport, Reconciler};

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    pub async fn run_once(&self) -> CycleReport {
        self.reconciler.run_cycle().await
    }

    /// Run a cycle every interval until `shutdown` turns true.
    ///
    /// Returns the number of cycles completed.
    pub async fn run_periodic(&self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = 0;

        log::info!("Polling every {}s", self.interval.as_secs());
        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            let report = self.reconciler.run_cycle().await;
            cycles += 1;
            if report.mutated() {
                log::debug!("Cycle {cycles} changed the store");
            }

            if *shutdown.borrow() {
                break;
            }
        }

        log::info!("Scheduler stopped after {cycles} cycles");
        cycles
    }
}

/// Resolves once shutdown is requested or the sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
