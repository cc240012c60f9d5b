//! Pipeline entry points for tracker operations.
//!
//! - `Reconciler`: One poll cycle, inserting new failures then purging fixed ones
//! - `Scheduler`: Drives cycles on a fixed interval
//! - `run_reclassify`: Re-label stored records with the current patterns

pub mod reclassify;
pub mod reconcile;
pub mod schedule;

#[cfg(test)]
pub(crate) mod testing;

pub use reclassify::{ReclassifyReport, run_reclassify};
pub use reconcile::{CycleReport, ObservedSet, Reconciler};
pub use schedule::Scheduler;
