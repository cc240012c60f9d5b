//! Service layer for the tracker.
//!
//! This module contains the business logic for:
//! - Build enumeration (`LaunchpadClient`)
//! - Log retrieval and trimming (`LogFetcher`)
//! - Cause classification (`Classifier`)

mod classifier;
mod farm;
mod fetcher;

pub use classifier::{CauseRule, Classifier};
pub use farm::{BuildFarm, LaunchpadClient};
pub use fetcher::{LogFetcher, LogSource, tail_bytes, trim_log};
