// src/models/mod.rs

//! Domain models for the tracker.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod build;
mod config;
mod pattern;
mod record;

// Re-export all public types
pub use build::{BuildDescriptor, BuildListing, BuildQuery, SourcePublication};
pub use config::{
    Config, DashboardConfig, FarmConfig, FetchConfig, ScheduleConfig, TargetConfig, TrimConfig,
};
pub use pattern::{CausePattern, FALLBACK_CAUSE, PatternFile, builtin_patterns, merge_layers};
pub use record::{BuildRecord, RecordFilter, RecordSummary};

#[cfg(test)]
pub(crate) use record::sample_record;
