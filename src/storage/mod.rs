//! Storage abstractions for failure records.
//!
//! Records are keyed by package name. Each primitive operation is atomic on
//! its own; nothing spans operations, so a reconciliation cycle interrupted
//! between its insert and purge phases leaves a superset of the failing set
//! behind until the next complete cycle.
//!
//! Stores may buffer mutations. Readers of the same store always see them at
//! once; they only become durable after [`RecordStore::flush`].
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── config.toml           # Tracker configuration
//! ├── patterns.toml         # Cause pattern overrides (optional)
//! └── records.json          # Currently failing packages
//! ```

pub mod local;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{BuildRecord, RecordFilter, RecordSummary};

// Re-export for convenience
pub use local::LocalStore;
pub use memory::MemoryStore;

/// Contents of `records.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsFile {
    /// ISO 8601 timestamp of last write
    pub updated_at: DateTime<Utc>,
    /// Total record count
    pub count: usize,
    /// Records ordered by package
    pub records: Vec<BuildRecord>,
}

impl RecordsFile {
    pub fn new(records: Vec<BuildRecord>) -> Self {
        Self {
            updated_at: Utc::now(),
            count: records.len(),
            records,
        }
    }
}

/// Keyed persistence for failure records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up the record stored for a package.
    async fn find_by_key(&self, package: &str) -> Result<Option<BuildRecord>>;

    /// Count records matching a filter.
    async fn count_matching(&self, filter: &RecordFilter) -> Result<usize>;

    /// Records matching a filter, ordered by package.
    async fn find_matching(&self, filter: &RecordFilter) -> Result<Vec<BuildRecord>>;

    /// Insert a record, replacing any record with the same package.
    async fn upsert(&self, record: BuildRecord) -> Result<()>;

    /// Set `cause` on every record whose content matches `pattern`.
    ///
    /// Returns the number of records whose cause changed.
    async fn bulk_update_where_content_matches(&self, pattern: &Regex, cause: &str)
    -> Result<usize>;

    /// Delete a package's record. Returns whether one existed.
    async fn delete_by_key(&self, package: &str) -> Result<bool>;

    /// All records ordered by package.
    async fn enumerate_all(&self) -> Result<Vec<BuildRecord>>;

    /// All records without their log tails, ordered by package.
    async fn summarize_all(&self) -> Result<Vec<RecordSummary>> {
        let records = self.enumerate_all().await?;
        Ok(records.iter().map(RecordSummary::from).collect())
    }

    /// Persist buffered mutations. A no-op for stores that do not buffer.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Record table shared by the store implementations.
pub(crate) type RecordMap = BTreeMap<String, BuildRecord>;

pub(crate) fn select(records: &RecordMap, filter: &RecordFilter) -> Vec<BuildRecord> {
    records
        .values()
        .filter(|r| filter.matches(r))
        .cloned()
        .collect()
}

pub(crate) fn summarize(records: &RecordMap) -> Vec<RecordSummary> {
    records.values().map(RecordSummary::from).collect()
}

/// Insert `record` unless an identical one is stored. Returns whether the
/// table changed.
pub(crate) fn replace(records: &mut RecordMap, record: BuildRecord) -> bool {
    if records.get(record.key()) == Some(&record) {
        return false;
    }
    records.insert(record.key().to_string(), record);
    true
}

pub(crate) fn apply_cause(records: &mut RecordMap, pattern: &Regex, cause: &str) -> usize {
    let mut changed = 0;
    for record in records.values_mut() {
        if record.cause != cause && pattern.is_match(&record.content) {
            record.cause = cause.to_string();
            changed += 1;
        }
    }
    changed
}
