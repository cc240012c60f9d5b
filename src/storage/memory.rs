//! In-memory record store for tests and throwaway runs.

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{BuildRecord, RecordFilter, RecordSummary};
use crate::storage::{RecordMap, RecordStore, apply_cause, select, summarize};

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<RecordMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = BuildRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.key().to_string(), r))
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_by_key(&self, package: &str) -> Result<Option<BuildRecord>> {
        Ok(self.records.lock().await.get(package).cloned())
    }

    async fn count_matching(&self, filter: &RecordFilter) -> Result<usize> {
        let records = self.records.lock().await;
        Ok(records.values().filter(|r| filter.matches(r)).count())
    }

    async fn find_matching(&self, filter: &RecordFilter) -> Result<Vec<BuildRecord>> {
        Ok(select(&*self.records.lock().await, filter))
    }

    async fn upsert(&self, record: BuildRecord) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(record.key().to_string(), record);
        Ok(())
    }

    async fn bulk_update_where_content_matches(
        &self,
        pattern: &Regex,
        cause: &str,
    ) -> Result<usize> {
        Ok(apply_cause(&mut *self.records.lock().await, pattern, cause))
    }

    async fn delete_by_key(&self, package: &str) -> Result<bool> {
        Ok(self.records.lock().await.remove(package).is_some())
    }

    async fn enumerate_all(&self) -> Result<Vec<BuildRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn summarize_all(&self) -> Result<Vec<RecordSummary>> {
        Ok(summarize(&*self.records.lock().await))
    }
}
