//! Local filesystem record store.
//!
//! Keeps the record table in memory and marks it dirty on mutation;
//! [`RecordStore::flush`] rewrites `records.json` once for every batch of
//! changes. Writes go to a temporary file that is renamed over the target,
//! so readers never observe a half-written document.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── records.json          # Currently failing packages
//! └── records.tmp           # Transient, during writes only
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{BuildRecord, RecordFilter, RecordSummary};
use crate::storage::{RecordMap, RecordStore, RecordsFile, apply_cause, replace, select, summarize};

const RECORDS_KEY: &str = "records.json";

#[derive(Default)]
struct Table {
    records: RecordMap,
    /// Changed since the last successful write
    dirty: bool,
}

/// JSON-file backed record store.
pub struct LocalStore {
    root_dir: PathBuf,
    table: Mutex<Table>,
    writes: AtomicUsize,
}

impl LocalStore {
    /// Open the store rooted at `root_dir`, loading existing records.
    ///
    /// A missing `records.json` starts an empty store; an unreadable one is
    /// an error.
    pub async fn open(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        tokio::fs::create_dir_all(&root_dir).await?;

        let path = root_dir.join(RECORDS_KEY);
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: RecordsFile = serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::store(format!("{} is not a valid record file: {e}", path.display()))
                })?;
                file.records
                    .into_iter()
                    .map(|r| (r.key().to_string(), r))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RecordMap::new(),
            Err(e) => return Err(AppError::Io(e)),
        };

        log::debug!("Opened record store at {} ({} records)", path.display(), records.len());

        Ok(Self {
            root_dir,
            table: Mutex::new(Table {
                records,
                dirty: false,
            }),
            writes: AtomicUsize::new(0),
        })
    }

    /// Number of times `records.json` has been written by this handle.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Apply a mutation that reports whether it changed the table.
    async fn mutate<T>(&self, op: impl FnOnce(&mut RecordMap) -> (T, bool)) -> T {
        let mut table = self.table.lock().await;
        let (outcome, changed) = op(&mut table.records);
        table.dirty |= changed;
        outcome
    }
}

#[async_trait]
impl RecordStore for LocalStore {
    async fn find_by_key(&self, package: &str) -> Result<Option<BuildRecord>> {
        Ok(self.table.lock().await.records.get(package).cloned())
    }

    async fn count_matching(&self, filter: &RecordFilter) -> Result<usize> {
        let table = self.table.lock().await;
        Ok(table.records.values().filter(|r| filter.matches(r)).count())
    }

    async fn find_matching(&self, filter: &RecordFilter) -> Result<Vec<BuildRecord>> {
        Ok(select(&self.table.lock().await.records, filter))
    }

    async fn upsert(&self, record: BuildRecord) -> Result<()> {
        self.mutate(|records| ((), replace(records, record))).await;
        Ok(())
    }

    async fn bulk_update_where_content_matches(
        &self,
        pattern: &Regex,
        cause: &str,
    ) -> Result<usize> {
        Ok(self
            .mutate(|records| {
                let changed = apply_cause(records, pattern, cause);
                (changed, changed > 0)
            })
            .await)
    }

    async fn delete_by_key(&self, package: &str) -> Result<bool> {
        Ok(self
            .mutate(|records| {
                let removed = records.remove(package).is_some();
                (removed, removed)
            })
            .await)
    }

    async fn enumerate_all(&self) -> Result<Vec<BuildRecord>> {
        Ok(self.table.lock().await.records.values().cloned().collect())
    }

    async fn summarize_all(&self) -> Result<Vec<RecordSummary>> {
        Ok(summarize(&self.table.lock().await.records))
    }

    async fn flush(&self) -> Result<()> {
        let mut table = self.table.lock().await;
        if !table.dirty {
            return Ok(());
        }
        let file = RecordsFile::new(table.records.values().cloned().collect());
        let bytes = serde_json::to_vec_pretty(&file)?;
        self.write_bytes(RECORDS_KEY, &bytes).await?;
        table.dirty = false;
        log::debug!("Persisted {} records", file.count);
        Ok(())
    }
}
