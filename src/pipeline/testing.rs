//! In-process fakes for exercising the pipeline without a network.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::{
    BuildDescriptor, BuildListing, BuildQuery, BuildRecord, Config, RecordFilter,
    SourcePublication, TargetConfig,
};
use crate::pipeline::Reconciler;
use crate::services::{BuildFarm, Classifier, LogSource};
use crate::storage::{MemoryStore, RecordStore};

/// A current build of `package` with a log at `url`.
pub fn build(package: &str, arch: &str, url: &str) -> BuildDescriptor {
    BuildDescriptor {
        log_url: Some(url.to_string()),
        arch_tag: arch.to_string(),
        date_created: Utc.with_ymd_and_hms(2011, 5, 1, 8, 0, 0).unwrap(),
        publication: Some(SourcePublication {
            package: package.to_string(),
            version: "1.0-1".to_string(),
            component: "main".to_string(),
        }),
    }
}

/// Reconciler over the given fakes with default config and patterns.
pub fn reconciler(
    farm: Arc<FakeFarm>,
    logs: Arc<FakeLogs>,
    store: Arc<CountingStore>,
) -> Reconciler {
    Reconciler::new(
        farm,
        logs,
        store,
        Arc::new(Classifier::default()),
        Arc::new(Config::default()),
    )
}

/// Farm returning a fixed build list, optionally cut short by a failure.
#[derive(Default)]
pub struct FakeFarm {
    builds: Mutex<Vec<BuildDescriptor>>,
    failure: Mutex<Option<String>>,
    queries: Mutex<Vec<BuildQuery>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

impl FakeFarm {
    pub fn new(builds: Vec<BuildDescriptor>) -> Self {
        Self {
            builds: Mutex::new(builds),
            ..Self::default()
        }
    }

    /// Every listing takes `latency` to return.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_builds(&self, builds: Vec<BuildDescriptor>) {
        *self.builds.lock().unwrap() = builds;
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn queries(&self) -> Vec<BuildQuery> {
        self.queries.lock().unwrap().clone()
    }

    /// Highest number of listings observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl BuildFarm for FakeFarm {
    async fn list_builds(&self, query: &BuildQuery, _targets: &TargetConfig) -> BuildListing {
        self.queries.lock().unwrap().push(query.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let builds = self.builds.lock().unwrap().clone();
        let failure = self.failure.lock().unwrap().clone();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        match failure {
            Some(message) => BuildListing::interrupted(builds, AppError::farm(message)),
            None => BuildListing::complete(builds),
        }
    }
}

/// Log source serving canned bodies and counting requests per URL.
#[derive(Default)]
pub struct FakeLogs {
    bodies: HashMap<String, String>,
    failing: Vec<String>,
    latency: Duration,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_failure(mut self, url: &str) -> Self {
        self.failing.push(url.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for FakeLogs {
    async fn fetch(&self, url: &str) -> Result<String> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.iter().any(|u| u == url) {
            return Err(AppError::fetch(url, "HTTP 503"));
        }
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::fetch(url, "HTTP 404"))
    }
}

/// Memory store that counts mutating calls and flushes.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    mutations: AtomicUsize,
    flushes: AtomicUsize,
}

impl CountingStore {
    pub fn with_records(records: impl IntoIterator<Item = BuildRecord>) -> Self {
        Self {
            inner: MemoryStore::with_records(records),
            ..Self::default()
        }
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for CountingStore {
    async fn find_by_key(&self, package: &str) -> Result<Option<BuildRecord>> {
        self.inner.find_by_key(package).await
    }

    async fn count_matching(&self, filter: &RecordFilter) -> Result<usize> {
        self.inner.count_matching(filter).await
    }

    async fn find_matching(&self, filter: &RecordFilter) -> Result<Vec<BuildRecord>> {
        self.inner.find_matching(filter).await
    }

    async fn upsert(&self, record: BuildRecord) -> Result<()> {
        self.mutated();
        self.inner.upsert(record).await
    }

    async fn bulk_update_where_content_matches(
        &self,
        pattern: &Regex,
        cause: &str,
    ) -> Result<usize> {
        self.mutated();
        self.inner
            .bulk_update_where_content_matches(pattern, cause)
            .await
    }

    async fn delete_by_key(&self, package: &str) -> Result<bool> {
        self.mutated();
        self.inner.delete_by_key(package).await
    }

    async fn enumerate_all(&self) -> Result<Vec<BuildRecord>> {
        self.inner.enumerate_all().await
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}
