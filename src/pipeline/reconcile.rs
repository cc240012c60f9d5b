// src/pipeline/reconcile.rs

//! Failure-set reconciliation.
//!
//! One cycle lists failing builds, fetches and classifies logs for builds not
//! yet stored, upserts them, and then purges records whose log URL was not
//! observed. The purge only runs after every fetch has settled and only when
//! the listing was complete.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::models::{
    BuildDescriptor, BuildListing, BuildQuery, BuildRecord, Config, RecordFilter,
    SourcePublication,
};
use crate::services::{BuildFarm, Classifier, LogSource};
use crate::storage::RecordStore;

/// Log URLs seen as currently failing during one cycle.
pub type ObservedSet = BTreeSet<String>;

/// Outcome of one reconciliation cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Builds returned by the farm
    pub listed: usize,
    pub wrong_arch: usize,
    pub superseded: usize,
    pub missing_log: usize,
    /// Candidates dropped in favor of a newer build of the same package
    pub duplicates: usize,
    /// Candidates whose log was already stored
    pub reused: usize,
    pub fetched: usize,
    pub fetch_failures: usize,
    pub store_failures: usize,
    /// Records kept despite a failed refresh
    pub retained: usize,
    pub purged: usize,
    pub enumeration_complete: bool,
    pub purge_ran: bool,
    pub observed: ObservedSet,
}

impl CycleReport {
    /// Whether any store record changed during the cycle.
    pub fn mutated(&self) -> bool {
        self.fetched > 0 || self.purged > 0
    }

    fn log_summary(&self) {
        log::info!(
            "Cycle finished in {}s: {} listed, {} reused, {} fetched, {} fetch failures, {} purged{}",
            (self.finished_at - self.started_at).num_seconds(),
            self.listed,
            self.reused,
            self.fetched,
            self.fetch_failures,
            self.purged,
            if self.purge_ran { "" } else { " (purge skipped)" }
        );
        log::debug!(
            "Filtered: {} wrong arch, {} superseded, {} without log, {} duplicates; {} retained, {} store failures",
            self.wrong_arch,
            self.superseded,
            self.missing_log,
            self.duplicates,
            self.retained,
            self.store_failures
        );
    }
}

/// A build that passed filtering.
#[derive(Debug, Clone)]
struct Candidate {
    url: String,
    arch: String,
    date_created: DateTime<Utc>,
    publication: SourcePublication,
}

impl Candidate {
    fn into_record(self, cause: String, content: String) -> BuildRecord {
        BuildRecord {
            package: self.publication.package,
            version: self.publication.version,
            arch: self.arch,
            url: self.url,
            cause,
            content,
            date_created: self.date_created,
            component: self.publication.component,
        }
    }
}

/// Cycle-scoped bookkeeping, discarded when the cycle ends.
#[derive(Default)]
struct CycleState {
    report: CycleReport,
    /// Packages whose stored record must survive this cycle's purge
    protected: HashSet<String>,
}

/// Runs reconciliation cycles against a farm, a log source and a store.
pub struct Reconciler {
    farm: Arc<dyn BuildFarm>,
    logs: Arc<dyn LogSource>,
    store: Arc<dyn RecordStore>,
    classifier: Arc<Classifier>,
    config: Arc<Config>,
}

impl Reconciler {
    pub fn new(
        farm: Arc<dyn BuildFarm>,
        logs: Arc<dyn LogSource>,
        store: Arc<dyn RecordStore>,
        classifier: Arc<Classifier>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            farm,
            logs,
            store,
            classifier,
            config,
        }
    }

    /// One query per configured (state, pocket) pair.
    pub fn queries(&self) -> Vec<BuildQuery> {
        let farm = &self.config.farm;
        farm.states
            .iter()
            .flat_map(|state| {
                farm.pockets.iter().map(move |pocket| BuildQuery {
                    series: farm.series.clone(),
                    pocket: pocket.clone(),
                    state: state.clone(),
                    source_name: farm.source_name.clone(),
                })
            })
            .collect()
    }

    /// Run one full cycle: enumerate, insert, then purge.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut state = CycleState::default();
        state.report.started_at = Utc::now();

        let listing = self.enumerate().await;
        state.report.listed = listing.builds.len();
        state.report.enumeration_complete = listing.is_complete();
        if let Some(e) = &listing.failure {
            log::error!("Build enumeration failed; purge skipped this cycle: {e}");
        }

        let candidates = self.select_candidates(listing.builds, &mut state.report);
        self.insert_phase(candidates, &mut state).await;
        self.persist("insert", &mut state.report).await;

        // Every fetch has settled here, so the observed set is final.
        if state.report.enumeration_complete {
            self.purge_phase(&mut state).await;
            self.persist("purge", &mut state.report).await;
        }

        state.report.finished_at = Utc::now();
        state.report.log_summary();
        state.report
    }

    /// Flush the store once per phase.
    async fn persist(&self, phase: &str, report: &mut CycleReport) {
        if let Err(e) = self.store.flush().await {
            log::error!("Failed to persist records after {phase} phase: {e}");
            report.store_failures += 1;
        }
    }

    async fn enumerate(&self) -> BuildListing {
        let mut listing = BuildListing::default();
        for query in self.queries() {
            log::info!(
                "Listing '{}' builds in pocket {} of {}",
                query.state,
                query.pocket,
                query.series.as_deref().unwrap_or("the focus series")
            );
            listing.merge(self.farm.list_builds(&query, &self.config.targets).await);
        }
        listing
    }

    /// Filter the listing and collapse repeated packages to their newest build.
    fn select_candidates(
        &self,
        builds: Vec<BuildDescriptor>,
        report: &mut CycleReport,
    ) -> Vec<Candidate> {
        let mut by_package: HashMap<String, Candidate> = HashMap::new();

        for build in builds {
            if !self.config.targets.is_target(&build.arch_tag) {
                report.wrong_arch += 1;
                continue;
            }
            let Some(publication) = build.publication else {
                report.superseded += 1;
                continue;
            };
            let Some(url) = build.log_url else {
                log::debug!("No build log for {} on {}", publication.package, build.arch_tag);
                report.missing_log += 1;
                continue;
            };

            let candidate = Candidate {
                url,
                arch: build.arch_tag,
                date_created: build.date_created,
                publication,
            };

            match by_package.get(&candidate.publication.package) {
                Some(existing)
                    if (existing.date_created, &existing.url)
                        >= (candidate.date_created, &candidate.url) =>
                {
                    report.duplicates += 1;
                }
                Some(_) => {
                    report.duplicates += 1;
                    by_package.insert(candidate.publication.package.clone(), candidate);
                }
                None => {
                    by_package.insert(candidate.publication.package.clone(), candidate);
                }
            }
        }

        let mut candidates: Vec<Candidate> = by_package.into_values().collect();
        candidates.sort_by(|a, b| a.publication.package.cmp(&b.publication.package));
        candidates
    }

    async fn insert_phase(&self, candidates: Vec<Candidate>, state: &mut CycleState) {
        let mut to_fetch = Vec::new();
        for candidate in candidates {
            match self
                .store
                .count_matching(&RecordFilter::by_url(&candidate.url))
                .await
            {
                Ok(0) => to_fetch.push(candidate),
                Ok(_) => {
                    log::debug!("Already stored: {}", candidate.url);
                    state.report.reused += 1;
                    state.report.observed.insert(candidate.url);
                }
                Err(e) => {
                    log::warn!("Store lookup failed for {}: {}", candidate.url, e);
                    state.report.store_failures += 1;
                    state.protected.insert(candidate.publication.package);
                }
            }
        }

        let delay = self.config.fetch.request_delay();
        let concurrency = self.config.fetch.max_concurrent.max(1);

        let mut fetches = stream::iter(to_fetch)
            .map(|candidate| async move {
                let result = self.logs.fetch(&candidate.url).await;
                (candidate, result)
            })
            .buffer_unordered(concurrency);

        while let Some((candidate, result)) = fetches.next().await {
            let package = candidate.publication.package.clone();
            match result {
                Ok(content) => {
                    let cause = self.classifier.classify(&content).to_string();
                    log::info!(
                        "Saving error log for {} {} {} ({})",
                        package,
                        candidate.publication.version,
                        candidate.arch,
                        cause
                    );
                    let url = candidate.url.clone();
                    match self.store.upsert(candidate.into_record(cause, content)).await {
                        Ok(()) => {
                            state.report.fetched += 1;
                            state.report.observed.insert(url);
                        }
                        Err(e) => {
                            log::warn!("Failed to store record for {}: {}", package, e);
                            state.report.store_failures += 1;
                            state.protected.insert(package);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Skipping {} this cycle: {}", package, e);
                    state.report.fetch_failures += 1;
                    state.protected.insert(package);
                }
            }

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Delete records not observed this cycle.
    ///
    /// With a source filter in effect only that package's record is in scope.
    async fn purge_phase(&self, state: &mut CycleState) {
        let records = match self.store.enumerate_all().await {
            Ok(records) => records,
            Err(e) => {
                log::error!("Cannot enumerate stored records; purge skipped: {e}");
                return;
            }
        };
        state.report.purge_ran = true;
        let scope = self.config.farm.source_name.as_deref();

        for record in records {
            if state.report.observed.contains(&record.url) {
                continue;
            }
            if scope.is_some_and(|source| source != record.package) {
                state.report.observed.insert(record.url);
                continue;
            }
            if state.protected.contains(&record.package) {
                log::debug!("Retaining {} until its log can be fetched", record.package);
                state.report.retained += 1;
                state.report.observed.insert(record.url);
                continue;
            }

            match self.store.delete_by_key(&record.package).await {
                Ok(true) => {
                    log::info!("Purged {} ({})", record.package, record.url);
                    state.report.purged += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    log::warn!("Failed to purge {}: {}", record.package, e);
                    state.report.store_failures += 1;
                    state.report.observed.insert(record.url);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_record;
    use crate::pipeline::testing::{CountingStore, FakeFarm, FakeLogs, build, reconciler};

    const A: &str = "https://farm.test/a/buildlog.txt";
    const B: &str = "https://farm.test/b/buildlog.txt";
    const C: &str = "https://farm.test/c/buildlog.txt";

    fn scenario_logs() -> FakeLogs {
        FakeLogs::new()
            .with_log(A, "compiling...\nSegmentation fault\n")
            .with_log(B, "dh_auto_test: error\n")
            .with_log(C, "Segmentation fault\n")
    }

    #[tokio::test]
    async fn test_scenario_insert_then_purge() {
        let farm = Arc::new(FakeFarm::new(vec![
            build("a", "armel", A),
            build("b", "armel", B),
            build("c", "amd64", C),
        ]));
        let logs = Arc::new(scenario_logs());
        let store = Arc::new(CountingStore::default());
        let reconciler = reconciler(farm.clone(), logs.clone(), store.clone());

        let report = reconciler.run_cycle().await;
        assert!(report.purge_ran);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.wrong_arch, 1);

        let records = store.enumerate_all().await.unwrap();
        let causes: Vec<(&str, &str)> = records
            .iter()
            .map(|r| (r.package.as_str(), r.cause.as_str()))
            .collect();
        assert_eq!(causes, vec![("a", "segfault"), ("b", "other")]);
        assert_eq!(logs.calls(C), 0);

        let a_before = store.find_by_key("a").await.unwrap().unwrap();
        farm.set_builds(vec![build("a", "armel", A)]);
        let report = reconciler.run_cycle().await;

        assert_eq!(report.purged, 1);
        assert_eq!(logs.calls(A), 1);
        let records = store.enumerate_all().await.unwrap();
        assert_eq!(records, vec![a_before]);
    }

    #[tokio::test]
    async fn test_identical_cycles_are_idempotent() {
        let farm = Arc::new(FakeFarm::new(vec![build("a", "armel", A), build("b", "armel", B)]));
        let logs = Arc::new(scenario_logs());
        let store = Arc::new(CountingStore::default());
        let reconciler = reconciler(farm, logs.clone(), store.clone());

        reconciler.run_cycle().await;
        let mutations = store.mutations();
        let fetches = logs.total_calls();

        let report = reconciler.run_cycle().await;
        assert!(!report.mutated());
        assert_eq!(report.reused, 2);
        assert_eq!(store.mutations(), mutations);
        assert_eq!(logs.total_calls(), fetches);
        // One flush after each phase of each cycle.
        assert_eq!(store.flushes(), 4);
    }

    #[tokio::test]
    async fn test_stored_url_is_never_fetched() {
        let farm = Arc::new(FakeFarm::new(vec![build("a", "armel", A)]));
        let logs = Arc::new(scenario_logs());
        let store = Arc::new(CountingStore::with_records([sample_record("a", A, "timeout")]));
        let reconciler = reconciler(farm, logs.clone(), store.clone());

        let report = reconciler.run_cycle().await;
        assert_eq!(logs.calls(A), 0);
        assert_eq!(report.reused, 1);
        assert_eq!(store.find_by_key("a").await.unwrap().unwrap().cause, "timeout");
    }

    #[tokio::test]
    async fn test_surviving_records_are_all_observed() {
        let farm = Arc::new(FakeFarm::new(vec![build("a", "armel", A), build("b", "armel", B)]));
        let store = Arc::new(CountingStore::with_records([
            sample_record("gone", "https://farm.test/gone.txt", "other"),
            sample_record("b", "https://farm.test/b-old.txt", "other"),
        ]));
        let reconciler = reconciler(farm, Arc::new(scenario_logs()), store.clone());

        let report = reconciler.run_cycle().await;
        let records = store.enumerate_all().await.unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| report.observed.contains(&r.url)));
        assert!(store.find_by_key("gone").await.unwrap().is_none());
        assert_eq!(store.find_by_key("b").await.unwrap().unwrap().url, B);
    }

    #[tokio::test]
    async fn test_filtered_builds_never_touch_the_store() {
        let mut superseded = build("old", "armel", "https://farm.test/old.txt");
        superseded.publication = None;
        let mut no_log = build("nolog", "armel", "unused");
        no_log.log_url = None;

        let farm = Arc::new(FakeFarm::new(vec![
            build("c", "amd64", C),
            superseded,
            no_log,
        ]));
        let logs = Arc::new(scenario_logs());
        let store = Arc::new(CountingStore::default());
        let reconciler = reconciler(farm, logs.clone(), store.clone());

        let report = reconciler.run_cycle().await;
        assert_eq!((report.wrong_arch, report.superseded, report.missing_log), (1, 1, 1));
        assert_eq!(store.mutations(), 0);
        assert_eq!(logs.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_enumeration_failure_skips_purge() {
        let farm = Arc::new(FakeFarm::new(vec![build("b", "armel", B)]));
        farm.fail_with("page 2 timed out");
        let store = Arc::new(CountingStore::with_records([sample_record(
            "a",
            A,
            "segfault",
        )]));
        let reconciler = reconciler(farm, Arc::new(scenario_logs()), store.clone());

        let report = reconciler.run_cycle().await;
        assert!(!report.enumeration_complete);
        assert!(!report.purge_ran);
        assert_eq!(store.flushes(), 1);
        assert_eq!(report.fetched, 1);
        assert!(store.find_by_key("a").await.unwrap().is_some());
        assert!(store.find_by_key("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_build_and_retains_previous_record() {
        let farm = Arc::new(FakeFarm::new(vec![build("a", "armel", A), build("b", "armel", B)]));
        let logs = Arc::new(scenario_logs().with_failure(B));
        let store = Arc::new(CountingStore::with_records([sample_record(
            "b",
            "https://farm.test/b-old.txt",
            "timeout",
        )]));
        let reconciler = reconciler(farm, logs.clone(), store.clone());

        let report = reconciler.run_cycle().await;
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.retained, 1);
        assert!(store.find_by_key("a").await.unwrap().is_some());
        let kept = store.find_by_key("b").await.unwrap().unwrap();
        assert_eq!(kept.url, "https://farm.test/b-old.txt");
        assert!(report.observed.contains(&kept.url));

        // The new log is not stored yet, so the next cycle tries again.
        reconciler.run_cycle().await;
        assert_eq!(logs.calls(B), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_without_record_leaves_nothing() {
        let farm = Arc::new(FakeFarm::new(vec![build("b", "armel", B)]));
        let logs = Arc::new(scenario_logs().with_failure(B));
        let store = Arc::new(CountingStore::default());
        let reconciler = reconciler(farm, logs, store.clone());

        let report = reconciler.run_cycle().await;
        assert!(report.observed.is_empty());
        assert!(store.enumerate_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_packages_keep_newest_build() {
        let older = build("a", "armel", "https://farm.test/a-armel.txt");
        let mut newer = build("a", "armhf", "https://farm.test/a-armhf.txt");
        newer.date_created = older.date_created + chrono::Duration::hours(1);

        let farm = Arc::new(FakeFarm::new(vec![newer, older]));
        let logs = Arc::new(
            FakeLogs::new()
                .with_log("https://farm.test/a-armel.txt", "x")
                .with_log("https://farm.test/a-armhf.txt", "y"),
        );
        let store = Arc::new(CountingStore::default());
        let mut config = Config::default();
        config.targets.architectures = vec!["armel".into(), "armhf".into()];
        let reconciler = Reconciler::new(
            farm,
            logs.clone(),
            store.clone(),
            Arc::new(Classifier::default()),
            Arc::new(config),
        );

        let report = reconciler.run_cycle().await;
        assert_eq!(report.duplicates, 1);
        let records = store.enumerate_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].arch, "armhf");
        assert_eq!(logs.calls("https://farm.test/a-armel.txt"), 0);

        let report = reconciler.run_cycle().await;
        assert!(!report.mutated());
    }

    #[tokio::test]
    async fn test_source_filter_limits_purge_scope() {
        let farm = Arc::new(FakeFarm::new(vec![]));
        let store = Arc::new(CountingStore::with_records([
            sample_record("a", A, "segfault"),
            sample_record("b", B, "other"),
        ]));
        let mut config = Config::default();
        config.farm.source_name = Some("b".into());
        let reconciler = Reconciler::new(
            farm.clone(),
            Arc::new(scenario_logs()),
            store.clone(),
            Arc::new(Classifier::default()),
            Arc::new(config),
        );

        let report = reconciler.run_cycle().await;
        assert_eq!(report.purged, 1);
        assert!(store.find_by_key("a").await.unwrap().is_some());
        assert!(store.find_by_key("b").await.unwrap().is_none());
        assert_eq!(farm.queries()[0].source_name.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_one_query_per_state_and_pocket() {
        let farm = Arc::new(FakeFarm::new(vec![]));
        let mut config = Config::default();
        config.farm.pockets = vec!["Release".into(), "Updates".into()];
        config.farm.series = Some("natty".into());
        let reconciler = Reconciler::new(
            farm.clone(),
            Arc::new(FakeLogs::new()),
            Arc::new(CountingStore::default()),
            Arc::new(Classifier::default()),
            Arc::new(config),
        );

        reconciler.run_cycle().await;
        let pockets: Vec<String> = farm.queries().into_iter().map(|q| q.pocket).collect();
        assert_eq!(pockets, vec!["Release", "Updates"]);
        assert!(farm.queries().iter().all(|q| q.series.as_deref() == Some("natty")));
    }

    #[tokio::test]
    async fn test_bounded_parallel_fetches() {
        let builds: Vec<_> = (0..12)
            .map(|i| build(&format!("pkg{i:02}"), "armel", &format!("https://farm.test/{i}.txt")))
            .collect();
        let mut logs = FakeLogs::new().with_latency(std::time::Duration::from_millis(20));
        for i in 0..12 {
            logs = logs.with_log(&format!("https://farm.test/{i}.txt"), "ok");
        }
        let logs = Arc::new(logs);
        let store = Arc::new(CountingStore::default());
        let reconciler = reconciler(Arc::new(FakeFarm::new(builds)), logs.clone(), store.clone());

        let report = reconciler.run_cycle().await;
        assert_eq!(report.fetched, 12);
        assert!(logs.max_in_flight() <= Config::default().fetch.max_concurrent);
        assert!(logs.max_in_flight() > 1);
        assert_eq!(store.enumerate_all().await.unwrap().len(), 12);
    }
}
